use std::path::Path;

use paseo_domain::event::{BoxStream, ProviderEvent};
use paseo_domain::timeline::ImageBlock;
use paseo_domain::Result;

use crate::registry::ModelEntry;

/// A prompt submitted to a provider session.
#[derive(Debug, Clone, Default)]
pub struct AgentPrompt {
    pub text: String,
    pub images: Vec<ImageBlock>,
}

impl AgentPrompt {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }
}

/// Trait every agent provider adapter implements.
#[async_trait::async_trait]
pub trait AgentProvider: Send + Sync {
    /// Stable provider id (e.g. `"anthropic"`, `"scripted"`).
    fn id(&self) -> &str;

    /// Whether this provider emits `permission_request` events.
    fn supports_permissions(&self) -> bool;

    /// Whether sessions can be resumed from a persistence handle.
    fn supports_persistence(&self) -> bool;

    /// Models this provider advertises.
    async fn list_models(&self) -> Result<Vec<ModelEntry>>;

    /// Open a session bound to a working directory. `persistence` resumes
    /// an earlier session when the provider supports it.
    async fn open_session(
        &self,
        cwd: &Path,
        model: Option<&str>,
        persistence: Option<&str>,
    ) -> Result<Box<dyn AgentSession>>;
}

/// One live provider session. A session runs at most one stream at a time;
/// the agent manager enforces this.
#[async_trait::async_trait]
pub trait AgentSession: Send + Sync {
    /// Persistence handle to store for later resume, if supported.
    fn persistence_handle(&self) -> Option<String>;

    /// Start a run. The returned stream is finite: it ends at `finish`,
    /// `error`, or cancellation. Returning from this call confirms the run
    /// has started.
    async fn stream(&self, prompt: AgentPrompt) -> Result<BoxStream<'static, ProviderEvent>>;

    /// Resolve a pending permission request. The run resumes or terminates
    /// as the provider directs; the caller never auto-resolves.
    async fn respond_to_permission(&self, request_id: &str, accept: bool) -> Result<()>;

    /// Interrupt the current run. The active stream terminates promptly;
    /// buffered events may still be drained by the consumer.
    async fn cancel(&self) -> Result<()>;

    /// Release provider resources. The session is unusable afterwards.
    async fn close(&self) -> Result<()>;
}
