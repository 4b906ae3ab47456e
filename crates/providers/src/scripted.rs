//! Deterministic in-memory provider for tests.
//!
//! Each run plays the next configured script. Scripts can pause (to keep a
//! run in flight while a test races it) and block on permission gates.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use paseo_domain::event::{BoxStream, ProviderEvent};
use paseo_domain::{Error, Result};

use crate::registry::ModelEntry;
use crate::traits::{AgentPrompt, AgentProvider, AgentSession};

/// One step of a scripted run.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit an event. A `permission_request` event blocks the run until
    /// `respond_to_permission` resolves it.
    Event(ProviderEvent),
    /// Hold the run open without emitting anything.
    Pause(Duration),
}

impl From<ProviderEvent> for ScriptStep {
    fn from(ev: ProviderEvent) -> Self {
        ScriptStep::Event(ev)
    }
}

/// A provider whose runs replay pre-configured scripts in order.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<VecDeque<Vec<ScriptStep>>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into_iter().collect())),
        }
    }

    /// Queue another run script.
    pub fn push_script(&self, script: Vec<ScriptStep>) {
        self.scripts.lock().push_back(script);
    }

    /// Convenience: a run that emits one text delta and finishes.
    pub fn trivial_script(text: &str) -> Vec<ScriptStep> {
        vec![
            ScriptStep::Event(ProviderEvent::TextDelta { text: text.into() }),
            ScriptStep::Event(ProviderEvent::Finish { reason: None }),
        ]
    }
}

#[async_trait::async_trait]
impl AgentProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn supports_permissions(&self) -> bool {
        true
    }

    fn supports_persistence(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<ModelEntry>> {
        Ok(vec![ModelEntry {
            provider: "scripted".into(),
            id: "scripted-1".into(),
            label: Some("Scripted test model".into()),
        }])
    }

    async fn open_session(
        &self,
        cwd: &Path,
        _model: Option<&str>,
        persistence: Option<&str>,
    ) -> Result<Box<dyn AgentSession>> {
        Ok(Box::new(ScriptedSession {
            scripts: self.scripts.clone(),
            handle: persistence
                .map(str::to_owned)
                .unwrap_or_else(|| format!("scripted:{}", cwd.display())),
            run_cancel: Mutex::new(None),
            permissions: Arc::new(Mutex::new(HashMap::new())),
        }))
    }
}

struct ScriptedSession {
    scripts: Arc<Mutex<VecDeque<Vec<ScriptStep>>>>,
    handle: String,
    run_cancel: Mutex<Option<CancellationToken>>,
    permissions: Arc<Mutex<HashMap<String, oneshot::Sender<bool>>>>,
}

#[async_trait::async_trait]
impl AgentSession for ScriptedSession {
    fn persistence_handle(&self) -> Option<String> {
        Some(self.handle.clone())
    }

    async fn stream(&self, _prompt: AgentPrompt) -> Result<BoxStream<'static, ProviderEvent>> {
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| ScriptedProvider::trivial_script("ok"));

        let cancel = CancellationToken::new();
        *self.run_cancel.lock() = Some(cancel.clone());
        let permissions = self.permissions.clone();

        let stream = async_stream::stream! {
            for step in script {
                if cancel.is_cancelled() {
                    return;
                }
                match step {
                    ScriptStep::Pause(dur) => {
                        tokio::select! {
                            _ = tokio::time::sleep(dur) => {}
                            _ = cancel.cancelled() => return,
                        }
                    }
                    ScriptStep::Event(ev) => {
                        let gate = if let ProviderEvent::PermissionRequest {
                            request_id, ..
                        } = &ev
                        {
                            let (tx, rx) = oneshot::channel();
                            permissions.lock().insert(request_id.clone(), tx);
                            Some(rx)
                        } else {
                            None
                        };

                        yield ev;

                        if let Some(rx) = gate {
                            let accepted = tokio::select! {
                                r = rx => r.unwrap_or(false),
                                _ = cancel.cancelled() => return,
                            };
                            if !accepted {
                                yield ProviderEvent::Finish {
                                    reason: Some("permission_denied".into()),
                                };
                                return;
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn respond_to_permission(&self, request_id: &str, accept: bool) -> Result<()> {
        let tx = self.permissions.lock().remove(request_id);
        match tx {
            Some(tx) => {
                let _ = tx.send(accept);
                Ok(())
            }
            None => Err(Error::BadRequest(format!(
                "no pending permission request '{request_id}'"
            ))),
        }
    }

    async fn cancel(&self) -> Result<()> {
        if let Some(token) = self.run_cancel.lock().as_ref() {
            token.cancel();
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(token) = self.run_cancel.lock().as_ref() {
            token.cancel();
        }
        self.permissions.lock().clear();
        Ok(())
    }
}
