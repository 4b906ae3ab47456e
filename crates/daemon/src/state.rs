//! Shared daemon state.
//!
//! One `Daemon` value is built at boot and injected into every session and
//! server handler — no ambient globals.

use std::sync::Arc;

use paseo_domain::config::DaemonConfig;
use paseo_domain::Result;
use paseo_providers::ProviderRegistry;
use paseo_term::TerminalManager;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentManager, AgentStorage};
use crate::control::{PushTokenStore, RestartController};
use crate::files::DownloadTokens;
use crate::pairing::Identity;
use crate::voice::VoiceStore;
use crate::worktree::WorktreeEngine;

/// Shared daemon state passed to all sessions and handlers.
#[derive(Clone)]
pub struct Daemon {
    pub config: Arc<DaemonConfig>,
    pub identity: Arc<Identity>,
    pub agents: Arc<AgentManager>,
    pub worktrees: Arc<WorktreeEngine>,
    pub terminals: Arc<TerminalManager>,
    pub voice: Arc<VoiceStore>,
    pub downloads: Arc<DownloadTokens>,
    pub push_tokens: Arc<PushTokenStore>,
    pub restart: Arc<RestartController>,
}

impl Daemon {
    /// Assemble the daemon from config + a provider registry. Hydrates the
    /// agent registry from disk.
    pub fn build(
        config: DaemonConfig,
        providers: Arc<ProviderRegistry>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let identity = Arc::new(Identity::load_or_generate(
            &config.paseo_home,
            config.server_id_override.as_deref(),
        )?);

        let storage = Arc::new(AgentStorage::open(&config.agents_dir())?);
        let agents = AgentManager::new(providers, storage);
        agents.boot()?;

        let worktrees = Arc::new(WorktreeEngine::new(&config.paseo_home)?);
        let voice = Arc::new(VoiceStore::open(&config.voice_dir())?);
        let push_tokens = Arc::new(PushTokenStore::open(&config.paseo_home)?);

        Ok(Self {
            config: Arc::new(config),
            identity,
            agents,
            worktrees,
            terminals: Arc::new(TerminalManager::new()),
            voice,
            downloads: Arc::new(DownloadTokens::new()),
            push_tokens,
            restart: Arc::new(RestartController::new(shutdown)),
        })
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}
