//! Daemon control surface: restart, push tokens.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use paseo_domain::Result;

/// Restart coordination. `restart_server_request` flips the flag and shuts
/// the daemon down after a short delay; a supervising parent restarts it,
/// otherwise the process exits 0.
pub struct RestartController {
    requested: AtomicBool,
    shutdown: CancellationToken,
}

impl RestartController {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            requested: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn restart_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request a restart. Idempotent; the first call wins.
    pub fn request_restart(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("restart requested, shutting down shortly");
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            shutdown.cancel();
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTokenRecord {
    pub token: String,
    pub platform: String,
    pub registered_at: DateTime<Utc>,
}

/// Push notification tokens registered by clients, persisted under
/// `paseoHome/push-tokens.json`.
pub struct PushTokenStore {
    path: PathBuf,
    tokens: Mutex<HashMap<String, PushTokenRecord>>,
}

impl PushTokenStore {
    pub fn open(paseo_home: &Path) -> Result<Self> {
        let path = paseo_home.join("push-tokens.json");
        let tokens = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            tokens: Mutex::new(tokens),
        })
    }

    pub fn register(&self, token: &str, platform: &str) -> Result<()> {
        let mut tokens = self.tokens.lock();
        tokens.insert(
            token.to_string(),
            PushTokenRecord {
                token: token.to_string(),
                platform: platform.to_string(),
                registered_at: Utc::now(),
            },
        );
        let json = serde_json::to_vec_pretty(&*tokens)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn restart_cancels_shutdown_token() {
        let shutdown = CancellationToken::new();
        let controller = RestartController::new(shutdown.clone());
        assert!(!controller.restart_requested());

        controller.request_restart();
        controller.request_restart(); // idempotent
        assert!(controller.restart_requested());

        tokio::time::timeout(Duration::from_secs(2), shutdown.cancelled())
            .await
            .expect("shutdown token never cancelled");
    }

    #[test]
    fn push_tokens_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = PushTokenStore::open(dir.path()).unwrap();
        store.register("tok-1", "ios").unwrap();
        store.register("tok-2", "android").unwrap();

        let reloaded = PushTokenStore::open(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 2);
    }
}
