//! Daemon identity and the pairing offer.
//!
//! The long-term key pair and stable server id live in
//! `paseoHome/identity.json`, generated on first boot. The pairing offer is
//! emitted to the structured log exactly once per boot.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use paseo_domain::Result;
use paseo_protocol::offer::{pairing_url, ConnectionOfferV2};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub server_id: String,
    pub public_key_b64: String,
    secret_key_b64: String,
}

static OFFER_LOGGED: AtomicBool = AtomicBool::new(false);

impl Identity {
    /// Load the persisted identity, or mint one. `PASEO_SERVER_ID` (when
    /// set) overrides and is persisted for later boots.
    pub fn load_or_generate(paseo_home: &Path, server_id_override: Option<&str>) -> Result<Self> {
        std::fs::create_dir_all(paseo_home)?;
        let path = paseo_home.join("identity.json");

        let mut identity: Identity = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            let mut secret = [0u8; 32];
            let mut public = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut secret);
            rand::thread_rng().fill_bytes(&mut public);
            Identity {
                server_id: format!("srv_{}", uuid::Uuid::new_v4().simple()),
                public_key_b64: URL_SAFE_NO_PAD.encode(public),
                secret_key_b64: URL_SAFE_NO_PAD.encode(secret),
            }
        };

        let mut dirty = !path.exists();
        if let Some(override_id) = server_id_override {
            if identity.server_id != override_id {
                identity.server_id = override_id.to_string();
                dirty = true;
            }
        }
        if dirty {
            let json = serde_json::to_vec_pretty(&identity)?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, json)?;
            std::fs::rename(&tmp, &path)?;
        }
        Ok(identity)
    }

    /// Build the boot-time pairing offer for a relay endpoint.
    pub fn offer(&self, relay_endpoint: &str) -> ConnectionOfferV2 {
        ConnectionOfferV2::new(
            self.server_id.clone(),
            self.public_key_b64.clone(),
            relay_endpoint.to_string(),
        )
    }

    /// Emit the pairing offer log line. Idempotent: bounded to one line per
    /// daemon boot.
    pub fn log_pairing_offer(&self, relay_endpoint: &str) -> Result<()> {
        if OFFER_LOGGED.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let url = pairing_url("https://paseo.app", &self.offer(relay_endpoint))?;
        tracing::info!(msg = "pairing_offer", url = %url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paseo_protocol::offer::decode_offer;

    #[test]
    fn identity_is_stable_across_loads() {
        let home = tempfile::tempdir().unwrap();
        let first = Identity::load_or_generate(home.path(), None).unwrap();
        let second = Identity::load_or_generate(home.path(), None).unwrap();
        assert_eq!(first.server_id, second.server_id);
        assert_eq!(first.public_key_b64, second.public_key_b64);
        assert!(first.server_id.starts_with("srv_"));
    }

    #[test]
    fn override_rekeys_and_persists() {
        let home = tempfile::tempdir().unwrap();
        let _ = Identity::load_or_generate(home.path(), None).unwrap();
        let overridden = Identity::load_or_generate(home.path(), Some("srv_pinned")).unwrap();
        assert_eq!(overridden.server_id, "srv_pinned");

        let reloaded = Identity::load_or_generate(home.path(), None).unwrap();
        assert_eq!(reloaded.server_id, "srv_pinned");
    }

    #[test]
    fn offer_round_trips_through_codec() {
        let home = tempfile::tempdir().unwrap();
        let identity = Identity::load_or_generate(home.path(), None).unwrap();
        let offer = identity.offer("relay.example.com:7440");
        let url = pairing_url("https://paseo.app", &offer).unwrap();
        assert_eq!(decode_offer(&url).unwrap(), offer);
    }
}
