//! Host profiles: the client-side registry of known daemons.
//!
//! Persisted as one JSON document (profiles + client preference documents)
//! with write-temp-then-rename. A handshake reporting a different server id
//! than the stored one triggers a *rekey*: the profile moves under the new
//! id, the old id is appended to `metadata.legacy_ids`, and preference
//! documents keyed by the old id follow.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use paseo_domain::{Error, Result};
use paseo_protocol::offer::ConnectionOfferV2;

/// One dialable candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionKind {
    Direct {
        endpoint: String,
    },
    Relay {
        relay_endpoint: String,
        daemon_public_key_b64: String,
    },
}

impl ConnectionKind {
    pub fn is_direct(&self) -> bool {
        matches!(self, ConnectionKind::Direct { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    #[serde(flatten)]
    pub kind: ConnectionKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub legacy_ids: Vec<String>,
}

/// Client-side record of a known daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostProfile {
    pub server_id: String,
    pub label: String,
    pub connections: Vec<Connection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_connection_id: Option<String>,
    #[serde(default)]
    pub metadata: ProfileMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HostProfile {
    /// Candidate order for the dialer: the preferred connection first, then
    /// the rest in stored order with direct candidates ahead of relay ones.
    pub fn candidate_order(&self) -> Vec<&Connection> {
        let mut out: Vec<&Connection> = Vec::with_capacity(self.connections.len());

        if let Some(preferred) = &self.preferred_connection_id {
            if let Some(conn) = self.connections.iter().find(|c| &c.id == preferred) {
                out.push(conn);
            }
        }

        let rest = |direct: bool| {
            self.connections
                .iter()
                .filter(move |c| {
                    Some(&c.id) != self.preferred_connection_id.as_ref()
                        && c.kind.is_direct() == direct
                })
        };
        out.extend(rest(true));
        out.extend(rest(false));
        out
    }

    fn validate(&self) -> Result<()> {
        if self.connections.is_empty() {
            return Err(Error::BadRequest(
                "host profile needs at least one connection".into(),
            ));
        }
        if let Some(preferred) = &self.preferred_connection_id {
            if !self.connections.iter().any(|c| &c.id == preferred) {
                return Err(Error::BadRequest(format!(
                    "preferred_connection_id '{preferred}' references no connection"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    #[serde(default)]
    hosts: HashMap<String, HostProfile>,
    /// Preference documents: kind → server id → document.
    #[serde(default)]
    preferences: HashMap<String, HashMap<String, serde_json::Value>>,
}

/// JSON-file-backed profile registry.
pub struct ProfileStore {
    path: PathBuf,
    registry: RwLock<Registry>,
}

impl ProfileStore {
    /// Load or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let registry = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            Registry::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            registry: RwLock::new(registry),
        })
    }

    fn persist(&self, registry: &Registry) -> Result<()> {
        let json = serde_json::to_vec_pretty(registry)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn get(&self, server_id: &str) -> Option<HostProfile> {
        self.registry.read().hosts.get(server_id).cloned()
    }

    pub fn list(&self) -> Vec<HostProfile> {
        let mut out: Vec<HostProfile> = self.registry.read().hosts.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Insert or replace a profile.
    pub fn upsert(&self, profile: HostProfile) -> Result<()> {
        profile.validate()?;
        let mut registry = self.registry.write();
        registry.hosts.insert(profile.server_id.clone(), profile);
        self.persist(&registry)
    }

    pub fn remove(&self, server_id: &str) -> Result<bool> {
        let mut registry = self.registry.write();
        let removed = registry.hosts.remove(server_id).is_some();
        if removed {
            self.persist(&registry)?;
        }
        Ok(removed)
    }

    /// Create (or extend) a profile from a pasted pairing offer.
    pub fn add_from_offer(&self, offer: &ConnectionOfferV2, label: &str) -> Result<HostProfile> {
        let mut registry = self.registry.write();
        let now = Utc::now();

        let profile = registry
            .hosts
            .entry(offer.server_id.clone())
            .or_insert_with(|| HostProfile {
                server_id: offer.server_id.clone(),
                label: label.to_string(),
                connections: Vec::new(),
                preferred_connection_id: None,
                metadata: ProfileMetadata::default(),
                created_at: now,
                updated_at: now,
            });

        let relay_kind = ConnectionKind::Relay {
            relay_endpoint: offer.relay.endpoint.clone(),
            daemon_public_key_b64: offer.daemon_public_key_b64.clone(),
        };
        if !profile.connections.iter().any(|c| c.kind == relay_kind) {
            profile.connections.push(Connection {
                id: uuid::Uuid::new_v4().to_string(),
                kind: relay_kind,
            });
        }
        profile.updated_at = now;

        let snapshot = profile.clone();
        self.persist(&registry)?;
        Ok(snapshot)
    }

    /// Add a connection to an existing profile.
    pub fn add_connection(&self, server_id: &str, kind: ConnectionKind) -> Result<Connection> {
        let mut registry = self.registry.write();
        let profile = registry
            .hosts
            .get_mut(server_id)
            .ok_or_else(|| Error::BadRequest(format!("unknown host '{server_id}'")))?;
        let connection = Connection {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
        };
        profile.connections.push(connection.clone());
        profile.updated_at = Utc::now();
        self.persist(&registry)?;
        Ok(connection)
    }

    /// Store a preference document keyed by kind and server id.
    pub fn set_preference(
        &self,
        kind: &str,
        server_id: &str,
        doc: serde_json::Value,
    ) -> Result<()> {
        let mut registry = self.registry.write();
        registry
            .preferences
            .entry(kind.to_string())
            .or_default()
            .insert(server_id.to_string(), doc);
        self.persist(&registry)
    }

    pub fn preference(&self, kind: &str, server_id: &str) -> Option<serde_json::Value> {
        self.registry
            .read()
            .preferences
            .get(kind)
            .and_then(|by_server| by_server.get(server_id))
            .cloned()
    }

    /// Move a profile under a new server id after the daemon reported an
    /// authoritative id different from the stored one. Preferences keyed by
    /// the old id follow the rekey.
    pub fn rekey(&self, old_server_id: &str, new_server_id: &str) -> Result<bool> {
        if old_server_id == new_server_id {
            return Ok(false);
        }
        let mut registry = self.registry.write();
        let Some(mut profile) = registry.hosts.remove(old_server_id) else {
            return Ok(false);
        };

        profile.metadata.legacy_ids.push(old_server_id.to_string());
        profile.server_id = new_server_id.to_string();
        profile.updated_at = Utc::now();

        // A pre-existing entry under the new id is absorbed: its
        // connections are kept ahead of the rekeyed profile's.
        if let Some(existing) = registry.hosts.remove(new_server_id) {
            let mut merged = existing.connections;
            for conn in profile.connections {
                if !merged.iter().any(|c| c.kind == conn.kind) {
                    merged.push(conn);
                }
            }
            profile.connections = merged;
        }
        registry.hosts.insert(new_server_id.to_string(), profile);

        for by_server in registry.preferences.values_mut() {
            if let Some(doc) = by_server.remove(old_server_id) {
                by_server.entry(new_server_id.to_string()).or_insert(doc);
            }
        }

        self.persist(&registry)?;
        tracing::info!(
            old_server_id = %old_server_id,
            new_server_id = %new_server_id,
            "host profile rekeyed"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(&dir.path().join("hosts.json")).unwrap();
        (dir, store)
    }

    fn profile(server_id: &str) -> HostProfile {
        let now = Utc::now();
        HostProfile {
            server_id: server_id.into(),
            label: "workstation".into(),
            connections: vec![
                Connection {
                    id: "c-relay".into(),
                    kind: ConnectionKind::Relay {
                        relay_endpoint: "relay:7440".into(),
                        daemon_public_key_b64: "cGs".into(),
                    },
                },
                Connection {
                    id: "c-direct".into(),
                    kind: ConnectionKind::Direct {
                        endpoint: "10.0.0.5:7423".into(),
                    },
                },
            ],
            preferred_connection_id: None,
            metadata: ProfileMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn upsert_and_reload() {
        let (dir, store) = store();
        store.upsert(profile("srv_1")).unwrap();

        let reloaded = ProfileStore::open(&dir.path().join("hosts.json")).unwrap();
        let p = reloaded.get("srv_1").unwrap();
        assert_eq!(p.connections.len(), 2);
    }

    #[test]
    fn upsert_rejects_empty_connections() {
        let (_dir, store) = store();
        let mut p = profile("srv_1");
        p.connections.clear();
        assert!(store.upsert(p).is_err());
    }

    #[test]
    fn upsert_rejects_dangling_preferred() {
        let (_dir, store) = store();
        let mut p = profile("srv_1");
        p.preferred_connection_id = Some("missing".into());
        assert!(store.upsert(p).is_err());
    }

    #[test]
    fn candidate_order_prefers_direct() {
        let p = profile("srv_1");
        let order: Vec<&str> = p.candidate_order().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["c-direct", "c-relay"]);
    }

    #[test]
    fn candidate_order_honors_preferred_first() {
        let mut p = profile("srv_1");
        p.preferred_connection_id = Some("c-relay".into());
        let order: Vec<&str> = p.candidate_order().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["c-relay", "c-direct"]);
    }

    #[test]
    fn add_from_offer_creates_relay_connection() {
        let (_dir, store) = store();
        let offer = ConnectionOfferV2::new("srv_off".into(), "cGs".into(), "relay:7440".into());
        let p = store.add_from_offer(&offer, "laptop").unwrap();
        assert_eq!(p.connections.len(), 1);
        assert!(matches!(
            p.connections[0].kind,
            ConnectionKind::Relay { .. }
        ));

        // Idempotent for the same relay.
        let p = store.add_from_offer(&offer, "laptop").unwrap();
        assert_eq!(p.connections.len(), 1);
    }

    #[test]
    fn rekey_moves_profile_and_preferences() {
        let (_dir, store) = store();
        store.upsert(profile("legacy-daemon-id")).unwrap();
        store
            .set_preference(
                "create-agent-preferences",
                "legacy-daemon-id",
                serde_json::json!({"provider": "scripted"}),
            )
            .unwrap();

        assert!(store.rekey("legacy-daemon-id", "srv_real").unwrap());

        assert!(store.get("legacy-daemon-id").is_none());
        let p = store.get("srv_real").unwrap();
        assert_eq!(p.server_id, "srv_real");
        assert_eq!(p.metadata.legacy_ids, vec!["legacy-daemon-id"]);

        assert!(store
            .preference("create-agent-preferences", "legacy-daemon-id")
            .is_none());
        let doc = store
            .preference("create-agent-preferences", "srv_real")
            .unwrap();
        assert_eq!(doc["provider"], "scripted");
    }

    #[test]
    fn rekey_is_noop_for_same_or_unknown_id() {
        let (_dir, store) = store();
        store.upsert(profile("srv_1")).unwrap();
        assert!(!store.rekey("srv_1", "srv_1").unwrap());
        assert!(!store.rekey("ghost", "srv_2").unwrap());
    }

    #[test]
    fn rekey_merges_into_existing_entry() {
        let (_dir, store) = store();
        store.upsert(profile("old")).unwrap();
        let mut existing = profile("new");
        existing.connections.truncate(1);
        store.upsert(existing).unwrap();

        assert!(store.rekey("old", "new").unwrap());
        let merged = store.get("new").unwrap();
        // Relay from "new" + the distinct direct from "old"; the shared
        // relay kind deduplicates.
        assert_eq!(merged.connections.len(), 2);
        assert_eq!(merged.metadata.legacy_ids, vec!["old"]);
    }
}
