//! Pending permission requests, indexed by `(agent_id, request_id)`.
//!
//! The store tracks metadata for attention flags and wait-for-finish; the
//! actual gate lives in the provider session, which blocks the run until
//! `respond_to_permission` resolves it. Each request resolves exactly once.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// A provider-originated gate blocking a tool call.
#[derive(Debug, Clone, Serialize)]
pub struct PendingPermission {
    pub agent_id: String,
    pub request_id: String,
    pub tool_name: String,
    pub action: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub struct PermissionStore {
    pending: Mutex<HashMap<(String, String), PendingPermission>>,
}

impl PermissionStore {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, permission: PendingPermission) {
        let key = (
            permission.agent_id.clone(),
            permission.request_id.clone(),
        );
        self.pending.lock().insert(key, permission);
    }

    /// Take a pending request for resolution. `None` when it was never
    /// pending or already resolved.
    pub fn take(&self, agent_id: &str, request_id: &str) -> Option<PendingPermission> {
        self.pending
            .lock()
            .remove(&(agent_id.to_string(), request_id.to_string()))
    }

    pub fn has_pending(&self, agent_id: &str) -> bool {
        self.pending.lock().keys().any(|(aid, _)| aid == agent_id)
    }

    pub fn list_for(&self, agent_id: &str) -> Vec<PendingPermission> {
        self.pending
            .lock()
            .values()
            .filter(|p| p.agent_id == agent_id)
            .cloned()
            .collect()
    }

    /// Drop every pending request for an agent (run cancelled or agent
    /// removed). Returns the dropped request ids.
    pub fn clear_agent(&self, agent_id: &str) -> Vec<String> {
        let mut pending = self.pending.lock();
        let keys: Vec<(String, String)> = pending
            .keys()
            .filter(|(aid, _)| aid == agent_id)
            .cloned()
            .collect();
        keys.iter().for_each(|k| {
            pending.remove(k);
        });
        keys.into_iter().map(|(_, rid)| rid).collect()
    }
}

impl Default for PermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(agent: &str, req: &str) -> PendingPermission {
        PendingPermission {
            agent_id: agent.into(),
            request_id: req.into(),
            tool_name: "shell".into(),
            action: serde_json::json!({"command": "true"}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn take_resolves_exactly_once() {
        let store = PermissionStore::new();
        store.insert(pending("a1", "p1"));

        assert!(store.has_pending("a1"));
        assert!(store.take("a1", "p1").is_some());
        assert!(store.take("a1", "p1").is_none());
        assert!(!store.has_pending("a1"));
    }

    #[test]
    fn clear_agent_scopes_by_agent() {
        let store = PermissionStore::new();
        store.insert(pending("a1", "p1"));
        store.insert(pending("a1", "p2"));
        store.insert(pending("a2", "p3"));

        let mut dropped = store.clear_agent("a1");
        dropped.sort();
        assert_eq!(dropped, vec!["p1", "p2"]);
        assert!(store.has_pending("a2"));
    }
}
