//! Process-global registry of managed agents.
//!
//! Sessions hold agent ids and query the manager; agents never hold session
//! references and publish only to subscribers. The agent map is mutated
//! under a short critical section; all fan-out happens outside the lock,
//! and run callbacks never await on storage (persistence is scheduled
//! asynchronously).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use paseo_domain::agent::{
    AgentConfig, AgentFilter, AgentLifecycle, AgentMode, AgentRecord, AgentSnapshot,
};
use paseo_domain::event::{AgentEvent, FinishState};
use paseo_domain::timeline::{PermissionOutcome, Timeline};
use paseo_domain::{Error, Result};
use paseo_providers::{AgentSession, ProviderRegistry};

use super::fanout::Fanout;
use super::permissions::PermissionStore;

/// Minimum identifier prefix length accepted by `resolve_identifier`.
const MIN_PREFIX_LEN: usize = 4;
/// Candidates reported on ambiguity.
const MAX_AMBIGUOUS_CANDIDATES: usize = 5;

#[derive(Debug, Clone, Copy)]
pub(crate) struct FinishProbe {
    pub lifecycle: AgentLifecycle,
    pub pending_permission: bool,
}

#[derive(Clone)]
pub(crate) struct ActiveRun {
    pub run_id: String,
    pub cancel: CancellationToken,
    pub done: watch::Receiver<bool>,
}

pub(crate) struct AgentState {
    pub record: AgentRecord,
    pub session: Option<Arc<dyn AgentSession>>,
    pub run: Option<ActiveRun>,
}

/// Daemon-side wrapper around one agent.
pub struct ManagedAgent {
    pub id: String,
    pub(crate) state: Mutex<AgentState>,
    /// Serializes run transitions (implicit cancel + start).
    pub(crate) run_gate: tokio::sync::Mutex<()>,
    pub(crate) finish_tx: watch::Sender<FinishProbe>,
}

impl ManagedAgent {
    fn new(record: AgentRecord, session: Option<Arc<dyn AgentSession>>) -> Arc<Self> {
        let lifecycle = record.lifecycle;
        let (finish_tx, _) = watch::channel(FinishProbe {
            lifecycle,
            pending_permission: false,
        });
        Arc::new(Self {
            id: record.id.clone(),
            state: Mutex::new(AgentState {
                record,
                session,
                run: None,
            }),
            run_gate: tokio::sync::Mutex::new(()),
            finish_tx,
        })
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        self.state.lock().record.snapshot()
    }

    pub fn timeline(&self) -> Timeline {
        self.state.lock().record.timeline.clone()
    }

    pub(crate) fn session(&self) -> Option<Arc<dyn AgentSession>> {
        self.state.lock().session.clone()
    }

    pub(crate) fn active_run(&self) -> Option<ActiveRun> {
        self.state.lock().run.clone()
    }
}

pub struct AgentManager {
    providers: Arc<ProviderRegistry>,
    storage: Arc<super::storage::AgentStorage>,
    pub(crate) fanout: Fanout,
    pub(crate) permissions: PermissionStore,
    agents: Mutex<HashMap<String, Arc<ManagedAgent>>>,
    /// De-duplicates concurrent `ensure_loaded` calls per agent.
    init_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Delete barrier: ids currently being removed. The async persistence
    /// hook refuses to re-create records racing with deletion.
    deleting: Arc<Mutex<HashSet<String>>>,
}

impl AgentManager {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        storage: Arc<super::storage::AgentStorage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            providers,
            storage,
            fanout: Fanout::new(),
            permissions: PermissionStore::new(),
            agents: Mutex::new(HashMap::new()),
            init_locks: Mutex::new(HashMap::new()),
            deleting: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Hydrate the registry from disk at boot. Records persisted mid-run
    /// come back idle; their runs did not survive the restart.
    pub fn boot(&self) -> Result<usize> {
        let records = self.storage.load_all()?;
        let count = records.len();
        let mut agents = self.agents.lock();
        for mut record in records {
            if record.lifecycle == AgentLifecycle::Running {
                record.lifecycle = AgentLifecycle::Idle;
            }
            agents.insert(record.id.clone(), ManagedAgent::new(record, None));
        }
        tracing::info!(agents = count, "agent registry hydrated");
        Ok(count)
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn get(&self, id: &str) -> Option<Arc<ManagedAgent>> {
        self.agents.lock().get(id).cloned()
    }

    pub fn list(&self, filter: &AgentFilter) -> Vec<AgentSnapshot> {
        let agents: Vec<Arc<ManagedAgent>> = self.agents.lock().values().cloned().collect();
        let mut out: Vec<AgentSnapshot> = agents
            .iter()
            .map(|a| a.snapshot())
            .filter(|s| filter.matches(s))
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Create a new agent. `cwd` must be absolute and exist.
    pub async fn create_agent(&self, config: AgentConfig) -> Result<Arc<ManagedAgent>> {
        if !config.cwd.is_absolute() {
            return Err(Error::BadRequest(format!(
                "cwd must be absolute: {}",
                config.cwd.display()
            )));
        }
        if !config.cwd.is_dir() {
            return Err(Error::BadRequest(format!(
                "cwd does not exist: {}",
                config.cwd.display()
            )));
        }

        let provider = self.providers.get(&config.provider)?;
        let session = provider
            .open_session(&config.cwd, config.model.as_deref(), None)
            .await?;
        let session: Arc<dyn AgentSession> = Arc::from(session);

        let id = uuid::Uuid::new_v4().to_string();
        let mut record = AgentRecord::new(id.clone(), config);
        record.persistence = session.persistence_handle();

        let agent = ManagedAgent::new(record.clone(), Some(session));
        self.agents.lock().insert(id.clone(), agent.clone());

        self.storage.upsert(&record).await?;
        self.publish_state(&agent);
        tracing::info!(agent_id = %id, provider = %record.config.provider, "agent created");
        Ok(agent)
    }

    /// Ensure an agent is loaded with a live provider session. Concurrent
    /// calls for the same id share one initialization.
    pub async fn ensure_loaded(&self, id: &str) -> Result<Arc<ManagedAgent>> {
        if let Some(agent) = self.get(id) {
            if agent.session().is_some() {
                return Ok(agent);
            }
        }

        let lock = {
            let mut locks = self.init_locks.lock();
            locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        // Someone else may have finished the resume while we waited.
        if let Some(agent) = self.get(id) {
            if agent.session().is_some() {
                return Ok(agent);
            }
        }

        let (config, persistence) = match self.get(id) {
            Some(agent) => {
                let state = agent.state.lock();
                (state.record.config.clone(), state.record.persistence.clone())
            }
            None => {
                let record = self
                    .storage
                    .load(id)?
                    .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
                let config = record.config.clone();
                let persistence = record.persistence.clone();
                self.agents
                    .lock()
                    .entry(id.to_string())
                    .or_insert_with(|| ManagedAgent::new(record, None));
                (config, persistence)
            }
        };

        let provider = self.providers.get(&config.provider)?;
        let session = provider
            .open_session(&config.cwd, config.model.as_deref(), persistence.as_deref())
            .await?;
        let session: Arc<dyn AgentSession> = Arc::from(session);

        let agent = self
            .get(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        {
            let mut state = agent.state.lock();
            state.record.persistence = session.persistence_handle();
            state.session = Some(session);
        }
        tracing::info!(agent_id = %id, "agent session resumed");
        Ok(agent)
    }

    /// Resolve an identifier: exact id, unique prefix (≥ 4 chars), or exact
    /// title.
    pub fn resolve_identifier(&self, identifier: &str) -> Result<String> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(Error::InvalidIdentifier("empty identifier".into()));
        }

        let snapshots: Vec<AgentSnapshot> = {
            let agents = self.agents.lock();
            agents.values().map(|a| a.snapshot()).collect()
        };

        if snapshots.iter().any(|s| s.id == identifier) {
            return Ok(identifier.to_string());
        }

        if identifier.len() >= MIN_PREFIX_LEN {
            let matches: Vec<&AgentSnapshot> = snapshots
                .iter()
                .filter(|s| s.id.starts_with(identifier))
                .collect();
            match matches.len() {
                0 => {}
                1 => return Ok(matches[0].id.clone()),
                _ => {
                    return Err(Error::AmbiguousIdentifier {
                        identifier: identifier.to_string(),
                        candidates: short_ids(&matches),
                    })
                }
            }
        }

        let by_title: Vec<&AgentSnapshot> = snapshots
            .iter()
            .filter(|s| s.title.as_deref() == Some(identifier))
            .collect();
        match by_title.len() {
            0 => Err(Error::AgentNotFound(identifier.to_string())),
            1 => Ok(by_title[0].id.clone()),
            _ => Err(Error::AmbiguousIdentifier {
                identifier: identifier.to_string(),
                candidates: short_ids(&by_title),
            }),
        }
    }

    /// Cancel the active run, if any. With `wait`, blocks until the run has
    /// drained (bounded).
    pub async fn cancel_run(&self, id: &str, wait: bool) -> Result<bool> {
        let agent = self
            .get(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;

        let Some(run) = agent.active_run() else {
            return Ok(false);
        };
        if let Some(session) = agent.session() {
            let _ = session.cancel().await;
        }
        run.cancel.cancel();

        if wait {
            let mut done = run.done.clone();
            let _ = tokio::time::timeout(Duration::from_secs(10), async {
                while !*done.borrow() {
                    if done.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await;
        }
        Ok(true)
    }

    /// Forward a permission resolution to the provider and record it.
    pub async fn respond_permission(
        &self,
        id: &str,
        request_id: &str,
        accept: bool,
    ) -> Result<bool> {
        let agent = self
            .get(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;

        let Some(_pending) = self.permissions.take(id, request_id) else {
            return Ok(false);
        };
        let session = agent
            .session()
            .ok_or_else(|| Error::BadRequest("agent has no live session".into()))?;
        session.respond_to_permission(request_id, accept).await?;

        let outcome = if accept {
            PermissionOutcome::Accepted
        } else {
            PermissionOutcome::Denied
        };
        {
            let mut state = agent.state.lock();
            state.record.timeline.resolve_permission(request_id, outcome);
            if !self.permissions.has_pending(id) {
                state.record.attention = None;
            }
            state.record.updated_at = Utc::now();
        }

        self.fanout.publish(&AgentEvent::PermissionResolved {
            agent_id: id.to_string(),
            request_id: request_id.to_string(),
            outcome,
        });
        self.publish_state(&agent);
        self.persist_async(&agent);
        Ok(true)
    }

    /// Long-poll for a terminal state: `idle | permission | error | timeout`.
    pub async fn wait_for_finish(&self, id: &str, timeout: Duration) -> Result<FinishState> {
        let agent = self
            .get(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        let mut rx = agent.finish_tx.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let probe = *rx.borrow();
            if let Some(state) = classify_finish(probe) {
                return Ok(state);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(FinishState::Timeout);
            }
            match tokio::time::timeout(remaining, rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return Ok(FinishState::Timeout),
            }
        }
    }

    pub async fn set_mode(&self, id: &str, mode: AgentMode) -> Result<AgentSnapshot> {
        let agent = self
            .get(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        {
            let mut state = agent.state.lock();
            state.record.config.mode = mode;
            state.record.updated_at = Utc::now();
        }
        self.publish_state(&agent);
        self.persist_async(&agent);
        Ok(agent.snapshot())
    }

    pub async fn archive(&self, id: &str) -> Result<()> {
        let agent = self
            .get(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        self.cancel_run(id, true).await?;
        {
            let mut state = agent.state.lock();
            state.record.archived = true;
            state.record.updated_at = Utc::now();
        }
        self.publish_state(&agent);
        self.persist_async(&agent);
        Ok(())
    }

    pub async fn clear_attention(&self, id: &str) -> Result<AgentSnapshot> {
        let agent = self
            .get(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        {
            let mut state = agent.state.lock();
            state.record.attention = None;
            state.record.updated_at = Utc::now();
        }
        self.publish_state(&agent);
        self.persist_async(&agent);
        Ok(agent.snapshot())
    }

    /// Append an item to an agent's timeline outside a provider run (e.g.
    /// worktree setup progress).
    pub fn append_timeline_item(
        &self,
        id: &str,
        item: paseo_domain::timeline::TimelineItem,
    ) -> Result<()> {
        let agent = self
            .get(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        {
            let mut state = agent.state.lock();
            state.record.timeline.push(item);
            state.record.updated_at = Utc::now();
        }
        self.publish_state(&agent);
        self.persist_async(&agent);
        Ok(())
    }

    /// Update a timeline tool call in place (status transitions only move
    /// forward).
    pub fn update_timeline_tool_call(
        &self,
        id: &str,
        call_id: &str,
        status: paseo_domain::timeline::ToolCallStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<bool> {
        let agent = self
            .get(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        let updated = {
            let mut state = agent.state.lock();
            let updated = state
                .record
                .timeline
                .update_tool_call(call_id, status, output, error);
            state.record.updated_at = Utc::now();
            updated
        };
        self.publish_state(&agent);
        self.persist_async(&agent);
        Ok(updated)
    }

    /// Apply generated metadata. Non-fatal path: callers ignore errors.
    pub fn apply_metadata(&self, id: &str, title: Option<String>, branch_name: Option<String>) {
        let Some(agent) = self.get(id) else { return };
        {
            let mut state = agent.state.lock();
            if let Some(title) = title {
                state.record.title = Some(title);
            }
            if let Some(branch) = branch_name {
                state.record.branch_name = Some(branch);
            }
            state.record.updated_at = Utc::now();
        }
        self.publish_state(&agent);
        self.persist_async(&agent);
    }

    /// Close and remove an agent. The delete barrier keeps the async
    /// persistence hook from resurrecting the record.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let agent = self
            .get(id)
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;

        self.deleting.lock().insert(id.to_string());
        let result = async {
            self.cancel_run(id, true).await?;
            self.permissions.clear_agent(id);
            if let Some(session) = agent.session() {
                let _ = session.close().await;
            }
            self.agents.lock().remove(id);
            self.storage.remove(id).await?;
            Ok::<(), Error>(())
        }
        .await;
        self.deleting.lock().remove(id);
        result?;

        self.fanout.publish(&AgentEvent::AgentRemoved {
            agent_id: id.to_string(),
        });
        tracing::info!(agent_id = %id, "agent deleted");
        Ok(())
    }

    /// Close and remove every agent whose cwd sits inside `root`. Used by
    /// worktree archiving. Returns the removed agent ids.
    pub async fn close_agents_under(&self, root: &Path) -> Result<Vec<String>> {
        let ids: Vec<String> = {
            let agents = self.agents.lock();
            agents
                .values()
                .filter(|a| a.state.lock().record.config.cwd.starts_with(root))
                .map(|a| a.id.clone())
                .collect()
        };
        for id in &ids {
            self.delete(id).await?;
        }
        Ok(ids)
    }

    /// Subscribe to agent events. With `replay`, current snapshots are
    /// queued before any live event.
    pub fn subscribe_events(
        &self,
        replay: bool,
    ) -> (u64, tokio::sync::mpsc::Receiver<AgentEvent>) {
        let (id, rx) = self.fanout.subscribe();
        if replay {
            for snapshot in self.list(&AgentFilter {
                include_archived: true,
                ..AgentFilter::default()
            }) {
                // Replay goes through the same bounded path as live events.
                self.fanout.publish_to(id, &AgentEvent::AgentState { agent: snapshot });
            }
        }
        (id, rx)
    }

    pub fn unsubscribe_events(&self, id: u64) {
        self.fanout.unsubscribe(id);
    }

    // ── Internals shared with run.rs ────────────────────────────────

    pub(crate) fn publish_state(&self, agent: &Arc<ManagedAgent>) {
        let snapshot = agent.snapshot();
        let probe = FinishProbe {
            lifecycle: snapshot.lifecycle,
            pending_permission: self.permissions.has_pending(&snapshot.id),
        };
        // send_replace: the probe must update even with no waiter attached,
        // so a later wait_for_finish sees the current state.
        agent.finish_tx.send_replace(probe);
        self.fanout.publish(&AgentEvent::AgentState { agent: snapshot });
    }

    /// Schedule a persistence upsert without blocking the caller. Honors
    /// the delete barrier.
    pub(crate) fn persist_async(&self, agent: &Arc<ManagedAgent>) {
        let storage = self.storage.clone();
        let deleting = self.deleting.clone();
        let agent = agent.clone();
        tokio::spawn(async move {
            if deleting.lock().contains(&agent.id) {
                return;
            }
            let record = agent.state.lock().record.clone();
            if let Err(e) = storage.upsert(&record).await {
                tracing::warn!(agent_id = %agent.id, error = %e, "agent persist failed");
            }
        });
    }
}

// `send_message` hands an owned manager handle to the spawned run task.
impl AgentManager {
    pub async fn send_message(
        self: &Arc<Self>,
        id: &str,
        prompt: paseo_providers::AgentPrompt,
    ) -> Result<String> {
        let agent = self.ensure_loaded(id).await?;
        super::run::start_run(self, agent, prompt).await
    }
}

fn short_ids(matches: &[&AgentSnapshot]) -> Vec<String> {
    matches
        .iter()
        .take(MAX_AMBIGUOUS_CANDIDATES)
        .map(|s| {
            let end = s
                .id
                .char_indices()
                .nth(8)
                .map(|(i, _)| i)
                .unwrap_or(s.id.len());
            s.id[..end].to_string()
        })
        .collect()
}

fn classify_finish(probe: FinishProbe) -> Option<FinishState> {
    if probe.pending_permission {
        return Some(FinishState::Permission);
    }
    match probe.lifecycle {
        AgentLifecycle::Idle => Some(FinishState::Idle),
        AgentLifecycle::Error => Some(FinishState::Error),
        AgentLifecycle::Running => None,
    }
}
