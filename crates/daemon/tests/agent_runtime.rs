//! Agent-manager behavior with the scripted provider: run lifecycle,
//! implicit cancel, permissions, identifier resolution, and persistence
//! across restarts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use paseo_daemon::agents::{AgentManager, AgentStorage};
use paseo_domain::agent::{AgentConfig, AgentFilter, AgentLifecycle, AgentMode, AgentRecord};
use paseo_domain::event::{AgentEvent, FinishState, ProviderEvent, RunTerminal};
use paseo_domain::timeline::{PermissionOutcome, TimelineItem, ToolCallStatus};
use paseo_domain::Error;
use paseo_providers::scripted::ScriptStep;
use paseo_providers::{AgentPrompt, ProviderRegistry, ScriptedProvider};

struct Harness {
    home: tempfile::TempDir,
    workdir: tempfile::TempDir,
    manager: Arc<AgentManager>,
    provider: Arc<ScriptedProvider>,
}

fn harness() -> Harness {
    let home = tempfile::tempdir().unwrap();
    let workdir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());
    let storage = Arc::new(AgentStorage::open(&home.path().join("agents")).unwrap());
    let manager = AgentManager::new(Arc::new(registry), storage);
    Harness {
        home,
        workdir,
        manager,
        provider,
    }
}

fn agent_config(cwd: &Path) -> AgentConfig {
    AgentConfig {
        provider: "scripted".into(),
        model: None,
        cwd: cwd.to_path_buf(),
        mode: AgentMode::Default,
        labels: HashMap::new(),
    }
}

async fn next_event(rx: &mut tokio::sync::mpsc::Receiver<AgentEvent>) -> AgentEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for agent event")
        .expect("event channel closed")
}

async fn wait_run_ended(
    rx: &mut tokio::sync::mpsc::Receiver<AgentEvent>,
    run_id: &str,
) -> RunTerminal {
    loop {
        if let AgentEvent::RunEnded {
            run_id: rid,
            status,
            ..
        } = next_event(rx).await
        {
            if rid == run_id {
                return status;
            }
        }
    }
}

#[tokio::test]
async fn run_streams_to_idle() {
    let h = harness();
    h.provider.push_script(vec![
        ProviderEvent::TextDelta { text: "hel".into() }.into(),
        ProviderEvent::TextDelta { text: "lo".into() }.into(),
        ProviderEvent::Finish { reason: None }.into(),
    ]);

    let agent = h
        .manager
        .create_agent(agent_config(h.workdir.path()))
        .await
        .unwrap();
    let (_sub, mut rx) = h.manager.subscribe_events(false);

    let run_id = h
        .manager
        .send_message(&agent.id, AgentPrompt::text("say hello"))
        .await
        .unwrap();

    assert_eq!(wait_run_ended(&mut rx, &run_id).await, RunTerminal::Idle);
    assert_eq!(
        h.manager
            .wait_for_finish(&agent.id, Duration::from_secs(5))
            .await
            .unwrap(),
        FinishState::Idle
    );

    let timeline = agent.timeline();
    match &timeline.items[..] {
        [TimelineItem::UserMessage { text, .. }, TimelineItem::AssistantText { text: reply, .. }] =>
        {
            assert_eq!(text, "say hello");
            // Deltas merge into one assistant item.
            assert_eq!(reply, "hello");
        }
        other => panic!("unexpected timeline: {other:?}"),
    }
}

#[tokio::test]
async fn new_prompt_implicitly_cancels_previous_run() {
    let h = harness();
    // Run A parks on a tool call; run B is trivial.
    h.provider.push_script(vec![
        ProviderEvent::ToolCall {
            call_id: "t1".into(),
            name: "shell".into(),
            input: serde_json::json!({"command": "sleep 60"}),
        }
        .into(),
        ScriptStep::Pause(Duration::from_secs(60)),
        ProviderEvent::Finish { reason: None }.into(),
    ]);
    h.provider
        .push_script(ScriptedProvider::trivial_script("done"));

    let agent = h
        .manager
        .create_agent(agent_config(h.workdir.path()))
        .await
        .unwrap();
    let (_sub, mut rx) = h.manager.subscribe_events(false);

    let run_a = h
        .manager
        .send_message(&agent.id, AgentPrompt::text("task A"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let run_b = h
        .manager
        .send_message(&agent.id, AgentPrompt::text("task B"))
        .await
        .unwrap();
    assert_ne!(run_a, run_b);

    assert_eq!(wait_run_ended(&mut rx, &run_b).await, RunTerminal::Idle);

    let timeline = agent.timeline();
    let user_messages: Vec<&str> = timeline
        .items
        .iter()
        .filter_map(|i| match i {
            TimelineItem::UserMessage { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(user_messages, vec!["task A", "task B"]);

    // A's in-flight tool call was finalized as failed/cancelled.
    match timeline
        .items
        .iter()
        .find(|i| i.call_id() == Some("t1"))
        .expect("tool call missing")
    {
        TimelineItem::ToolCall { status, error, .. } => {
            assert_eq!(*status, ToolCallStatus::Failed);
            assert_eq!(error.as_deref(), Some("cancelled"));
        }
        _ => unreachable!(),
    }

    assert_eq!(
        h.manager
            .wait_for_finish(&agent.id, Duration::from_secs(5))
            .await
            .unwrap(),
        FinishState::Idle
    );
}

#[tokio::test]
async fn cancelled_run_counts_started_equals_ended() {
    let h = harness();
    h.provider.push_script(vec![
        ProviderEvent::TextDelta { text: "x".into() }.into(),
        ScriptStep::Pause(Duration::from_secs(60)),
        ProviderEvent::Finish { reason: None }.into(),
    ]);
    h.provider
        .push_script(ScriptedProvider::trivial_script("y"));

    let agent = h
        .manager
        .create_agent(agent_config(h.workdir.path()))
        .await
        .unwrap();
    let (_sub, mut rx) = h.manager.subscribe_events(false);

    let run_a = h
        .manager
        .send_message(&agent.id, AgentPrompt::text("A"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let run_b = h
        .manager
        .send_message(&agent.id, AgentPrompt::text("B"))
        .await
        .unwrap();

    // Collect events until B ends; then pair up starts and ends.
    let mut started = Vec::new();
    let mut ended = Vec::new();
    loop {
        match next_event(&mut rx).await {
            AgentEvent::RunStarted { run_id, .. } => started.push(run_id),
            AgentEvent::RunEnded { run_id, status, .. } => {
                let is_b = run_id == run_b;
                ended.push((run_id, status));
                if is_b {
                    break;
                }
            }
            _ => {}
        }
    }
    assert_eq!(started, vec![run_a.clone(), run_b.clone()]);
    assert_eq!(ended.len(), 2);
    assert_eq!(ended[0], (run_a, RunTerminal::Cancelled));
    assert_eq!(ended[1], (run_b, RunTerminal::Idle));
}

#[tokio::test]
async fn permission_gates_block_and_resolve() {
    let h = harness();
    h.provider.push_script(vec![
        ProviderEvent::PermissionRequest {
            request_id: "p1".into(),
            tool_name: "shell".into(),
            action: serde_json::json!({"command": "rm -rf build"}),
        }
        .into(),
        ProviderEvent::TextDelta {
            text: "removed".into(),
        }
        .into(),
        ProviderEvent::Finish { reason: None }.into(),
    ]);

    let agent = h
        .manager
        .create_agent(agent_config(h.workdir.path()))
        .await
        .unwrap();
    h.manager
        .send_message(&agent.id, AgentPrompt::text("clean the build dir"))
        .await
        .unwrap();

    // The run blocks on the gate.
    assert_eq!(
        h.manager
            .wait_for_finish(&agent.id, Duration::from_millis(500))
            .await
            .unwrap(),
        FinishState::Permission
    );
    assert!(agent.snapshot().attention.is_some());

    // Resolve exactly once.
    assert!(h
        .manager
        .respond_permission(&agent.id, "p1", true)
        .await
        .unwrap());
    assert!(!h
        .manager
        .respond_permission(&agent.id, "p1", true)
        .await
        .unwrap());

    assert_eq!(
        h.manager
            .wait_for_finish(&agent.id, Duration::from_secs(5))
            .await
            .unwrap(),
        FinishState::Idle
    );

    let timeline = agent.timeline();
    let outcome = timeline.items.iter().find_map(|i| match i {
        TimelineItem::PermissionRequest { outcome, .. } => *outcome,
        _ => None,
    });
    assert_eq!(outcome, Some(PermissionOutcome::Accepted));
    assert!(agent.snapshot().attention.is_none());
}

#[tokio::test]
async fn denied_permission_ends_the_run() {
    let h = harness();
    h.provider.push_script(vec![
        ProviderEvent::PermissionRequest {
            request_id: "p1".into(),
            tool_name: "shell".into(),
            action: serde_json::json!({}),
        }
        .into(),
        ProviderEvent::TextDelta {
            text: "never sent".into(),
        }
        .into(),
    ]);

    let agent = h
        .manager
        .create_agent(agent_config(h.workdir.path()))
        .await
        .unwrap();
    h.manager
        .send_message(&agent.id, AgentPrompt::text("dangerous thing"))
        .await
        .unwrap();

    assert_eq!(
        h.manager
            .wait_for_finish(&agent.id, Duration::from_millis(500))
            .await
            .unwrap(),
        FinishState::Permission
    );
    h.manager
        .respond_permission(&agent.id, "p1", false)
        .await
        .unwrap();
    assert_eq!(
        h.manager
            .wait_for_finish(&agent.id, Duration::from_secs(5))
            .await
            .unwrap(),
        FinishState::Idle
    );
    // The gated text never streamed.
    let timeline = agent.timeline();
    assert!(!timeline.items.iter().any(|i| matches!(
        i,
        TimelineItem::AssistantText { text, .. } if text.contains("never sent")
    )));
}

#[tokio::test]
async fn identifier_resolution_rules() {
    let h = harness();
    let storage = AgentStorage::open(&h.home.path().join("agents")).unwrap();
    for (id, title) in [
        ("ab12cdef-0000", Some("fix dialer")),
        ("ab12efff-1111", Some("relay GC")),
        ("zz99aaaa-2222", Some("fix dialer")),
    ] {
        let mut record = AgentRecord::new(id.into(), agent_config(h.workdir.path()));
        record.title = title.map(str::to_string);
        storage.upsert(&record).await.unwrap();
    }
    h.manager.boot().unwrap();

    // Exact id.
    assert_eq!(
        h.manager.resolve_identifier("ab12cdef-0000").unwrap(),
        "ab12cdef-0000"
    );
    // Unique prefix.
    assert_eq!(
        h.manager.resolve_identifier("ab12c").unwrap(),
        "ab12cdef-0000"
    );
    // Ambiguous prefix carries both short ids.
    match h.manager.resolve_identifier("ab12").unwrap_err() {
        Error::AmbiguousIdentifier { candidates, .. } => {
            let mut candidates = candidates;
            candidates.sort();
            assert_eq!(candidates, vec!["ab12cdef", "ab12efff"]);
        }
        other => panic!("expected ambiguity, got {other}"),
    }
    // Unique title.
    assert_eq!(
        h.manager.resolve_identifier("relay GC").unwrap(),
        "ab12efff-1111"
    );
    // Ambiguous title.
    assert!(matches!(
        h.manager.resolve_identifier("fix dialer"),
        Err(Error::AmbiguousIdentifier { .. })
    ));
    // Empty and unknown.
    assert!(matches!(
        h.manager.resolve_identifier("  "),
        Err(Error::InvalidIdentifier(_))
    ));
    assert!(matches!(
        h.manager.resolve_identifier("no-such-agent"),
        Err(Error::AgentNotFound(_))
    ));
}

#[tokio::test]
async fn records_survive_a_restart() {
    let h = harness();
    h.provider
        .push_script(ScriptedProvider::trivial_script("persisted"));

    let agent = h
        .manager
        .create_agent(agent_config(h.workdir.path()))
        .await
        .unwrap();
    h.manager
        .send_message(&agent.id, AgentPrompt::text("remember me"))
        .await
        .unwrap();
    h.manager
        .wait_for_finish(&agent.id, Duration::from_secs(5))
        .await
        .unwrap();
    // Let the async persistence hook land.
    tokio::time::sleep(Duration::from_millis(300)).await;

    // A fresh manager over the same home sees the same agent.
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let mut registry = ProviderRegistry::new();
    registry.register(provider);
    let storage = Arc::new(AgentStorage::open(&h.home.path().join("agents")).unwrap());
    let restarted = AgentManager::new(Arc::new(registry), storage);
    restarted.boot().unwrap();

    let reloaded = restarted.get(&agent.id).expect("agent lost across restart");
    let snapshot = reloaded.snapshot();
    assert_eq!(snapshot.lifecycle, AgentLifecycle::Idle);
    assert!(snapshot.timeline_len >= 2);

    let resumed = restarted.ensure_loaded(&agent.id).await.unwrap();
    assert!(resumed.timeline().items.iter().any(|i| matches!(
        i,
        TimelineItem::UserMessage { text, .. } if text == "remember me"
    )));
}

#[tokio::test]
async fn delete_removes_agent_and_record() {
    let h = harness();
    let agent = h
        .manager
        .create_agent(agent_config(h.workdir.path()))
        .await
        .unwrap();
    let (_sub, mut rx) = h.manager.subscribe_events(false);

    h.manager.delete(&agent.id).await.unwrap();
    assert!(h.manager.get(&agent.id).is_none());

    let storage = AgentStorage::open(&h.home.path().join("agents")).unwrap();
    // The delete barrier kept the async persistence hook from
    // resurrecting the record.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(storage.load(&agent.id).unwrap().is_none());

    loop {
        if let AgentEvent::AgentRemoved { agent_id } = next_event(&mut rx).await {
            assert_eq!(agent_id, agent.id);
            break;
        }
    }
}

#[tokio::test]
async fn close_agents_under_scopes_by_path() {
    let h = harness();
    let other_workdir = tempfile::tempdir().unwrap();

    let inside = h
        .manager
        .create_agent(agent_config(h.workdir.path()))
        .await
        .unwrap();
    let outside = h
        .manager
        .create_agent(agent_config(other_workdir.path()))
        .await
        .unwrap();

    let closed = h
        .manager
        .close_agents_under(h.workdir.path())
        .await
        .unwrap();
    assert_eq!(closed, vec![inside.id.clone()]);
    assert!(h.manager.get(&inside.id).is_none());
    assert!(h.manager.get(&outside.id).is_some());
}

#[tokio::test]
async fn wait_for_finish_times_out_while_running() {
    let h = harness();
    h.provider.push_script(vec![
        ScriptStep::Pause(Duration::from_secs(60)),
        ProviderEvent::Finish { reason: None }.into(),
    ]);

    let agent = h
        .manager
        .create_agent(agent_config(h.workdir.path()))
        .await
        .unwrap();
    h.manager
        .send_message(&agent.id, AgentPrompt::text("stall"))
        .await
        .unwrap();

    assert_eq!(
        h.manager
            .wait_for_finish(&agent.id, Duration::from_millis(300))
            .await
            .unwrap(),
        FinishState::Timeout
    );

    assert!(h.manager.cancel_run(&agent.id, true).await.unwrap());
    assert_eq!(agent.snapshot().lifecycle, AgentLifecycle::Idle);
}

#[tokio::test]
async fn fetch_after_subscribe_is_a_superset() {
    let h = harness();
    let agent = h
        .manager
        .create_agent(agent_config(h.workdir.path()))
        .await
        .unwrap();

    // Subscribe with replay, then list with the same (default) filter.
    let (_sub, mut rx) = h.manager.subscribe_events(true);
    let listed: Vec<String> = h
        .manager
        .list(&AgentFilter::default())
        .into_iter()
        .map(|s| s.id)
        .collect();

    let replayed = next_event(&mut rx).await;
    assert!(listed.contains(&replayed.agent_id().to_string()));
    assert_eq!(replayed.agent_id(), agent.id);
}
