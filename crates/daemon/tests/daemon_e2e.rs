//! Wire-level daemon behavior: handshake, duplicate request ids,
//! identifier ambiguity, archive refusal, agent streaming over a direct
//! connection, and the relay path end to end.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use paseo_client::channel::{dial_direct, dial_relay, DialedChannel};
use paseo_daemon::agents::AgentStorage;
use paseo_daemon::{server, uplink, Daemon};
use paseo_domain::agent::{AgentConfig, AgentFilter, AgentMode, AgentRecord};
use paseo_domain::error::{CheckoutErrorCode, ErrorCode};
use paseo_domain::event::{AgentEvent, FinishState, RunTerminal};
use paseo_protocol::session::{ClientMessage, ServerMessage};
use paseo_protocol::types::{AgentUpdate, CreateAgentParams};
use paseo_providers::{ProviderRegistry, ScriptedProvider};
use paseo_relay::{RelayConfig, RelayState};

struct TestDaemon {
    _home: tempfile::TempDir,
    workdir: tempfile::TempDir,
    daemon: Daemon,
    addr: std::net::SocketAddr,
    shutdown: CancellationToken,
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_daemon(relay_endpoint: Option<String>, seed: &[AgentRecord]) -> TestDaemon {
    let home = tempfile::tempdir().unwrap();
    let workdir = tempfile::tempdir().unwrap();

    if !seed.is_empty() {
        let storage = AgentStorage::open(&home.path().join("agents")).unwrap();
        for record in seed {
            storage.upsert(record).await.unwrap();
        }
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = paseo_domain::config::DaemonConfig {
        paseo_home: home.path().to_path_buf(),
        listen: addr.to_string(),
        relay_endpoint: relay_endpoint.clone(),
        cors_origins: vec![],
        server_id_override: None,
    };

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(ScriptedProvider::new(vec![])));

    let shutdown = CancellationToken::new();
    let daemon = Daemon::build(config, Arc::new(registry), shutdown.clone()).unwrap();

    {
        let daemon = daemon.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = server::serve_on(daemon, listener, shutdown).await;
        });
    }
    if relay_endpoint.is_some() {
        let daemon = daemon.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { uplink::run_uplink(daemon, shutdown).await });
    }

    TestDaemon {
        _home: home,
        workdir,
        daemon,
        addr,
        shutdown,
    }
}

async fn connect(td: &TestDaemon) -> DialedChannel {
    dial_direct("test-conn", &td.addr.to_string(), Duration::from_secs(5))
        .await
        .expect("direct dial failed")
}

async fn next_msg(channel: &mut DialedChannel) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(10), channel.recv())
        .await
        .expect("timed out waiting for server message")
        .expect("channel closed")
}

async fn wait_for(
    channel: &mut DialedChannel,
    mut pred: impl FnMut(&ServerMessage) -> bool,
) -> ServerMessage {
    loop {
        let msg = next_msg(channel).await;
        if pred(&msg) {
            return msg;
        }
    }
}

fn seed_record(id: &str, title: Option<&str>) -> AgentRecord {
    let mut record = AgentRecord::new(
        id.into(),
        AgentConfig {
            provider: "scripted".into(),
            model: None,
            cwd: Path::new("/tmp").to_path_buf(),
            mode: AgentMode::Default,
            labels: Default::default(),
        },
    );
    record.title = title.map(str::to_string);
    record
}

#[tokio::test]
async fn handshake_reports_authoritative_server_id() {
    let td = start_daemon(None, &[]).await;
    let channel = connect(&td).await;
    assert_eq!(channel.server_id, td.daemon.identity.server_id);
    assert!(channel.server_id.starts_with("srv_"));
}

#[tokio::test]
async fn duplicate_request_ids_are_rejected() {
    let td = start_daemon(None, &[]).await;
    let mut channel = connect(&td).await;

    for _ in 0..2 {
        channel
            .send(ClientMessage::FetchAgentsRequest {
                request_id: "r-dup".into(),
                filter: AgentFilter::default(),
            })
            .await
            .unwrap();
    }

    let mut ok = 0;
    let mut dup_errors = 0;
    for _ in 0..2 {
        match next_msg(&mut channel).await {
            ServerMessage::FetchAgentsResponse { request_id, .. } => {
                assert_eq!(request_id, "r-dup");
                ok += 1;
            }
            ServerMessage::ErrorResponse { request_id, error } => {
                assert_eq!(request_id, "r-dup");
                assert_eq!(error.code, ErrorCode::DuplicateRequestId);
                dup_errors += 1;
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
    assert_eq!((ok, dup_errors), (1, 1));
}

#[tokio::test]
async fn ambiguous_prefix_lists_candidates() {
    let td = start_daemon(
        None,
        &[
            seed_record("ab12cdef-0000", None),
            seed_record("ab12efff-1111", None),
        ],
    )
    .await;
    let mut channel = connect(&td).await;

    channel
        .send(ClientMessage::FetchAgentRequest {
            request_id: "r1".into(),
            agent_id: "ab12".into(),
        })
        .await
        .unwrap();

    match next_msg(&mut channel).await {
        ServerMessage::ErrorResponse { request_id, error } => {
            assert_eq!(request_id, "r1");
            assert_eq!(error.code, ErrorCode::AmbiguousIdentifier);
            let mut candidates = error.candidates;
            candidates.sort();
            assert_eq!(candidates, vec!["ab12cdef", "ab12efff"]);
        }
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn archive_refuses_non_paseo_paths() {
    let td = start_daemon(None, &[]).await;
    let mut channel = connect(&td).await;

    channel
        .send(ClientMessage::PaseoWorktreeArchiveRequest {
            request_id: "r1".into(),
            worktree_path: Path::new("/tmp/notpaseo").to_path_buf(),
        })
        .await
        .unwrap();

    match next_msg(&mut channel).await {
        ServerMessage::PaseoWorktreeArchiveResponse {
            request_id,
            success,
            error,
        } => {
            assert_eq!(request_id, "r1");
            assert!(!success);
            assert_eq!(error.unwrap().code, CheckoutErrorCode::NotAllowed);
        }
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn create_subscribe_and_stream_a_run() {
    let td = start_daemon(None, &[]).await;
    let mut channel = connect(&td).await;

    channel
        .send(ClientMessage::SubscribeAgentUpdates {
            request_id: "r-sub".into(),
            subscription_id: "sub-1".into(),
            filter: AgentFilter::default(),
        })
        .await
        .unwrap();
    wait_for(&mut channel, |m| {
        matches!(m, ServerMessage::SubscribeAgentUpdatesResponse { .. })
    })
    .await;

    channel
        .send(ClientMessage::CreateAgentRequest {
            request_id: "r-create".into(),
            params: CreateAgentParams {
                provider: "scripted".into(),
                model: None,
                cwd: td.workdir.path().to_path_buf(),
                mode: AgentMode::Default,
                labels: Default::default(),
                prompt: None,
                worktree: None,
            },
        })
        .await
        .unwrap();

    let created = wait_for(&mut channel, |m| {
        matches!(m, ServerMessage::CreateAgentResponse { .. })
    })
    .await;
    let agent_id = match created {
        ServerMessage::CreateAgentResponse { agent, .. } => agent.id,
        _ => unreachable!(),
    };

    // The subscription observes the new agent as an upsert.
    let expected_id = agent_id.clone();
    wait_for(&mut channel, move |m| {
        matches!(
            m,
            ServerMessage::AgentUpdatePush {
                update: AgentUpdate::Upsert { agent },
                ..
            } if agent.id == expected_id
        )
    })
    .await;

    // Stream a run and watch it end through the subscription.
    channel
        .send(ClientMessage::SendAgentMessageRequest {
            request_id: "r-send".into(),
            agent_id: agent_id.clone(),
            text: "do a thing".into(),
            images: vec![],
        })
        .await
        .unwrap();

    let run_id = match wait_for(&mut channel, |m| {
        matches!(m, ServerMessage::SendAgentMessageResponse { .. })
    })
    .await
    {
        ServerMessage::SendAgentMessageResponse { run_id, .. } => run_id,
        _ => unreachable!(),
    };

    let ended_run = run_id.clone();
    wait_for(&mut channel, move |m| {
        matches!(
            m,
            ServerMessage::AgentEventPush {
                event: AgentEvent::RunEnded { run_id, status: RunTerminal::Idle, .. },
                ..
            } if *run_id == ended_run
        )
    })
    .await;

    channel
        .send(ClientMessage::WaitForFinishRequest {
            request_id: "r-wait".into(),
            agent_id: agent_id.clone(),
            timeout_ms: Some(5_000),
        })
        .await
        .unwrap();
    match wait_for(&mut channel, |m| {
        matches!(m, ServerMessage::WaitForFinishResponse { .. })
    })
    .await
    {
        ServerMessage::WaitForFinishResponse { status, .. } => {
            assert_eq!(status, FinishState::Idle)
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn relay_path_end_to_end() {
    // Relay up first, then a daemon registered against it.
    let relay_state = Arc::new(RelayState::new(RelayConfig::default()));
    let relay_app = paseo_relay::router(relay_state);
    let relay_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_addr = relay_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(relay_listener, relay_app).await.unwrap();
    });

    let td = start_daemon(Some(relay_addr.to_string()), &[]).await;
    let server_id = td.daemon.identity.server_id.clone();

    // The uplink registers asynchronously; retry until the join succeeds.
    let mut channel = None;
    for _ in 0..50 {
        match dial_relay(
            "relay-conn",
            &relay_addr.to_string(),
            &server_id,
            Duration::from_secs(5),
        )
        .await
        {
            Ok(c) => {
                channel = Some(c);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    let mut channel = channel.expect("relay dial never succeeded");
    assert_eq!(channel.server_id, server_id);

    // A request/response verb works through the pipe.
    channel
        .send(ClientMessage::FetchAgentsRequest {
            request_id: "r1".into(),
            filter: AgentFilter::default(),
        })
        .await
        .unwrap();
    match wait_for(&mut channel, |m| {
        matches!(m, ServerMessage::FetchAgentsResponse { .. })
    })
    .await
    {
        ServerMessage::FetchAgentsResponse { request_id, agents } => {
            assert_eq!(request_id, "r1");
            assert!(agents.is_empty());
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn two_sessions_share_agent_events() {
    let td = start_daemon(None, &[]).await;
    let mut a = connect(&td).await;
    let mut b = connect(&td).await;

    for (channel, sub) in [(&mut a, "sub-a"), (&mut b, "sub-b")] {
        channel
            .send(ClientMessage::SubscribeAgentUpdates {
                request_id: format!("r-{sub}"),
                subscription_id: sub.into(),
                filter: AgentFilter::default(),
            })
            .await
            .unwrap();
        wait_for(channel, |m| {
            matches!(m, ServerMessage::SubscribeAgentUpdatesResponse { .. })
        })
        .await;
    }

    a.send(ClientMessage::CreateAgentRequest {
        request_id: "r-create".into(),
        params: CreateAgentParams {
            provider: "scripted".into(),
            model: None,
            cwd: td.workdir.path().to_path_buf(),
            mode: AgentMode::Default,
            labels: Default::default(),
            prompt: None,
            worktree: None,
        },
    })
    .await
    .unwrap();

    // Both sessions observe the same upsert — events are multicast.
    for channel in [&mut a, &mut b] {
        wait_for(channel, |m| {
            matches!(
                m,
                ServerMessage::AgentUpdatePush {
                    update: AgentUpdate::Upsert { .. },
                    ..
                }
            )
        })
        .await;
    }
}

#[tokio::test]
async fn voice_conversations_round_trip_over_the_wire() {
    let td = start_daemon(None, &[]).await;
    let mut channel = connect(&td).await;

    let conversation = paseo_protocol::types::VoiceConversation {
        id: "conv-1".into(),
        title: Some("retro".into()),
        messages: vec![],
        updated_at: chrono::Utc::now(),
    };
    channel
        .send(ClientMessage::SetVoiceConversation {
            request_id: "r1".into(),
            conversation,
        })
        .await
        .unwrap();
    wait_for(&mut channel, |m| {
        matches!(m, ServerMessage::SetVoiceConversationResponse { .. })
    })
    .await;

    channel
        .send(ClientMessage::LoadVoiceConversationRequest {
            request_id: "r2".into(),
            conversation_id: "conv-1".into(),
        })
        .await
        .unwrap();
    match wait_for(&mut channel, |m| {
        matches!(m, ServerMessage::LoadVoiceConversationResponse { .. })
    })
    .await
    {
        ServerMessage::LoadVoiceConversationResponse { conversation, .. } => {
            assert_eq!(conversation.unwrap().title.as_deref(), Some("retro"));
        }
        _ => unreachable!(),
    }

    // Dictation needs an STT provider; the daemon answers bad_request.
    channel
        .send(ClientMessage::DictationStartRequest {
            request_id: "r3".into(),
            dictation_id: "d1".into(),
        })
        .await
        .unwrap();
    match wait_for(&mut channel, |m| {
        matches!(m, ServerMessage::ErrorResponse { .. })
    })
    .await
    {
        ServerMessage::ErrorResponse { error, .. } => {
            assert_eq!(error.code, ErrorCode::BadRequest);
        }
        _ => unreachable!(),
    }
}
