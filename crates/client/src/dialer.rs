//! Candidate racing.
//!
//! All candidates open in parallel with a staggered start; the first to
//! complete the daemon handshake wins and the losers are cancelled.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::channel::{dial_direct, dial_relay, ChannelKind, DialError, DialedChannel};
use crate::profile::{ConnectionKind, HostProfile};

#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Delay between successive candidate starts.
    pub stagger: Duration,
    /// Per-candidate handshake timeout.
    pub handshake_timeout: Duration,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            stagger: Duration::from_millis(50),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// The candidate that won a race, reported to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveConnection {
    pub connection_id: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    pub server_id: String,
}

/// Race every candidate of `profile`; return the first channel whose
/// handshake completes.
///
/// On total failure, an authentication error (when any candidate produced
/// one) takes precedence over the generic failure so it can be surfaced to
/// the user.
pub async fn race(profile: &HostProfile, opts: &DialOptions) -> Result<DialedChannel, DialError> {
    let candidates = profile.candidate_order();
    if candidates.is_empty() {
        return Err(DialError::AllCandidatesFailed);
    }

    let total = candidates.len();
    let (result_tx, mut result_rx) = mpsc::channel::<(String, Result<DialedChannel, DialError>)>(total);

    let mut handles = Vec::with_capacity(total);
    for (index, conn) in candidates.into_iter().enumerate() {
        let connection_id = conn.id.clone();
        let kind = conn.kind.clone();
        let server_id = profile.server_id.clone();
        let stagger = opts.stagger * index as u32;
        let timeout = opts.handshake_timeout;
        let tx = result_tx.clone();

        handles.push(tokio::spawn(async move {
            if !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
            let result = match kind {
                ConnectionKind::Direct { endpoint } => {
                    dial_direct(&connection_id, &endpoint, timeout).await
                }
                ConnectionKind::Relay { relay_endpoint, .. } => {
                    dial_relay(&connection_id, &relay_endpoint, &server_id, timeout).await
                }
            };
            let _ = tx.send((connection_id, result)).await;
        }));
    }
    drop(result_tx);

    let mut auth_error: Option<DialError> = None;
    let mut failures = 0usize;

    while let Some((connection_id, result)) = result_rx.recv().await {
        match result {
            Ok(channel) => {
                tracing::info!(
                    connection_id = %connection_id,
                    kind = ?channel.kind,
                    "candidate won the race"
                );
                for handle in &handles {
                    handle.abort();
                }
                return Ok(channel);
            }
            Err(e) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    error = %e,
                    "candidate failed"
                );
                if e.is_auth() && auth_error.is_none() {
                    auth_error = Some(e);
                }
                failures += 1;
                if failures == total {
                    break;
                }
            }
        }
    }

    Err(auth_error.unwrap_or(DialError::AllCandidatesFailed))
}
