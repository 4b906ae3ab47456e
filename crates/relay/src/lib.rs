//! Store-and-forward relay for Paseo daemons and clients.
//!
//! The relay hosts named sessions: one daemon side, zero-or-more client
//! sides. It never inspects forwarded payloads. Error semantics are close
//! reasons only (`invalid_session`, `session_replaced`,
//! `backpressure_exceeded`, `internal`) — no in-band error frames.

pub mod state;
pub mod ws;

pub use state::{RelayConfig, RelayState, DEFAULT_HIGH_WATER, DEFAULT_IDLE_TTL};
pub use ws::router;
