//! Paseo wire protocol: pairing offers, the session message union, and
//! relay frames.
//!
//! Framing: one JSON message per WebSocket text frame. Every message is a
//! JSON object with a required `type` discriminator; request-shaped messages
//! carry a `request_id`. Numeric ids are strings.

pub mod offer;
pub mod relay;
pub mod session;
pub mod types;

pub use offer::{decode_offer, encode_offer, pairing_url, ConnectionOfferV2, RelayDescriptor};
pub use relay::{CloseReason, RelayFrame};
pub use session::{ClientMessage, ServerMessage};
