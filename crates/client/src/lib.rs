//! Client-side connection substrate: host profiles, the candidate dialer,
//! and the reconnecting connector.

pub mod backoff;
pub mod channel;
pub mod connector;
pub mod dialer;
pub mod profile;

pub use backoff::ReconnectBackoff;
pub use channel::{ChannelKind, DialError, DialedChannel};
pub use connector::{ConnectionStatus, Connector};
pub use dialer::{race, ActiveConnection, DialOptions};
pub use profile::{Connection, ConnectionKind, HostProfile, ProfileStore};
