//! Shared types for the passerelle bridge core: identifier scheme, raw
//! remote-network envelopes, normalized room-system events, and the
//! connection-status vocabulary.

pub mod constants;
pub mod envelope;
pub mod event;
pub mod group;
pub mod ids;
pub mod status;

mod error;

pub use error::IdParseError;
pub use ids::{AliasId, ChatId, GroupId, MemberRef, MessageId, PortalKey, UserId};
pub use status::{BridgeState, TransportStatus};
