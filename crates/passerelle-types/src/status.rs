//! Connection-status vocabulary shared between the transport boundary and
//! the outward-facing bridge state stream.

use serde::{Deserialize, Serialize};

/// Status transitions surfaced by the transport collaborator.
///
/// This is the complete vocabulary; the transport must not assume any
/// additional states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportStatus {
    Connected,
    Disconnected,
    LoggedOut,
    TransientError,
    FatalError,
    CleanShutdown,
}

/// Outward bridge state, as reported to the room system.
///
/// `TransientDisconnect` is the debounced form of a raw `Disconnected`
/// signal: it is only emitted once the grace window has elapsed without a
/// recovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BridgeState {
    Connecting,
    Connected,
    TransientDisconnect { error: Option<String> },
    LoggedOut { error: Option<String> },
    FatalError { error: Option<String> },
    CleanShutdown,
}

impl BridgeState {
    /// Whether this state ends the connection loop for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BridgeState::LoggedOut { .. } | BridgeState::CleanShutdown
        )
    }
}
