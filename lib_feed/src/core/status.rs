//! # Connection State
//!
//! The single status vocabulary used by the transport and everything that
//! observes it. Failure and retry information travels in the `detail` string
//! of a status notification, never as additional states.

use std::fmt;

/// Lifecycle state of the logical connection.
///
/// Exactly one state holds at any instant. Transitions are driven only by the
/// transport's own lifecycle events or by an explicit `connect`/`disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// A physical connection is being established, or a reconnection is
    /// waiting for its delay to elapse.
    Connecting,
    /// The socket is open; `send` succeeds.
    Open,
    /// A caller-initiated close is in progress.
    Closing,
    /// No connection and no pending attempt. This is the initial state, the
    /// state after a manual disconnect, and the terminal state once the
    /// reconnection budget is spent.
    #[default]
    Closed,
}

impl ConnectionState {
    /// Whether outbound traffic can be written right now.
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Open => "Connected",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Disconnected",
        };
        f.write_str(label)
    }
}
