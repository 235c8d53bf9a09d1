//! Connection lifecycle notifications

use crate::errors::LinkError;
use crate::types::{AttemptId, PeerAddress, PeerDevice, SessionOrigin};

/// Broadcast by the manager on every lifecycle transition
///
/// Subscribers see both outcomes of every attempt: each `Connecting` is
/// followed by either `Connected` with the same attempt or `DialFailed`,
/// unless a newer attempt superseded it.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The listening endpoint is advertising
    Listening { service: String },
    /// The listener could not open or gave up accepting
    ListenFailed { error: LinkError },
    /// An outbound attempt started
    Connecting { attempt: AttemptId, peer: PeerDevice },
    /// A session was adopted; any progress indicator can be dismissed
    Connected {
        peer: PeerAddress,
        origin: SessionOrigin,
    },
    /// An outbound attempt failed without producing a session
    DialFailed {
        attempt: AttemptId,
        peer: PeerDevice,
        error: LinkError,
    },
    /// The active session terminated
    SessionEnded { peer: PeerAddress, reason: String },
    /// A write on the active session failed; the session keeps reading
    SendFailed { error: LinkError },
}

impl ConnectionEvent {
    /// Whether the event reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ConnectionEvent::ListenFailed { .. }
                | ConnectionEvent::DialFailed { .. }
                | ConnectionEvent::SendFailed { .. }
        )
    }
}

