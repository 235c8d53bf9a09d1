//! Error types for the link manager
//!
//! Every I/O failure is handled inside the worker that observed it and turned
//! into one of these variants before it reaches the manager or an event
//! subscriber. Variants carry rendered reasons rather than `std::io::Error` so
//! the type stays `Clone` and can travel inside broadcast events.

use std::io;

use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors produced by the link manager and its workers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The listening endpoint could not be opened, or the accept loop gave up
    #[error("Listening endpoint unavailable for service {service}: {reason}")]
    EndpointUnavailable { service: String, reason: String },

    /// Outbound socket creation or connect failed
    #[error("Dial to {peer} failed: {reason}")]
    DialFailed { peer: String, reason: String },

    /// A read or write on an established session failed
    #[error("Stream closed: {reason}")]
    StreamClosed { reason: String },

    /// `send` was called while no session is connected
    #[error("No active session")]
    NoActiveSession,

    /// The manager task is gone
    #[error("Connection manager has shut down")]
    ManagerClosed,

    /// Rejected configuration value
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// Malformed peer address
    #[error("Invalid peer address: {input}")]
    InvalidAddress { input: String },
}

impl LinkError {
    pub(crate) fn endpoint(service: impl ToString, err: &io::Error) -> Self {
        LinkError::EndpointUnavailable {
            service: service.to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn dial(peer: impl ToString, reason: impl ToString) -> Self {
        LinkError::DialFailed {
            peer: peer.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn stream(err: &io::Error) -> Self {
        LinkError::StreamClosed {
            reason: err.to_string(),
        }
    }
}

/// Result type for link operations
pub type Result<T> = std::result::Result<T, LinkError>;
