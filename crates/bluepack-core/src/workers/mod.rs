//! Background workers owned by the connection manager
//!
//! Each worker is one tokio task with its own cancellation token. Workers never
//! touch manager state; they report outcomes as [`WorkerReport`] messages and
//! the manager decides what to do with them.

pub mod dial;
pub mod listen;
pub mod transfer;

pub use dial::DialWorker;
pub use listen::ListenWorker;
pub use transfer::{TransferHandle, TransferWorker};

use crate::errors::LinkError;
use crate::session::Session;
use crate::types::{AttemptId, PeerAddress, PeerDevice};

/// Outcome messages sent from workers to the manager task
#[derive(Debug)]
pub(crate) enum WorkerReport {
    /// Listener `generation` is advertising
    ListenerReady { generation: u64 },
    /// Listener `generation` accepted an inbound session
    Accepted { generation: u64, session: Session },
    /// Listener `generation` stopped; `error` is set when it failed
    ListenerEnded {
        generation: u64,
        error: Option<LinkError>,
    },
    /// Dial `attempt` produced a session
    Dialed { attempt: AttemptId, session: Session },
    /// Dial `attempt` failed without a session
    DialFailed {
        attempt: AttemptId,
        peer: PeerDevice,
        error: LinkError,
    },
    /// Transfer `generation` left its read loop
    TransferEnded {
        generation: u64,
        peer: PeerAddress,
        reason: String,
    },
}

pub(crate) type ReportSender = tokio::sync::mpsc::UnboundedSender<WorkerReport>;
