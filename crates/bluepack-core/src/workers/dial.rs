//! Dial worker: one outbound connection attempt toward a known peer

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ReportSender, WorkerReport};
use crate::errors::LinkError;
use crate::radio::{BoxedStream, Radio};
use crate::session::Session;
use crate::types::{AttemptId, PeerDevice, ServiceIdentity, SessionOrigin};

// ----------------------------------------------------------------------------
// Dial Worker
// ----------------------------------------------------------------------------

/// Handle to a single in-flight dial attempt
///
/// The attempt reports exactly one of `Dialed` or `DialFailed`, or nothing at
/// all if it was cancelled first.
#[derive(Debug)]
pub struct DialWorker {
    attempt: AttemptId,
    peer: PeerDevice,
    token: CancellationToken,
}

impl DialWorker {
    pub(crate) fn spawn(
        attempt: AttemptId,
        peer: PeerDevice,
        radio: Arc<dyn Radio>,
        service: ServiceIdentity,
        connect_timeout: Option<Duration>,
        reports: ReportSender,
    ) -> Self {
        let token = CancellationToken::new();
        tokio::spawn(run_attempt(
            attempt,
            peer.clone(),
            radio,
            service,
            connect_timeout,
            token.clone(),
            reports,
        ));

        Self {
            attempt,
            peer,
            token,
        }
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn peer(&self) -> &PeerDevice {
        &self.peer
    }

    /// Abandon the attempt, closing the socket if it is still connecting
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

async fn run_attempt(
    attempt: AttemptId,
    peer: PeerDevice,
    radio: Arc<dyn Radio>,
    service: ServiceIdentity,
    connect_timeout: Option<Duration>,
    token: CancellationToken,
    reports: ReportSender,
) {
    debug!("Dial attempt {} to {} started", attempt, peer);

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        outcome = dial(radio.as_ref(), &peer, &service, connect_timeout) => Some(outcome),
    };

    let report = match outcome {
        None => {
            debug!("Dial attempt {} to {} cancelled", attempt, peer);
            return;
        }
        Some(Ok(stream)) => {
            info!("Connected to {} (attempt {})", peer, attempt);
            let session = Session::new(stream, peer.address, SessionOrigin::Dialed(attempt));
            WorkerReport::Dialed { attempt, session }
        }
        Some(Err(error)) => {
            warn!("Dial attempt {} failed: {}", attempt, error);
            WorkerReport::DialFailed {
                attempt,
                peer,
                error,
            }
        }
    };

    let _ = reports.send(report);
}

/// Open a socket and connect it; a failed connect drops the half-open socket
async fn dial(
    radio: &dyn Radio,
    peer: &PeerDevice,
    service: &ServiceIdentity,
    connect_timeout: Option<Duration>,
) -> Result<BoxedStream, LinkError> {
    let socket = radio
        .open_socket(peer, service)
        .await
        .map_err(|e| LinkError::dial(peer, format!("could not create socket: {}", e)))?;

    debug!("Socket toward {} created, connecting to {}", peer, service);

    let connected = match connect_timeout {
        Some(limit) => tokio::time::timeout(limit, socket.connect())
            .await
            .map_err(|_| {
                LinkError::dial(peer, format!("connect timed out after {}ms", limit.as_millis()))
            })?,
        None => socket.connect().await,
    };

    connected.map_err(|e| LinkError::dial(peer, e))
}
