//! Listen worker: advertises the service and accepts inbound peers in a loop

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ReportSender, WorkerReport};
use crate::config::LinkConfig;
use crate::errors::LinkError;
use crate::radio::{Radio, ServiceListener};
use crate::session::Session;
use crate::types::{ServiceIdentity, SessionOrigin};

// ----------------------------------------------------------------------------
// Listen Worker
// ----------------------------------------------------------------------------

/// Handle to the task that owns the listening endpoint
///
/// The task keeps accepting after every session it hands over, so the local
/// device stays reachable for the next inbound peer. It ends when cancelled,
/// when the endpoint cannot be opened, or after too many consecutive accept
/// errors.
#[derive(Debug)]
pub struct ListenWorker {
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ListenWorker {
    pub(crate) fn spawn(
        generation: u64,
        radio: Arc<dyn Radio>,
        service: ServiceIdentity,
        config: &LinkConfig,
        reports: ReportSender,
    ) -> Self {
        let token = CancellationToken::new();
        let task = AcceptLoop {
            generation,
            radio,
            service,
            retry_delay: config.accept_retry_delay,
            max_failures: config.max_accept_failures,
            token: token.clone(),
            reports,
        };
        let handle = tokio::spawn(task.run());

        Self {
            generation,
            token,
            handle,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop accepting and close the endpoint
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

struct AcceptLoop {
    generation: u64,
    radio: Arc<dyn Radio>,
    service: ServiceIdentity,
    retry_delay: Duration,
    max_failures: u32,
    token: CancellationToken,
    reports: ReportSender,
}

impl AcceptLoop {
    async fn run(self) {
        let opened = tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!("Listener {} cancelled before advertising", self.generation);
                return self.finish(None);
            }
            opened = self.radio.listen(&self.service) => opened,
        };

        let mut listener = match opened {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to open listening endpoint for {}: {}", self.service, e);
                return self.finish(Some(LinkError::endpoint(self.service.name, &e)));
            }
        };

        info!("Advertising {} and waiting for peers", self.service);
        let _ = self.reports.send(WorkerReport::ListenerReady {
            generation: self.generation,
        });

        let error = self.accept_loop(listener.as_mut()).await;
        drop(listener);
        self.finish(error);
    }

    /// Returns the error that ended the loop, or `None` on cancellation
    async fn accept_loop(&self, listener: &mut dyn ServiceListener) -> Option<LinkError> {
        let mut failures = 0u32;

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.token.cancelled() => return None,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    failures = 0;
                    info!("Accepted inbound connection from {}", peer);
                    let session = Session::new(stream, peer, SessionOrigin::Accepted);
                    let report = WorkerReport::Accepted {
                        generation: self.generation,
                        session,
                    };
                    if self.reports.send(report).is_err() {
                        debug!("Manager gone, listener {} stopping", self.generation);
                        return None;
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Accept failed on {} ({}/{}): {}",
                        self.service, failures, self.max_failures, e
                    );
                    if failures >= self.max_failures {
                        error!("Giving up accepting on {} after {} failures", self.service, failures);
                        return Some(LinkError::EndpointUnavailable {
                            service: self.service.name.to_string(),
                            reason: format!("accept failed {} times in a row: {}", failures, e),
                        });
                    }

                    tokio::select! {
                        biased;
                        _ = self.token.cancelled() => return None,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
    }

    fn finish(&self, error: Option<LinkError>) {
        debug!("Listener {} finished", self.generation);
        let _ = self.reports.send(WorkerReport::ListenerEnded {
            generation: self.generation,
            error,
        });
    }
}
