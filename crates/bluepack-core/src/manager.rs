//! Connection manager
//!
//! [`ConnectionManager`] is a cheap, cloneable handle. The state it manages
//! (the listen, dial and transfer workers) lives in a single actor task that
//! processes caller commands and worker reports one at a time, so two sessions
//! arriving at nearly the same moment can never both become active.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::errors::{LinkError, Result};
use crate::events::ConnectionEvent;
use crate::radio::Radio;
use crate::session::Session;
use crate::sink::{MessageSink, SinkRegistry, Subscription};
use crate::types::{AttemptId, ConnectionState, PeerDevice, ServiceIdentity};
use crate::workers::{
    DialWorker, ListenWorker, ReportSender, TransferHandle, TransferWorker, WorkerReport,
};

// ----------------------------------------------------------------------------
// Public Handle
// ----------------------------------------------------------------------------

/// Public API of the link manager
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ConnectionEvent>,
    state: watch::Receiver<ConnectionState>,
    sinks: SinkRegistry,
    service: ServiceIdentity,
}

impl ConnectionManager {
    /// Spawn the manager task on the current tokio runtime
    ///
    /// Nothing is advertised until [`start`](Self::start) is called.
    pub fn new(radio: Arc<dyn Radio>, config: LinkConfig) -> Result<Self> {
        config.validate()?;

        let service = ServiceIdentity::TINY_CHAT;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (reports, report_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_buffer_size);
        let (state_tx, state) = watch::channel(ConnectionState::Idle);
        let sinks = SinkRegistry::new();

        let task = ManagerTask {
            radio,
            service,
            config,
            sinks: sinks.clone(),
            events: events.clone(),
            state: state_tx,
            reports,
            listener: None,
            dial: None,
            transfer: None,
            next_generation: 0,
            next_attempt: 0,
            stats: ManagerStats::default(),
        };
        tokio::spawn(task.run(command_rx, report_rx));

        Ok(Self {
            commands,
            events,
            state,
            sinks,
            service,
        })
    }

    /// Begin advertising the service and accepting inbound peers
    ///
    /// Cancels an in-flight dial. Calling it while a listener is alive does
    /// nothing else; failures arrive as [`ConnectionEvent::ListenFailed`].
    pub async fn start(&self) -> Result<()> {
        self.request(|reply| Command::Start { reply }).await
    }

    /// Dial `peer`, superseding any earlier attempt
    ///
    /// Returns as soon as the attempt is started. Its outcome arrives as
    /// [`ConnectionEvent::Connected`] or [`ConnectionEvent::DialFailed`].
    pub async fn connect_to(&self, peer: PeerDevice) -> Result<AttemptId> {
        self.request(|reply| Command::ConnectTo { peer, reply }).await
    }

    /// Write `bytes` to the active session
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        let transfer = self
            .request(|reply| Command::ActiveTransfer { reply })
            .await?
            .ok_or(LinkError::NoActiveSession)?;

        if let Err(error) = transfer.send(bytes).await {
            let _ = self.events.send(ConnectionEvent::SendFailed {
                error: error.clone(),
            });
            return Err(error);
        }
        Ok(())
    }

    /// Write `text` encoded as UTF-8
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send(text.as_bytes()).await
    }

    /// Close the active session, keeping the listener alive
    ///
    /// Returns whether there was a session to close.
    pub async fn close(&self) -> Result<bool> {
        self.request(|reply| Command::Close { reply }).await
    }

    /// Stop every worker and the manager task
    pub async fn shutdown(&self) -> Result<()> {
        match self.request(|reply| Command::Shutdown { reply }).await {
            Err(LinkError::ManagerClosed) => Ok(()),
            other => other,
        }
    }

    /// Counters describing what the manager has done so far
    pub async fn stats(&self) -> Result<ManagerStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Register a consumer for incoming session text
    pub fn subscribe<S: MessageSink>(&self, sink: S) -> Subscription {
        self.sinks.subscribe(Arc::new(sink))
    }

    pub fn service(&self) -> ServiceIdentity {
        self.service
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| LinkError::ManagerClosed)?;
        response.await.map_err(|_| LinkError::ManagerClosed)
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Counters kept by the manager task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Listen workers created
    pub listeners_started: u64,
    /// Dial workers created
    pub dials_started: u64,
    /// Dial attempts that reported failure
    pub dials_failed: u64,
    /// Dial workers cancelled by a newer attempt or by `start`
    pub dials_cancelled: u64,
    /// Sessions adopted as the active session
    pub sessions_established: u64,
    /// Active sessions torn down because a new one arrived
    pub sessions_replaced: u64,
    /// Sessions from superseded dial attempts that were closed unused
    pub stale_sessions_discarded: u64,
}

#[derive(Debug)]
enum Command {
    Start {
        reply: oneshot::Sender<()>,
    },
    ConnectTo {
        peer: PeerDevice,
        reply: oneshot::Sender<AttemptId>,
    },
    ActiveTransfer {
        reply: oneshot::Sender<Option<TransferHandle>>,
    },
    Close {
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<ManagerStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// ----------------------------------------------------------------------------
// Manager Task
// ----------------------------------------------------------------------------

/// Sole owner of the worker handles
struct ManagerTask {
    radio: Arc<dyn Radio>,
    service: ServiceIdentity,
    config: LinkConfig,
    sinks: SinkRegistry,
    events: broadcast::Sender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
    reports: ReportSender,
    listener: Option<ListenWorker>,
    dial: Option<DialWorker>,
    transfer: Option<TransferWorker>,
    next_generation: u64,
    next_attempt: u64,
    stats: ManagerStats,
}

impl ManagerTask {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut reports: mpsc::UnboundedReceiver<WorkerReport>,
    ) {
        debug!("Connection manager task started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(report) = reports.recv() => self.handle_report(report),
            }
            self.publish_state();
        }

        debug!("Connection manager task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => {
                self.start();
                self.publish_state();
                let _ = reply.send(());
            }
            Command::ConnectTo { peer, reply } => {
                let attempt = self.connect_to(peer);
                self.publish_state();
                let _ = reply.send(attempt);
            }
            Command::ActiveTransfer { reply } => {
                let handle = self
                    .transfer
                    .as_ref()
                    .map(TransferWorker::handle)
                    .filter(|handle| !handle.is_closed());
                let _ = reply.send(handle);
            }
            Command::Close { reply } => {
                let closed = self.close();
                self.publish_state();
                let _ = reply.send(closed);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats.clone());
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    fn handle_report(&mut self, report: WorkerReport) {
        match report {
            WorkerReport::ListenerReady { generation } => {
                if self.is_current_listener(generation) {
                    self.emit(ConnectionEvent::Listening {
                        service: self.service.name.to_string(),
                    });
                }
            }
            WorkerReport::Accepted {
                generation,
                session,
            } => {
                if self.is_current_listener(generation) {
                    self.adopt(session);
                } else {
                    debug!("Dropping session accepted by retired listener {}", generation);
                }
            }
            WorkerReport::ListenerEnded { generation, error } => {
                if self.is_current_listener(generation) {
                    self.listener = None;
                }
                if let Some(error) = error {
                    self.emit(ConnectionEvent::ListenFailed { error });
                }
            }
            WorkerReport::Dialed { attempt, session } => {
                if self.dial.as_ref().map(DialWorker::attempt) == Some(attempt) {
                    self.dial = None;
                    self.adopt(session);
                } else {
                    warn!(
                        "Closing session with {} from superseded attempt {}",
                        session.peer(),
                        attempt
                    );
                    self.stats.stale_sessions_discarded += 1;
                }
            }
            WorkerReport::DialFailed {
                attempt,
                peer,
                error,
            } => {
                if self.dial.as_ref().map(DialWorker::attempt) == Some(attempt) {
                    self.dial = None;
                }
                self.stats.dials_failed += 1;
                self.emit(ConnectionEvent::DialFailed {
                    attempt,
                    peer,
                    error,
                });
            }
            WorkerReport::TransferEnded {
                generation,
                peer,
                reason,
            } => {
                let current = self
                    .transfer
                    .as_ref()
                    .is_some_and(|transfer| transfer.generation() == generation);
                if current {
                    self.transfer = None;
                    self.emit(ConnectionEvent::SessionEnded { peer, reason });
                } else {
                    debug!("Session {} with {} already retired", generation, peer);
                }
            }
        }
    }

    fn start(&mut self) {
        if let Some(dial) = self.dial.take() {
            info!("Cancelling dial attempt {} to {}", dial.attempt(), dial.peer());
            dial.cancel();
            self.stats.dials_cancelled += 1;
        }

        if self
            .listener
            .as_ref()
            .is_some_and(|listener| !listener.is_finished())
        {
            debug!("Listener already running");
            return;
        }
        if let Some(finished) = self.listener.take() {
            debug!("Listener {} finished before its report arrived", finished.generation());
        }

        let generation = self.next_generation();
        self.listener = Some(ListenWorker::spawn(
            generation,
            self.radio.clone(),
            self.service,
            &self.config,
            self.reports.clone(),
        ));
        self.stats.listeners_started += 1;
    }

    fn connect_to(&mut self, peer: PeerDevice) -> AttemptId {
        self.radio.cancel_discovery();

        if let Some(previous) = self.dial.take() {
            info!(
                "Superseding dial attempt {} to {}",
                previous.attempt(),
                previous.peer()
            );
            previous.cancel();
            self.stats.dials_cancelled += 1;
        }

        self.next_attempt += 1;
        let attempt = AttemptId(self.next_attempt);
        info!("Dialing {} (attempt {})", peer, attempt);

        self.dial = Some(DialWorker::spawn(
            attempt,
            peer.clone(),
            self.radio.clone(),
            self.service,
            self.config.connect_timeout,
            self.reports.clone(),
        ));
        self.stats.dials_started += 1;
        self.emit(ConnectionEvent::Connecting { attempt, peer });
        attempt
    }

    /// Make `session` the active session, retiring the current one first
    fn adopt(&mut self, session: Session) {
        if let Some(previous) = self.transfer.take() {
            info!(
                "Replacing session with {} by session with {}",
                previous.peer(),
                session.peer()
            );
            previous.cancel();
            self.stats.sessions_replaced += 1;
            self.emit(ConnectionEvent::SessionEnded {
                peer: previous.peer(),
                reason: "replaced by a new session".to_string(),
            });
        }

        let peer = session.peer();
        let origin = session.origin();
        let generation = self.next_generation();
        self.transfer = Some(TransferWorker::spawn(
            generation,
            session,
            self.sinks.clone(),
            self.config.read_buffer_size,
            self.reports.clone(),
        ));
        self.stats.sessions_established += 1;
        self.emit(ConnectionEvent::Connected { peer, origin });
    }

    fn close(&mut self) -> bool {
        match self.transfer.take() {
            Some(transfer) => {
                info!("Closing session with {}", transfer.peer());
                transfer.cancel();
                self.emit(ConnectionEvent::SessionEnded {
                    peer: transfer.peer(),
                    reason: "closed locally".to_string(),
                });
                true
            }
            None => {
                debug!("Close requested without an active session");
                false
            }
        }
    }

    fn shutdown(&mut self) {
        info!("Shutting down connection manager");
        if let Some(dial) = self.dial.take() {
            dial.cancel();
        }
        if let Some(listener) = self.listener.take() {
            listener.cancel();
        }
        self.close();
        self.publish_state();
    }

    fn is_current_listener(&self, generation: u64) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|listener| listener.generation() == generation)
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_state(&self) {
        let next = ConnectionState::derive(
            self.listener.is_some(),
            self.dial.is_some(),
            self.transfer.is_some(),
        );
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!("Connection state {} -> {}", current, next);
                *current = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::loopback::{LoopbackAir, LoopbackRadio};
    use crate::types::PeerAddress;

    fn manager_task(radio: LoopbackRadio) -> (ManagerTask, mpsc::UnboundedReceiver<WorkerReport>) {
        let (reports, report_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(16);
        let (state, _) = watch::channel(ConnectionState::Idle);
        let task = ManagerTask {
            radio: Arc::new(radio),
            service: ServiceIdentity::TINY_CHAT,
            config: LinkConfig::default(),
            sinks: SinkRegistry::new(),
            events,
            state,
            reports,
            listener: None,
            dial: None,
            transfer: None,
            next_generation: 0,
            next_attempt: 0,
            stats: ManagerStats::default(),
        };
        (task, report_rx)
    }

    #[tokio::test]
    async fn test_start_replaces_listener_whose_report_is_pending() {
        let air = LoopbackAir::new();
        let address = PeerAddress::new([0x02, 0, 0, 0, 0, 0x01]);
        let radio = air.radio(address);
        radio.set_powered(false);
        let (mut task, mut reports) = manager_task(radio.clone());

        task.start();
        timeout(Duration::from_secs(1), async {
            while !task.listener.as_ref().is_some_and(ListenWorker::is_finished) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("listener should fail while powered off");

        // ListenerEnded is still queued
        radio.set_powered(true);
        task.start();
        assert_eq!(task.stats.listeners_started, 2);

        let report = reports.recv().await.expect("report from failed listener");
        assert!(matches!(
            report,
            WorkerReport::ListenerEnded { generation: 1, error: Some(_) }
        ));
        task.handle_report(report);
        assert!(task.listener.is_some());

        timeout(Duration::from_secs(1), async {
            while !air.is_listening(address, &ServiceIdentity::TINY_CHAT) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("replacement listener should advertise");

        task.shutdown();
    }
}
