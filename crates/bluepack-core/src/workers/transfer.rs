//! Transfer worker: owns the live session and moves bytes both ways

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ReportSender, WorkerReport};
use crate::errors::{LinkError, Result};
use crate::radio::BoxedStream;
use crate::session::Session;
use crate::sink::SinkRegistry;
use crate::types::{PeerAddress, SessionOrigin};

type SharedWriter = Arc<Mutex<Option<WriteHalf<BoxedStream>>>>;

// ----------------------------------------------------------------------------
// Transfer Worker
// ----------------------------------------------------------------------------

/// Owner of the active session
///
/// The read loop runs on its own task and hands each chunk, decoded as UTF-8,
/// to the sink registry. Writes go through [`TransferHandle`] clones and never
/// end the read loop.
#[derive(Debug)]
pub struct TransferWorker {
    generation: u64,
    origin: SessionOrigin,
    link: TransferHandle,
    handle: JoinHandle<()>,
}

impl TransferWorker {
    pub(crate) fn spawn(
        generation: u64,
        session: Session,
        sinks: SinkRegistry,
        read_buffer_size: usize,
        reports: ReportSender,
    ) -> Self {
        let peer = session.peer();
        let origin = session.origin();
        let (reader, writer) = session.into_parts();

        let link = TransferHandle {
            peer,
            writer: Arc::new(Mutex::new(Some(writer))),
            token: CancellationToken::new(),
        };

        let handle = tokio::spawn(run_session(
            generation,
            reader,
            link.clone(),
            sinks,
            read_buffer_size,
            reports,
        ));

        Self {
            generation,
            origin,
            link,
            handle,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn peer(&self) -> PeerAddress {
        self.link.peer
    }

    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    /// Cloneable write access to the session
    pub fn handle(&self) -> TransferHandle {
        self.link.clone()
    }

    /// Close the session; the read loop exits on its next poll. Idempotent.
    pub fn cancel(&self) {
        self.link.token.cancel();
    }

    /// Whether the read loop has exited and the socket is closed
    pub fn is_terminated(&self) -> bool {
        self.handle.is_finished()
    }
}

// ----------------------------------------------------------------------------
// Transfer Handle
// ----------------------------------------------------------------------------

/// Write side of the active session, safe to use from any task
#[derive(Clone)]
pub struct TransferHandle {
    peer: PeerAddress,
    writer: SharedWriter,
    token: CancellationToken,
}

impl fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferHandle")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl TransferHandle {
    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    /// Whether the session has been cancelled or has terminated
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Write `bytes` to the peer
    ///
    /// A failed write is logged and returned; the read loop keeps running.
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| LinkError::StreamClosed {
            reason: "session is closed".to_string(),
        })?;

        let written = tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "session closed during write",
            )),
            written = write_chunk(writer, bytes) => written,
        };

        match written {
            Ok(()) => {
                debug!("Sent {} bytes to {}", bytes.len(), self.peer);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to write {} bytes to {}: {}", bytes.len(), self.peer, e);
                Err(LinkError::stream(&e))
            }
        }
    }

    /// Shut the output side down and release it
    async fn close_writer(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of stream to {} reported: {}", self.peer, e);
            }
        }
    }
}

async fn write_chunk(writer: &mut WriteHalf<BoxedStream>, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

// ----------------------------------------------------------------------------
// Read Loop
// ----------------------------------------------------------------------------

async fn run_session(
    generation: u64,
    reader: ReadHalf<BoxedStream>,
    link: TransferHandle,
    sinks: SinkRegistry,
    read_buffer_size: usize,
    reports: ReportSender,
) {
    info!("Session with {} established", link.peer);

    let reason = read_loop(reader, &link, &sinks, read_buffer_size).await;

    link.token.cancel();
    link.close_writer().await;
    info!("Session with {} ended: {}", link.peer, reason);

    let _ = reports.send(WorkerReport::TransferEnded {
        generation,
        peer: link.peer,
        reason,
    });
}

/// Read until the stream fails or the session is cancelled
///
/// Consumes the read half so the input side is released on return.
async fn read_loop(
    mut reader: ReadHalf<BoxedStream>,
    link: &TransferHandle,
    sinks: &SinkRegistry,
    read_buffer_size: usize,
) -> String {
    let mut buffer = vec![0u8; read_buffer_size];

    loop {
        let read = tokio::select! {
            biased;
            _ = link.token.cancelled() => return "closed locally".to_string(),
            read = reader.read(&mut buffer) => read,
        };

        match read {
            Ok(0) => return "peer closed the stream".to_string(),
            Ok(n) => {
                let text = String::from_utf8_lossy(&buffer[..n]);
                debug!("Received {} bytes from {}", n, link.peer);
                sinks.deliver(&text);
            }
            Err(e) => return format!("read failed: {}", e),
        }
    }
}
