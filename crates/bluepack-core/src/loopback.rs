//! In-memory radio
//!
//! A [`LoopbackAir`] connects any number of [`LoopbackRadio`]s living in the
//! same process. Each radio has an address; listening registers the
//! `(address, service uuid)` pair on the air and dialing looks it up, handing
//! both ends a `tokio::io::duplex` pipe.
//!
//! Faults can be injected for tests: powering a radio off, stalling connects
//! toward an address until released, and failing every write.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, Notify};
use tracing::debug;
use uuid::Uuid;

use crate::radio::{BoxedStream, OutboundSocket, Radio, ServiceListener};
use crate::types::{PeerAddress, PeerDevice, ServiceIdentity};

const PIPE_CAPACITY: usize = 64 * 1024;

// ----------------------------------------------------------------------------
// Shared Air
// ----------------------------------------------------------------------------

/// Medium shared by every loopback radio created from it
#[derive(Clone, Default)]
pub struct LoopbackAir {
    inner: Arc<AirInner>,
}

#[derive(Default)]
struct AirInner {
    listeners: DashMap<(PeerAddress, Uuid), Registration>,
    stalled: DashMap<PeerAddress, Arc<Notify>>,
    next_registration: AtomicU64,
}

struct Registration {
    id: u64,
    incoming: mpsc::UnboundedSender<Incoming>,
    fail_writes: Arc<AtomicBool>,
}

struct Incoming {
    stream: LoopbackStream,
    from: PeerAddress,
}

impl LoopbackAir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a powered radio with `address` on this air
    pub fn radio(&self, address: PeerAddress) -> LoopbackRadio {
        LoopbackRadio {
            address,
            air: self.clone(),
            state: Arc::new(RadioState {
                powered: AtomicBool::new(true),
                power_changed: Notify::new(),
                fail_writes: Arc::new(AtomicBool::new(false)),
                listens_opened: AtomicUsize::new(0),
                discovery_cancellations: AtomicUsize::new(0),
            }),
        }
    }

    /// Hold every connect toward `address` until [`release`](Self::release)
    pub fn stall(&self, address: PeerAddress) {
        self.inner
            .stalled
            .entry(address)
            .or_insert_with(|| Arc::new(Notify::new()));
    }

    /// Let connects toward `address` proceed
    pub fn release(&self, address: PeerAddress) {
        if let Some((_, gate)) = self.inner.stalled.remove(&address) {
            gate.notify_waiters();
        }
    }

    /// Whether a listener for `service` is registered at `address`
    pub fn is_listening(&self, address: PeerAddress, service: &ServiceIdentity) -> bool {
        self.inner
            .listeners
            .get(&(address, service.uuid))
            .is_some_and(|registration| !registration.incoming.is_closed())
    }

    async fn wait_until_released(&self, address: PeerAddress) {
        loop {
            let gate = match self.inner.stalled.get(&address) {
                Some(entry) => entry.value().clone(),
                None => return,
            };

            let notified = gate.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // Released between the lookup and enable
            if !self.inner.stalled.contains_key(&address) {
                return;
            }
            debug!("Connect toward {} stalled", address);
            notified.await;
        }
    }
}

// ----------------------------------------------------------------------------
// Radio
// ----------------------------------------------------------------------------

/// One simulated local radio
#[derive(Clone)]
pub struct LoopbackRadio {
    address: PeerAddress,
    air: LoopbackAir,
    state: Arc<RadioState>,
}

struct RadioState {
    powered: AtomicBool,
    power_changed: Notify,
    fail_writes: Arc<AtomicBool>,
    listens_opened: AtomicUsize,
    discovery_cancellations: AtomicUsize,
}

impl LoopbackRadio {
    pub fn address(&self) -> PeerAddress {
        self.address
    }

    /// Handle other radios can dial this one with
    pub fn device(&self, name: &str) -> PeerDevice {
        PeerDevice::new(self.address.to_string(), name, self.address)
    }

    /// Power the radio on or off
    ///
    /// While off, opening endpoints and sockets fails and pending accepts
    /// return errors.
    pub fn set_powered(&self, powered: bool) {
        self.state.powered.store(powered, Ordering::SeqCst);
        self.state.power_changed.notify_waiters();
    }

    pub fn is_powered(&self) -> bool {
        self.state.powered.load(Ordering::SeqCst)
    }

    /// Make every write on this radio's streams fail with `BrokenPipe`
    pub fn inject_write_failures(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of listening endpoints opened so far
    pub fn listens_opened(&self) -> usize {
        self.state.listens_opened.load(Ordering::SeqCst)
    }

    /// Number of times the manager asked to stop discovery
    pub fn discovery_cancellations(&self) -> usize {
        self.state.discovery_cancellations.load(Ordering::SeqCst)
    }

    fn ensure_powered(&self) -> io::Result<()> {
        if self.is_powered() {
            Ok(())
        } else {
            Err(powered_off())
        }
    }
}

#[async_trait]
impl Radio for LoopbackRadio {
    async fn listen(&self, service: &ServiceIdentity) -> io::Result<Box<dyn ServiceListener>> {
        self.ensure_powered()?;

        let (incoming, receiver) = mpsc::unbounded_channel();
        let fail_writes = self.state.fail_writes.clone();
        let id = self
            .air
            .inner
            .next_registration
            .fetch_add(1, Ordering::Relaxed);
        let key = (self.address, service.uuid);

        match self.air.inner.listeners.entry(key) {
            Entry::Occupied(mut slot) => {
                if !slot.get().incoming.is_closed() {
                    return Err(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("{} already advertised on {}", service, self.address),
                    ));
                }
                slot.insert(Registration {
                    id,
                    incoming,
                    fail_writes,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(Registration {
                    id,
                    incoming,
                    fail_writes,
                });
            }
        }

        self.state.listens_opened.fetch_add(1, Ordering::SeqCst);
        debug!("Loopback {} advertising {}", self.address, service);

        Ok(Box::new(LoopbackListener {
            key,
            id,
            air: self.air.clone(),
            radio: self.state.clone(),
            receiver,
        }))
    }

    async fn open_socket(
        &self,
        peer: &PeerDevice,
        service: &ServiceIdentity,
    ) -> io::Result<Box<dyn OutboundSocket>> {
        self.ensure_powered()?;
        Ok(Box::new(LoopbackSocket {
            from: self.address,
            to: peer.address,
            uuid: service.uuid,
            air: self.air.clone(),
            fail_writes: self.state.fail_writes.clone(),
        }))
    }

    fn cancel_discovery(&self) {
        self.state
            .discovery_cancellations
            .fetch_add(1, Ordering::SeqCst);
    }
}

fn powered_off() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "adapter powered off")
}

// ----------------------------------------------------------------------------
// Listener and Socket
// ----------------------------------------------------------------------------

struct LoopbackListener {
    key: (PeerAddress, Uuid),
    id: u64,
    air: LoopbackAir,
    radio: Arc<RadioState>,
    receiver: mpsc::UnboundedReceiver<Incoming>,
}

#[async_trait]
impl ServiceListener for LoopbackListener {
    async fn accept(&mut self) -> io::Result<(BoxedStream, PeerAddress)> {
        let power_changed = self.radio.power_changed.notified();
        tokio::pin!(power_changed);
        power_changed.as_mut().enable();

        if !self.radio.powered.load(Ordering::SeqCst) {
            return Err(powered_off());
        }

        tokio::select! {
            _ = power_changed => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "adapter power changed during accept",
            )),
            incoming = self.receiver.recv() => match incoming {
                Some(Incoming { stream, from }) => Ok((Box::new(stream) as BoxedStream, from)),
                None => Err(io::Error::new(io::ErrorKind::NotConnected, "listener unregistered")),
            },
        }
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        let id = self.id;
        self.air
            .inner
            .listeners
            .remove_if(&self.key, |_, registration| registration.id == id);
    }
}

struct LoopbackSocket {
    from: PeerAddress,
    to: PeerAddress,
    uuid: Uuid,
    air: LoopbackAir,
    fail_writes: Arc<AtomicBool>,
}

#[async_trait]
impl OutboundSocket for LoopbackSocket {
    async fn connect(self: Box<Self>) -> io::Result<BoxedStream> {
        self.air.wait_until_released(self.to).await;

        let (incoming, listener_fail_writes) = self
            .air
            .inner
            .listeners
            .get(&(self.to, self.uuid))
            .map(|registration| {
                (
                    registration.incoming.clone(),
                    registration.fail_writes.clone(),
                )
            })
            .ok_or_else(|| refused(self.to))?;

        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        let accepted = LoopbackStream {
            inner: remote,
            fail_writes: listener_fail_writes,
        };

        incoming
            .send(Incoming {
                stream: accepted,
                from: self.from,
            })
            .map_err(|_| refused(self.to))?;

        Ok(Box::new(LoopbackStream {
            inner: local,
            fail_writes: self.fail_writes.clone(),
        }))
    }
}

fn refused(to: PeerAddress) -> io::Error {
    io::Error::new(
        io::ErrorKind::ConnectionRefused,
        format!("no listener at {}", to),
    )
}

// ----------------------------------------------------------------------------
// Stream
// ----------------------------------------------------------------------------

/// Pipe end whose writes can be made to fail
pub struct LoopbackStream {
    inner: DuplexStream,
    fail_writes: Arc<AtomicBool>,
}

impl AsyncRead for LoopbackStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for LoopbackStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "injected write failure",
            )));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    fn addr(last: u8) -> PeerAddress {
        PeerAddress::new([0xAA, 0, 0, 0, 0, last])
    }

    #[tokio::test]
    async fn test_dial_reaches_listener() {
        let air = LoopbackAir::new();
        let x = air.radio(addr(1));
        let y = air.radio(addr(2));
        let service = ServiceIdentity::TINY_CHAT;

        let mut listener = x.listen(&service).await.unwrap();
        assert!(air.is_listening(addr(1), &service));

        let socket = y.open_socket(&x.device("x"), &service).await.unwrap();
        let mut dialed = socket.connect().await.unwrap();
        let (mut accepted, from) = listener.accept().await.unwrap();
        assert_eq!(from, addr(2));

        dialed.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_second_listen_is_rejected() {
        let air = LoopbackAir::new();
        let x = air.radio(addr(1));
        let service = ServiceIdentity::TINY_CHAT;

        let first = x.listen(&service).await.unwrap();
        let err = x.listen(&service).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);

        drop(first);
        assert!(!air.is_listening(addr(1), &service));
        assert!(x.listen(&service).await.is_ok());
        assert_eq!(x.listens_opened(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_refused() {
        let air = LoopbackAir::new();
        let y = air.radio(addr(2));
        let nobody = PeerDevice::from_address(addr(9));

        let socket = y
            .open_socket(&nobody, &ServiceIdentity::TINY_CHAT)
            .await
            .unwrap();
        let err = socket.connect().await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_power_off_fails_pending_accept() {
        let air = LoopbackAir::new();
        let x = air.radio(addr(1));
        let mut listener = x.listen(&ServiceIdentity::TINY_CHAT).await.unwrap();

        let radio = x.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            radio.set_powered(false);
        });

        let result = timeout(Duration::from_secs(1), listener.accept())
            .await
            .expect("accept should be interrupted");
        assert!(result.is_err());
        assert!(listener.accept().await.is_err());
        assert!(x.listen(&ServiceIdentity::TINY_CHAT).await.is_err());
    }

    #[tokio::test]
    async fn test_stall_holds_connect_until_release() {
        let air = LoopbackAir::new();
        let x = air.radio(addr(1));
        let y = air.radio(addr(2));
        let _listener = x.listen(&ServiceIdentity::TINY_CHAT).await.unwrap();

        air.stall(addr(1));
        let socket = y
            .open_socket(&x.device("x"), &ServiceIdentity::TINY_CHAT)
            .await
            .unwrap();
        let connect = tokio::spawn(socket.connect());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!connect.is_finished());

        air.release(addr(1));
        let stream = timeout(Duration::from_secs(1), connect)
            .await
            .expect("connect should complete after release")
            .unwrap();
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let air = LoopbackAir::new();
        let x = air.radio(addr(1));
        let y = air.radio(addr(2));
        let mut listener = x.listen(&ServiceIdentity::TINY_CHAT).await.unwrap();

        let socket = y
            .open_socket(&x.device("x"), &ServiceIdentity::TINY_CHAT)
            .await
            .unwrap();
        let mut dialed = socket.connect().await.unwrap();
        let (mut accepted, _) = listener.accept().await.unwrap();

        y.inject_write_failures(true);
        let err = dialed.write_all(b"lost").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        accepted.write_all(b"still").await.unwrap();
        let mut buf = [0u8; 5];
        dialed.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"still");
    }
}
