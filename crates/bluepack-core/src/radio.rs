//! Radio seam
//!
//! The workers never touch a concrete socket API. They go through these traits,
//! implemented by the in-memory [`LoopbackRadio`](crate::loopback::LoopbackRadio)
//! and by the BlueZ backend in `bluepack-rfcomm`.
//!
//! Errors crossing this seam are plain `std::io::Error`; the workers translate
//! them into [`LinkError`](crate::LinkError) variants.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::types::{PeerAddress, PeerDevice, ServiceIdentity};

// ----------------------------------------------------------------------------
// Stream Types
// ----------------------------------------------------------------------------

/// Connected bidirectional byte stream
pub trait RfcommStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RfcommStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased connected stream
pub type BoxedStream = Box<dyn RfcommStream>;

// ----------------------------------------------------------------------------
// Radio Traits
// ----------------------------------------------------------------------------

/// Access to the local radio
#[async_trait]
pub trait Radio: Send + Sync + 'static {
    /// Open a listening endpoint advertising `service`
    async fn listen(&self, service: &ServiceIdentity) -> io::Result<Box<dyn ServiceListener>>;

    /// Create an unconnected outbound socket toward `peer`
    async fn open_socket(
        &self,
        peer: &PeerDevice,
        service: &ServiceIdentity,
    ) -> io::Result<Box<dyn OutboundSocket>>;

    /// Stop any discovery scan, which slows connection setup down
    fn cancel_discovery(&self) {}
}

/// An advertised endpoint waiting for inbound peers
///
/// Dropping the listener stops advertising.
#[async_trait]
pub trait ServiceListener: Send + 'static {
    /// Wait for the next inbound connection
    async fn accept(&mut self) -> io::Result<(BoxedStream, PeerAddress)>;
}

/// An outbound socket that has not connected yet
///
/// Dropping the socket (or the future returned by `connect`) closes it.
#[async_trait]
pub trait OutboundSocket: Send + 'static {
    /// Connect to the remote service
    async fn connect(self: Box<Self>) -> io::Result<BoxedStream>;
}
