//! Bluepack Core
//!
//! Point-to-point session management over a serial-port style radio link.
//!
//! A [`ConnectionManager`] runs up to three background workers:
//!
//! - a listen worker that advertises the service and accepts inbound peers,
//! - a dial worker that connects to one chosen peer,
//! - a transfer worker that owns the single active session.
//!
//! Whichever side connects first, at most one session is active at a time;
//! a newer session always replaces the older one. Incoming text is handed to
//! registered [`MessageSink`]s and lifecycle changes are broadcast as
//! [`ConnectionEvent`]s.
//!
//! The radio itself sits behind the [`Radio`] trait. [`LoopbackRadio`] is an
//! in-memory implementation for tests and demos; the BlueZ backend lives in
//! the `bluepack-rfcomm` crate.

pub mod config;
pub mod errors;
pub mod events;
pub mod loopback;
pub mod manager;
pub mod radio;
pub mod session;
pub mod sink;
pub mod types;
pub mod workers;

pub use config::LinkConfig;
pub use errors::{LinkError, Result};
pub use events::ConnectionEvent;
pub use loopback::{LoopbackAir, LoopbackRadio};
pub use manager::{ConnectionManager, ManagerStats};
pub use radio::{BoxedStream, OutboundSocket, Radio, RfcommStream, ServiceListener};
pub use session::Session;
pub use sink::{MessageSink, SinkRegistry, Subscription};
pub use types::{AttemptId, ConnectionState, PeerAddress, PeerDevice, ServiceIdentity, SessionOrigin};
