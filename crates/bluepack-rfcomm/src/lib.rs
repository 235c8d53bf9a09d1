//! Bluetooth RFCOMM radio for bluepack
//!
//! This crate implements the [`Radio`](bluepack_core::Radio) seam from
//! `bluepack-core` on top of BlueZ, so a
//! [`ConnectionManager`](bluepack_core::ConnectionManager) can listen for and
//! dial real devices.
//!
//! ## Architecture
//!
//! - [`config`] - adapter selection and security settings
//! - [`error`] - backend errors and their mapping onto `std::io::Error`
//! - [`radio`] - the [`RfcommRadio`] itself
//!
//! Listening registers a server profile for the service UUID, which also
//! publishes the SDP record peers look the channel up with. Dialing registers
//! a client profile and asks BlueZ to connect it to the chosen device.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bluepack_core::{ConnectionManager, LinkConfig};
//! use bluepack_rfcomm::{RfcommConfig, RfcommRadio};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let radio = RfcommRadio::new(RfcommConfig::new().with_adapter_name("hci0")).await?;
//! let manager = ConnectionManager::new(Arc::new(radio), LinkConfig::default())?;
//! manager.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Linux**: full support via the `bluer` crate and BlueZ
//! - **Other platforms**: [`RfcommRadio::new`] returns
//!   [`RfcommError::Unsupported`]

pub mod config;
pub mod error;
pub mod radio;

pub use config::RfcommConfig;
pub use error::{Result, RfcommError};
pub use radio::RfcommRadio;
