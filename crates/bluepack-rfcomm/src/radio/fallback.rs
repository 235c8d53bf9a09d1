//! Fallback radio for platforms without BlueZ

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use bluepack_core::radio::{OutboundSocket, Radio, ServiceListener};
use bluepack_core::{PeerAddress, PeerDevice, ServiceIdentity};

use crate::config::RfcommConfig;
use crate::error::{Result, RfcommError};

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

/// Placeholder that refuses to start on this platform
pub struct RfcommRadio;

impl RfcommRadio {
    pub async fn new(config: RfcommConfig) -> Result<Self> {
        warn!(
            "RFCOMM is not supported on this platform (adapter {:?} ignored). \
            Use Linux with BlueZ, or the loopback radio for local testing.",
            config.adapter_name
        );
        Err(RfcommError::Unsupported)
    }

    pub fn adapter_name(&self) -> &str {
        "unsupported"
    }

    pub async fn local_address(&self) -> Result<PeerAddress> {
        Err(RfcommError::Unsupported)
    }

    pub async fn is_powered(&self) -> Result<bool> {
        Err(RfcommError::Unsupported)
    }

    pub async fn make_discoverable(&self) -> Result<()> {
        Err(RfcommError::Unsupported)
    }

    pub async fn paired_devices(&self) -> Result<Vec<PeerDevice>> {
        Err(RfcommError::Unsupported)
    }

    pub async fn discover(&self, _window: Duration) -> Result<Vec<PeerDevice>> {
        Err(RfcommError::Unsupported)
    }
}

#[async_trait]
impl Radio for RfcommRadio {
    async fn listen(&self, _service: &ServiceIdentity) -> io::Result<Box<dyn ServiceListener>> {
        Err(RfcommError::Unsupported.into())
    }

    async fn open_socket(
        &self,
        _peer: &PeerDevice,
        _service: &ServiceIdentity,
    ) -> io::Result<Box<dyn OutboundSocket>> {
        Err(RfcommError::Unsupported.into())
    }
}
