//! Error types for the RFCOMM radio

use std::io;

use bluepack_core::PeerAddress;
use thiserror::Error;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the BlueZ backend
#[derive(Error, Debug)]
pub enum RfcommError {
    #[error("BlueZ session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Bluetooth adapter not available: {0}")]
    AdapterNotAvailable(String),

    #[error("Bluetooth adapter {adapter} is powered off")]
    AdapterPoweredOff { adapter: String },

    #[error("Failed to register profile {uuid}: {reason}")]
    ProfileRegistration { uuid: Uuid, reason: String },

    #[error("Profile {uuid} is no longer registered")]
    ProfileClosed { uuid: Uuid },

    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed { address: PeerAddress, reason: String },

    #[error("Failed to accept connection from {address}: {reason}")]
    AcceptFailed { address: PeerAddress, reason: String },

    #[error("Device discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("RFCOMM is only supported on Linux")]
    Unsupported,
}

/// Result type for RFCOMM operations
pub type Result<T> = std::result::Result<T, RfcommError>;

impl From<RfcommError> for io::Error {
    fn from(err: RfcommError) -> Self {
        let kind = match &err {
            RfcommError::SessionUnavailable(_)
            | RfcommError::AdapterNotAvailable(_)
            | RfcommError::AdapterPoweredOff { .. } => io::ErrorKind::NotConnected,
            RfcommError::ProfileRegistration { .. } => io::ErrorKind::AddrInUse,
            RfcommError::ProfileClosed { .. } | RfcommError::AcceptFailed { .. } => {
                io::ErrorKind::ConnectionAborted
            }
            RfcommError::ConnectFailed { .. } => io::ErrorKind::ConnectionRefused,
            RfcommError::DiscoveryFailed(_) => io::ErrorKind::Other,
            RfcommError::Unsupported => io::ErrorKind::Unsupported,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_mapping_keeps_message() {
        let err: io::Error = RfcommError::ConnectFailed {
            address: PeerAddress::new([0, 0x1A, 0x7D, 0xDA, 0x71, 0x13]),
            reason: "Host is down".to_string(),
        }
        .into();

        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert_eq!(
            err.to_string(),
            "Failed to connect to 00:1A:7D:DA:71:13: Host is down"
        );
    }

    #[test]
    fn test_powered_off_is_not_connected() {
        let err: io::Error = RfcommError::AdapterPoweredOff {
            adapter: "hci0".to_string(),
        }
        .into();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
