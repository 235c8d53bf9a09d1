//! Core data model: peer handles, the service identity and connection state

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::LinkError;

// ----------------------------------------------------------------------------
// Peer Address
// ----------------------------------------------------------------------------

/// 48-bit radio address, rendered most significant byte first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress([u8; 6]);

impl PeerAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for PeerAddress {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LinkError::InvalidAddress {
            input: s.to_string(),
        };

        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            let decoded = hex::decode(part).map_err(|_| invalid())?;
            *slot = decoded[0];
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; 6]> for PeerAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

// ----------------------------------------------------------------------------
// Peer Device
// ----------------------------------------------------------------------------

/// A remote device handle supplied by the discovery collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerDevice {
    /// Opaque identifier assigned by the discovery layer
    pub id: String,
    /// Human-readable device name
    pub name: String,
    /// Radio address used to dial the device
    pub address: PeerAddress,
}

impl PeerDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: PeerAddress) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address,
        }
    }

    /// Handle for a device known only by its address
    pub fn from_address(address: PeerAddress) -> Self {
        Self {
            id: address.to_string(),
            name: address.to_string(),
            address,
        }
    }
}

impl fmt::Display for PeerDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() || self.name == self.id {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.name, self.address)
        }
    }
}

// ----------------------------------------------------------------------------
// Service Identity
// ----------------------------------------------------------------------------

/// Service name and UUID both peers advertise and dial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceIdentity {
    pub name: &'static str,
    pub uuid: Uuid,
}

impl ServiceIdentity {
    /// Serial-port profile record shared by every bluepack process
    pub const TINY_CHAT: ServiceIdentity = ServiceIdentity {
        name: "BluetoothTinyChat",
        uuid: Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB),
    };
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self::TINY_CHAT
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.uuid)
    }
}

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Externally visible state of the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Listening,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Derive the state from which workers are currently alive
    pub fn derive(listening: bool, dialing: bool, transferring: bool) -> Self {
        if transferring {
            ConnectionState::Connected
        } else if dialing {
            ConnectionState::Connecting
        } else if listening {
            ConnectionState::Listening
        } else {
            ConnectionState::Idle
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Listening => "listening",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Identifier of one outbound dial attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a session came into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOrigin {
    Accepted,
    Dialed(AttemptId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parsing() {
        let addr: PeerAddress = "00:1a:7D:da:71:13".parse().unwrap();
        assert_eq!(addr.as_bytes(), &[0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]);
        assert_eq!(addr.to_string(), "00:1A:7D:DA:71:13");

        assert!("00:1A:7D:DA:71".parse::<PeerAddress>().is_err());
        assert!("00:1A:7D:DA:71:1G".parse::<PeerAddress>().is_err());
        assert!("001:A:7D:DA:71:13".parse::<PeerAddress>().is_err());
    }

    #[test]
    fn test_service_identity_uuid() {
        assert_eq!(
            ServiceIdentity::TINY_CHAT.uuid.to_string(),
            "00001101-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_state_derivation() {
        assert_eq!(ConnectionState::derive(false, false, false), ConnectionState::Idle);
        assert_eq!(ConnectionState::derive(true, false, false), ConnectionState::Listening);
        assert_eq!(ConnectionState::derive(true, true, false), ConnectionState::Connecting);
        assert_eq!(ConnectionState::derive(true, true, true), ConnectionState::Connected);
    }

    #[test]
    fn test_peer_display() {
        let addr = PeerAddress::new([1, 2, 3, 4, 5, 6]);
        assert_eq!(PeerDevice::from_address(addr).to_string(), "01:02:03:04:05:06");
        assert_eq!(
            PeerDevice::new("x", "phone", addr).to_string(),
            "phone (01:02:03:04:05:06)"
        );
    }
}
