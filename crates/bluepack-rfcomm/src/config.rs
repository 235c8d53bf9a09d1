//! RFCOMM radio configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the BlueZ-backed radio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfcommConfig {
    /// Adapter to use, e.g. `hci0`; `None` picks the default adapter
    pub adapter_name: Option<String>,
    /// Power the adapter on at startup if it is off
    pub power_on: bool,
    /// Require an authenticated (paired) link
    pub require_authentication: bool,
    /// Require the user to authorize each inbound connection
    pub require_authorization: bool,
    /// How long the adapter stays discoverable after `make_discoverable`
    pub discoverable_timeout: Duration,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            adapter_name: None,
            power_on: true,
            // Insecure links, like the serial-port chat apps this talks to
            require_authentication: false,
            require_authorization: false,
            discoverable_timeout: Duration::from_secs(30),
        }
    }
}

impl RfcommConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the adapter called `name`
    pub fn with_adapter_name(mut self, name: impl Into<String>) -> Self {
        self.adapter_name = Some(name.into());
        self
    }

    /// Enable or disable powering the adapter on
    pub fn with_power_on(mut self, enabled: bool) -> Self {
        self.power_on = enabled;
        self
    }

    /// Require authentication on every link
    pub fn with_authentication(mut self, required: bool) -> Self {
        self.require_authentication = required;
        self
    }

    /// Require authorization of inbound links
    pub fn with_authorization(mut self, required: bool) -> Self {
        self.require_authorization = required;
        self
    }

    /// Set the discoverable window
    pub fn with_discoverable_timeout(mut self, timeout: Duration) -> Self {
        self.discoverable_timeout = timeout;
        self
    }
}
