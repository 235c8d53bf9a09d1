//! Link manager configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{LinkError, Result};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Tunables for the listen, dial and transfer workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Upper bound on bytes returned by one read of the session stream
    pub read_buffer_size: usize,
    /// Pause before re-entering accept after an accept error
    pub accept_retry_delay: Duration,
    /// Consecutive accept errors tolerated before the listener gives up
    pub max_accept_failures: u32,
    /// Bound on a single connect; `None` waits as long as the radio does
    pub connect_timeout: Option<Duration>,
    /// Capacity of the connection event broadcast channel
    pub event_buffer_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            accept_retry_delay: Duration::from_millis(500),
            max_accept_failures: 5,
            connect_timeout: None,
            event_buffer_size: 64,
        }
    }
}

impl LinkConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read buffer size
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the delay between accept retries
    pub fn with_accept_retry_delay(mut self, delay: Duration) -> Self {
        self.accept_retry_delay = delay;
        self
    }

    /// Set how many consecutive accept errors end the listener
    pub fn with_max_accept_failures(mut self, failures: u32) -> Self {
        self.max_accept_failures = failures;
        self
    }

    /// Bound every connect by `timeout`
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the event channel capacity
    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    /// Reject values the workers cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(LinkError::InvalidConfiguration {
                reason: "read buffer size must be greater than 0".to_string(),
            });
        }
        if self.max_accept_failures == 0 {
            return Err(LinkError::InvalidConfiguration {
                reason: "max accept failures must be greater than 0".to_string(),
            });
        }
        if self.event_buffer_size == 0 {
            return Err(LinkError::InvalidConfiguration {
                reason: "event buffer size must be greater than 0".to_string(),
            });
        }
        if self.connect_timeout == Some(Duration::ZERO) {
            return Err(LinkError::InvalidConfiguration {
                reason: "connect timeout must be greater than 0 when set".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.connect_timeout, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(LinkConfig::new().with_read_buffer_size(0).validate().is_err());
        assert!(LinkConfig::new().with_max_accept_failures(0).validate().is_err());
        assert!(LinkConfig::new().with_event_buffer_size(0).validate().is_err());
        assert!(LinkConfig::new()
            .with_connect_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(LinkConfig::new()
            .with_connect_timeout(Duration::from_secs(3))
            .validate()
            .is_ok());
    }
}
