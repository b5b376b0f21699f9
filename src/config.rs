//! Caller-supplied configuration for scanning and sessions.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::EXPECTED_SERVICES;
use crate::error::{Error, Result};

/// Advertised name the temperature peripheral uses out of the box.
pub const DEFAULT_DEVICE_NAME: &str = "Miji_Bluetooth01";

/// Scan settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanConfig {
    /// Exact advertised name a peripheral must carry to be reported.
    pub name_filter: String,
    /// How long a scan runs before stopping on its own.
    pub duration: Duration,
}

impl ScanConfig {
    /// Default scan window.
    pub const DEFAULT_DURATION: Duration = Duration::from_secs(10);

    /// Create a scan configuration.
    pub fn new(name_filter: impl Into<String>, duration: Duration) -> Self {
        Self {
            name_filter: name_filter.into(),
            duration,
        }
    }

    /// Reject configurations that could never produce a sighting.
    pub fn validate(&self) -> Result<()> {
        if self.name_filter.is_empty() {
            return Err(Error::InvalidParameter {
                name: "name_filter".to_string(),
                value: String::new(),
            });
        }

        if self.duration.is_zero() {
            return Err(Error::InvalidParameter {
                name: "duration".to_string(),
                value: format!("{:?}", self.duration),
            });
        }

        Ok(())
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_NAME, Self::DEFAULT_DURATION)
    }
}

/// Session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Give up on a connection attempt after this long. `None` waits forever.
    pub connect_timeout: Option<Duration>,
    /// Start service discovery as soon as the link comes up.
    pub discover_on_connect: bool,
    /// Services the peripheral must expose; absences are reported, not fatal.
    pub expected_services: Vec<Uuid>,
}

impl SessionConfig {
    /// Default connection timeout.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable discovery on connect.
    pub fn with_discover_on_connect(mut self, enabled: bool) -> Self {
        self.discover_on_connect = enabled;
        self
    }

    /// Replace the expected service list.
    pub fn with_expected_services(mut self, services: impl IntoIterator<Item = Uuid>) -> Self {
        self.expected_services = services.into_iter().collect();
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Self::DEFAULT_CONNECT_TIMEOUT),
            discover_on_connect: false,
            expected_services: EXPECTED_SERVICES.to_vec(),
        }
    }
}
