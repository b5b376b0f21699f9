//! Transport seam between the session logic and the radio.
//!
//! A [`GattTransport`] accepts requests without blocking and reports their
//! completions later, from its own background context, through the
//! [`TransportCallbacks`] handed to it on connect. An [`AdvertisementSource`]
//! does the same for scanning.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;

use crate::ble::catalog::{CharacteristicRef, ServiceDescriptor};
use crate::ble::session::TransportCallbacks;
use crate::error::Result;

/// Identity of a peripheral as obtained from a scan result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralIdentity {
    /// Opaque transport address.
    pub address: String,
    /// Advertised local name.
    pub name: String,
}

impl PeripheralIdentity {
    /// Create a new identity.
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PeripheralIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.address)
    }
}

/// ATT/GATT status code reported with a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GattStatus(pub u16);

impl GattStatus {
    /// Operation completed successfully.
    pub const SUCCESS: Self = Self(0x0000);
    /// The attribute cannot be read.
    pub const READ_NOT_PERMITTED: Self = Self(0x0002);
    /// The attribute cannot be written.
    pub const WRITE_NOT_PERMITTED: Self = Self(0x0003);
    /// Authentication is required.
    pub const INSUFFICIENT_AUTHENTICATION: Self = Self(0x0005);
    /// The request is not supported by the peer.
    pub const REQUEST_NOT_SUPPORTED: Self = Self(0x0006);
    /// Encryption is required.
    pub const INSUFFICIENT_ENCRYPTION: Self = Self(0x000f);
    /// Generic failure reported by the local stack.
    pub const FAILURE: Self = Self(0x0101);

    /// Whether this is [`GattStatus::SUCCESS`].
    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SUCCESS => write!(f, "success"),
            Self::READ_NOT_PERMITTED => write!(f, "read not permitted"),
            Self::WRITE_NOT_PERMITTED => write!(f, "write not permitted"),
            Self::INSUFFICIENT_AUTHENTICATION => write!(f, "insufficient authentication"),
            Self::REQUEST_NOT_SUPPORTED => write!(f, "request not supported"),
            Self::INSUFFICIENT_ENCRYPTION => write!(f, "insufficient encryption"),
            Self::FAILURE => write!(f, "failure"),
            Self(code) => write!(f, "status {:#06x}", code),
        }
    }
}

/// Completion or unsolicited event raised by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The link came up or went down.
    ConnectionStateChanged {
        /// Whether the link is now up.
        connected: bool,
        /// Status reported with the change.
        status: GattStatus,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        /// Discovery status.
        status: GattStatus,
        /// The full discovered tree.
        services: Vec<ServiceDescriptor>,
    },
    /// A characteristic read finished.
    CharacteristicRead {
        /// Read target.
        target: CharacteristicRef,
        /// Value read (empty on failure).
        value: Bytes,
        /// Read status.
        status: GattStatus,
    },
    /// A characteristic write finished.
    CharacteristicWritten {
        /// Write target.
        target: CharacteristicRef,
        /// Write status.
        status: GattStatus,
    },
    /// The client characteristic configuration write finished.
    IndicationStateWritten {
        /// Characteristic whose indications were toggled.
        target: CharacteristicRef,
        /// Write status.
        status: GattStatus,
    },
    /// The peer pushed a value (notification or indication).
    CharacteristicChanged {
        /// Source characteristic.
        target: CharacteristicRef,
        /// Pushed value.
        value: Bytes,
    },
    /// A remote RSSI read finished.
    RemoteRssi {
        /// Signal strength in dBm.
        rssi: i16,
        /// Read status.
        status: GattStatus,
    },
}

/// A GATT client connection to one peripheral.
///
/// Every method only hands the request off; the outcome is reported later
/// through the callbacks given to [`GattTransport::connect`]. An `Err` means
/// the request was rejected before reaching the radio.
#[cfg_attr(test, mockall::automock)]
pub trait GattTransport: Send + Sync {
    /// Whether a usable radio backs this transport.
    fn is_available(&self) -> bool;

    /// Start connecting to `peer`; completions for this link go to `callbacks`.
    fn connect(&self, peer: &PeripheralIdentity, callbacks: TransportCallbacks) -> Result<()>;

    /// Tear the link down.
    fn disconnect(&self) -> Result<()>;

    /// Start service discovery.
    fn discover_services(&self) -> Result<()>;

    /// Start a characteristic read.
    fn read_characteristic(&self, target: &CharacteristicRef) -> Result<()>;

    /// Start a characteristic write.
    fn write_characteristic(&self, target: &CharacteristicRef, payload: &[u8]) -> Result<()>;

    /// Enable or disable indications on a characteristic.
    fn set_indication(&self, target: &CharacteristicRef, enabled: bool) -> Result<()>;

    /// Start a remote RSSI read.
    fn read_rssi(&self) -> Result<()>;
}

/// One advertisement seen by the radio.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// Who advertised.
    pub identity: PeripheralIdentity,
    /// Raw advertising payload.
    pub data: Bytes,
    /// Signal strength in dBm.
    pub rssi: i16,
}

/// Producer of raw advertisements.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdvertisementSource: Send + Sync {
    /// Start radio scanning, feeding every advertisement into `sink`.
    ///
    /// `name_filter` is a hint; callers still filter what they receive.
    async fn start_scan(
        &self,
        name_filter: String,
        sink: mpsc::UnboundedSender<Advertisement>,
    ) -> Result<()>;

    /// Stop radio scanning.
    async fn stop_scan(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gatt_status_display() {
        assert_eq!(GattStatus::SUCCESS.to_string(), "success");
        assert_eq!(GattStatus::FAILURE.to_string(), "failure");
        assert_eq!(GattStatus(0x85).to_string(), "status 0x0085");
        assert!(GattStatus::SUCCESS.is_success());
        assert!(!GattStatus::WRITE_NOT_PERMITTED.is_success());
    }

    #[test]
    fn test_identity_display() {
        let identity = PeripheralIdentity::new("AA:BB:CC:DD:EE:FF", "Miji_Bluetooth01");
        assert_eq!(identity.to_string(), "Miji_Bluetooth01 [AA:BB:CC:DD:EE:FF]");
    }
}
