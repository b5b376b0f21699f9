//! BLE communication module.
//!
//! Scanning, the GATT session state machine, the discovered service catalog
//! and event delivery, plus the btleplug backend they run on.

pub mod catalog;
pub mod radio;
pub mod router;
pub mod rssi;
pub mod scanner;
pub mod session;
pub mod transport;
pub mod uuids;

pub use catalog::{CharacteristicDescriptor, CharacteristicRef, ServiceCatalog, ServiceDescriptor};
pub use radio::{BleRadio, BtleplugTransport};
pub use router::{EventConsumer, EventRouter, EventSender, RoutedEvent};
pub use rssi::{ProximityBand, RssiPoller};
pub use scanner::{ScanCandidate, ScanSession, ScanSink};
pub use session::{
    FailureReason, GattSession, OperationKind, OperationRequest, SessionEvent, SessionState,
    TransportCallbacks,
};
pub use transport::{
    Advertisement, AdvertisementSource, GattStatus, GattTransport, PeripheralIdentity,
    TransportEvent,
};
pub use uuids::*;
