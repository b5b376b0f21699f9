// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # bdsk-ble
//!
//! BLE central-role session library for a single temperature-service
//! peripheral, built on btleplug.
//!
//! ## Features
//!
//! - **Scanning**: time-bounded discovery of peripherals advertising a given name
//! - **GATT sessions**: connect, discover, read, write, indications and RSSI,
//!   with at most one outstanding request per link
//! - **Service catalog**: snapshot of the connected peripheral's services,
//!   with expected-service validation
//! - **Event routing**: every outcome is delivered, in order, to one consumer
//!   running off the radio's callback threads
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bdsk_ble::{
//!     BleRadio, EventConsumer, EventRouter, GattSession, PeripheralIdentity, Result,
//!     ScanConfig, ScanSession, SessionConfig, SessionEvent,
//! };
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl EventConsumer for Printer {
//!     fn on_session_event(&mut self, event: SessionEvent) {
//!         println!("{:?}", event);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let radio = Arc::new(BleRadio::acquire().await?);
//!     let router = EventRouter::spawn(Printer);
//!
//!     // Look for the peripheral for a few seconds
//!     let scanner = ScanSession::new(radio.clone());
//!     scanner
//!         .start(&ScanConfig::default(), Arc::new(router.sender()))
//!         .await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     scanner.stop().await;
//!
//!     // Connect and discover services
//!     let session = GattSession::new(
//!         radio.gatt_transport(),
//!         router.sender(),
//!         SessionConfig::default().with_discover_on_connect(true),
//!     );
//!     session.connect(PeripheralIdentity::new("AA:BB:CC:DD:EE:FF", "Miji_Bluetooth01"))?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     session.disconnect()?;
//!
//!     router.shutdown().await;
//!     radio.release();
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod utils;

// Re-exports for convenience
pub use config::{ScanConfig, SessionConfig, DEFAULT_DEVICE_NAME};
pub use error::{Error, Result};
pub use utils::{celsius_to_fahrenheit, fahrenheit_to_celsius, hex_string, temperature_key};

// Re-export commonly used types from submodules
pub use ble::{
    BleRadio, CharacteristicDescriptor, CharacteristicRef, EventConsumer, EventRouter,
    EventSender, FailureReason, GattSession, GattStatus, OperationKind, OperationRequest,
    PeripheralIdentity, ProximityBand, RoutedEvent, RssiPoller, ScanCandidate, ScanSession,
    ScanSink, ServiceCatalog, ServiceDescriptor, SessionEvent, SessionState,
};
pub use data::{TemperatureLookup, TemperatureTable};
