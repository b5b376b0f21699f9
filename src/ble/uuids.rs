//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants used to talk to the temperature peripheral,
//! plus helpers for the canonical string form used at the API boundary.

use uuid::Uuid;

use crate::error::{Error, Result};

/// The Bluetooth SIG base UUID that 16-bit aliases are expanded into.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit SIG-assigned alias into its full 128-bit UUID.
pub const fn short_uuid(alias: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((alias as u128) << 96))
}

// Core GATT services (Standard BLE)
/// Generic Access service UUID.
pub const GENERIC_ACCESS_SERVICE_UUID: Uuid = short_uuid(0x1800);
/// Generic Attribute service UUID.
pub const GENERIC_ATTRIBUTE_SERVICE_UUID: Uuid = short_uuid(0x1801);
/// Device Information service UUID.
pub const DEVICE_INFO_SERVICE_UUID: Uuid = short_uuid(0x180a);

// Temperature service (vendor-defined, 16-bit alias in the SIG base range)
/// Temperature service UUID.
pub const TEMPERATURE_SERVICE_UUID: Uuid = short_uuid(0xffe5);
/// Temperature value characteristic (indicate); payload is a lookup key.
pub const TEMPERATURE_VALUE_CHARACTERISTIC_UUID: Uuid = short_uuid(0xffe9);
/// Secondary temperature characteristic; payload meaning is undocumented.
pub const TEMPERATURE_AUX_CHARACTERISTIC_UUID: Uuid = short_uuid(0xffe0);

// Proximity profile (Standard BLE)
/// Immediate Alert service UUID.
pub const IMMEDIATE_ALERT_SERVICE_UUID: Uuid = short_uuid(0x1802);
/// Link Loss service UUID.
pub const LINK_LOSS_SERVICE_UUID: Uuid = short_uuid(0x1803);
/// Tx Power service UUID.
pub const TX_POWER_SERVICE_UUID: Uuid = short_uuid(0x1804);
/// Health Thermometer service UUID.
pub const HEALTH_THERMOMETER_SERVICE_UUID: Uuid = short_uuid(0x1809);
/// Alert Level characteristic UUID.
pub const ALERT_LEVEL_CHARACTERISTIC_UUID: Uuid = short_uuid(0x2a06);
/// Temperature Measurement characteristic UUID.
pub const TEMPERATURE_MEASUREMENT_CHARACTERISTIC_UUID: Uuid = short_uuid(0x2a1c);

/// Client Characteristic Configuration descriptor UUID.
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid = short_uuid(0x2902);

/// Services a temperature peripheral is expected to expose after discovery.
pub const EXPECTED_SERVICES: [Uuid; 4] = [
    GENERIC_ACCESS_SERVICE_UUID,
    GENERIC_ATTRIBUTE_SERVICE_UUID,
    DEVICE_INFO_SERVICE_UUID,
    TEMPERATURE_SERVICE_UUID,
];

/// Parse a UUID in canonical hyphenated form (`8-4-4-4-12`), ignoring case.
///
/// # Errors
///
/// Returns [`Error::InvalidUuid`] for anything that is not a hyphenated UUID.
pub fn parse_uuid(value: &str) -> Result<Uuid> {
    let trimmed = value.trim();
    if trimmed.len() != 36 {
        return Err(Error::InvalidUuid {
            value: value.to_string(),
        });
    }

    Uuid::try_parse(trimmed).map_err(|_| Error::InvalidUuid {
        value: value.to_string(),
    })
}

/// Check if a service UUID is the vendor temperature service.
pub fn is_temperature_service(uuid: &Uuid) -> bool {
    *uuid == TEMPERATURE_SERVICE_UUID
}
