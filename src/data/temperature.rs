//! Temperature lookup for the peripheral's temperature characteristic.
//!
//! The peripheral reports an opaque code rather than a number. A vendor
//! supplied table maps the hex form of that code to a display string; this
//! module only provides the seam and a map-backed implementation.

use std::collections::HashMap;

use crate::ble::session::SessionEvent;
use crate::ble::uuids::TEMPERATURE_VALUE_CHARACTERISTIC_UUID;
use crate::utils::temperature_key;

/// Maps raw temperature payloads to display strings.
pub trait TemperatureLookup: Send + Sync {
    /// Look up a key produced by [`temperature_key`].
    fn lookup(&self, key: &str) -> Option<String>;

    /// Resolve a raw payload.
    fn resolve(&self, bytes: &[u8]) -> Option<String> {
        self.lookup(&temperature_key(bytes))
    }

    /// Resolve a session event carrying a temperature value.
    ///
    /// Only reads and pushes from the temperature value characteristic are
    /// considered.
    fn resolve_event(&self, event: &SessionEvent) -> Option<String> {
        match event {
            SessionEvent::NotificationReceived { target, value }
            | SessionEvent::CharacteristicRead { target, value, .. }
                if target.characteristic == TEMPERATURE_VALUE_CHARACTERISTIC_UUID =>
            {
                self.resolve(value)
            }
            _ => None,
        }
    }
}

/// In-memory temperature table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TemperatureTable {
    entries: HashMap<String, String>,
}

impl TemperatureTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry. Keys are normalized to trimmed lower case.
    pub fn insert(&mut self, key: impl AsRef<str>, display: impl Into<String>) {
        self.entries
            .insert(key.as_ref().trim().to_lowercase(), display.into());
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a notification, if it came from the temperature characteristic.
    pub fn resolve_notification(&self, event: &SessionEvent) -> Option<String> {
        match event {
            SessionEvent::NotificationReceived { .. } => self.resolve_event(event),
            _ => None,
        }
    }
}

impl TemperatureLookup for TemperatureTable {
    fn lookup(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for TemperatureTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (key, display) in iter {
            table.insert(key, display);
        }
        table
    }
}
