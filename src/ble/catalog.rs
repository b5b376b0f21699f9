//! Snapshot of the peripheral's GATT tree.
//!
//! The catalog is rebuilt wholesale after every successful discovery and is
//! emptied whenever the session disconnects, so a disconnected session never
//! resolves characteristics from an earlier link.

use btleplug::api::CharPropFlags;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// A (service, characteristic) UUID pair identifying an operation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicRef {
    /// UUID of the owning service.
    pub service: Uuid,
    /// UUID of the characteristic.
    pub characteristic: Uuid,
}

impl CharacteristicRef {
    /// Create a new reference.
    pub fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }
}

impl fmt::Display for CharacteristicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

/// A discovered characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Read/write/notify/indicate capability bits.
    pub properties: CharPropFlags,
    /// Last value seen on a read, write or notification. Display cache only.
    pub last_known_value: Option<Bytes>,
    /// Descriptor values keyed by descriptor UUID.
    pub descriptors: BTreeMap<Uuid, Bytes>,
}

impl CharacteristicDescriptor {
    /// Create a characteristic with no cached value and no descriptors.
    pub fn new(uuid: Uuid, properties: CharPropFlags) -> Self {
        Self {
            uuid,
            properties,
            last_known_value: None,
            descriptors: BTreeMap::new(),
        }
    }

    /// Add a descriptor entry.
    pub fn with_descriptor(mut self, uuid: Uuid, value: impl Into<Bytes>) -> Self {
        self.descriptors.insert(uuid, value.into());
        self
    }

    /// Whether the peer accepts reads.
    pub fn can_read(&self) -> bool {
        self.properties.contains(CharPropFlags::READ)
    }

    /// Whether the peer accepts writes, with or without response.
    pub fn can_write(&self) -> bool {
        self.properties
            .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
    }

    /// Whether the peer can push values (notify or indicate).
    pub fn can_push(&self) -> bool {
        self.properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
    }
}

/// A discovered service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Service UUID.
    pub uuid: Uuid,
    /// Distinguishes several instances of the same service UUID.
    pub instance_id: u16,
    /// Characteristics in discovery order.
    pub characteristics: Vec<CharacteristicDescriptor>,
}

impl ServiceDescriptor {
    /// Create an empty service.
    pub fn new(uuid: Uuid, instance_id: u16) -> Self {
        Self {
            uuid,
            instance_id,
            characteristics: Vec::new(),
        }
    }

    /// Append a characteristic.
    pub fn with_characteristic(mut self, characteristic: CharacteristicDescriptor) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    /// Find a characteristic by UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicDescriptor> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

type ServiceKey = (Uuid, u16);

/// In-memory catalog of the connected peripheral's services.
///
/// Readers never observe a mix of two snapshots: `replace` swaps the whole
/// map under the write lock.
#[derive(Debug, Default)]
pub struct ServiceCatalog {
    services: RwLock<BTreeMap<ServiceKey, ServiceDescriptor>>,
}

impl ServiceCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the whole snapshot.
    pub fn replace(&self, snapshot: Vec<ServiceDescriptor>) {
        let mut next = BTreeMap::new();
        for service in snapshot {
            let key = (service.uuid, service.instance_id);
            if next.insert(key, service).is_some() {
                warn!(
                    "Duplicate service {} instance {} in snapshot, keeping the last one",
                    key.0, key.1
                );
            }
        }

        debug!("Catalog replaced with {} services", next.len());
        *self.services.write() = next;
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.services.write().clear();
    }

    /// Resolve a characteristic. With several instances of one service UUID,
    /// the lowest instance id that carries the characteristic wins.
    pub fn lookup(&self, service: &Uuid, characteristic: &Uuid) -> Option<CharacteristicDescriptor> {
        self.services
            .read()
            .range((*service, u16::MIN)..=(*service, u16::MAX))
            .find_map(|(_, s)| s.characteristic(characteristic).cloned())
    }

    /// Resolve a [`CharacteristicRef`].
    pub fn lookup_ref(&self, target: &CharacteristicRef) -> Option<CharacteristicDescriptor> {
        self.lookup(&target.service, &target.characteristic)
    }

    /// Fetch one service instance.
    pub fn service(&self, uuid: &Uuid, instance_id: u16) -> Option<ServiceDescriptor> {
        self.services.read().get(&(*uuid, instance_id)).cloned()
    }

    /// Whether any instance of the service is present.
    pub fn contains_service(&self, uuid: &Uuid) -> bool {
        self.services
            .read()
            .range((*uuid, u16::MIN)..=(*uuid, u16::MAX))
            .next()
            .is_some()
    }

    /// Which of the given service UUIDs are absent.
    pub fn missing_services(&self, expected: &[Uuid]) -> Vec<Uuid> {
        expected
            .iter()
            .filter(|uuid| !self.contains_service(uuid))
            .copied()
            .collect()
    }

    /// Copy of the current snapshot, ordered by (uuid, instance id).
    pub fn services(&self) -> Vec<ServiceDescriptor> {
        self.services.read().values().cloned().collect()
    }

    /// Number of services in the snapshot.
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Cache a value seen on the wire. Returns false when the target is unknown.
    pub(crate) fn record_value(&self, target: &CharacteristicRef, value: &Bytes) -> bool {
        let mut services = self.services.write();
        let found = services
            .range_mut((target.service, u16::MIN)..=(target.service, u16::MAX))
            .find_map(|(_, s)| {
                s.characteristics
                    .iter_mut()
                    .find(|c| c.uuid == target.characteristic)
            });

        match found {
            Some(characteristic) => {
                characteristic.last_known_value = Some(value.clone());
                true
            }
            None => false,
        }
    }
}

/// Services exposed by a typical temperature peripheral.
#[cfg(test)]
pub(crate) fn temperature_peripheral() -> Vec<ServiceDescriptor> {
    use crate::ble::uuids::*;

    vec![
        ServiceDescriptor::new(GENERIC_ACCESS_SERVICE_UUID, 1)
            .with_characteristic(CharacteristicDescriptor::new(short_uuid(0x2a00), CharPropFlags::READ)),
        ServiceDescriptor::new(GENERIC_ATTRIBUTE_SERVICE_UUID, 5),
        ServiceDescriptor::new(DEVICE_INFO_SERVICE_UUID, 9)
            .with_characteristic(CharacteristicDescriptor::new(short_uuid(0x2a29), CharPropFlags::READ)),
        ServiceDescriptor::new(TEMPERATURE_SERVICE_UUID, 20)
            .with_characteristic(
                CharacteristicDescriptor::new(
                    TEMPERATURE_VALUE_CHARACTERISTIC_UUID,
                    CharPropFlags::READ | CharPropFlags::WRITE | CharPropFlags::INDICATE,
                )
                .with_descriptor(CLIENT_CHARACTERISTIC_CONFIG_UUID, vec![0x00, 0x00]),
            )
            .with_characteristic(CharacteristicDescriptor::new(
                TEMPERATURE_AUX_CHARACTERISTIC_UUID,
                CharPropFlags::NOTIFY,
            )),
    ]
}
