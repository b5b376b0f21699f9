//! btleplug-backed radio, advertisement source and GATT transport.
//!
//! [`BleRadio`] is the process-wide handle to the Bluetooth adapter. It is
//! acquired once at startup, shared with the scan and GATT sessions, and
//! released at shutdown; after release every user sees the radio as
//! unavailable.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::catalog::{CharacteristicDescriptor, CharacteristicRef, ServiceDescriptor};
use crate::ble::session::{OperationKind, TransportCallbacks};
use crate::ble::transport::{
    Advertisement, AdvertisementSource, GattStatus, GattTransport, PeripheralIdentity,
    TransportEvent,
};
use crate::ble::uuids::short_uuid;
use crate::error::{Error, Result};

/// Handle to the host Bluetooth adapter.
pub struct BleRadio {
    adapter: Adapter,
    runtime: Handle,
    released: Arc<AtomicBool>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

impl BleRadio {
    /// Acquire the first Bluetooth adapter on the host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RadioUnavailable`] if there is no usable adapter.
    pub async fn acquire() -> Result<Self> {
        let manager = Manager::new().await.map_err(|e| {
            warn!("Bluetooth manager unavailable: {}", e);
            Error::RadioUnavailable
        })?;

        let adapter = manager
            .adapters()
            .await
            .map_err(|e| {
                warn!("Failed to list Bluetooth adapters: {}", e);
                Error::RadioUnavailable
            })?
            .into_iter()
            .next()
            .ok_or(Error::RadioUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter, Handle::current()))
    }

    /// Wrap a specific adapter; background work is spawned on `runtime`.
    pub fn with_adapter(adapter: Adapter, runtime: Handle) -> Self {
        Self {
            adapter,
            runtime,
            released: Arc::new(AtomicBool::new(false)),
            scan_task: Mutex::new(None),
        }
    }

    /// Whether the radio is still held.
    pub fn is_available(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
    }

    /// Give the radio up. Idempotent.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            info!("Releasing Bluetooth adapter");
        }
        if let Some(task) = self.scan_task.lock().take() {
            task.abort();
        }
    }

    /// The underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// A GATT transport over this radio, for one [`GattSession`].
    ///
    /// [`GattSession`]: crate::ble::session::GattSession
    pub fn gatt_transport(&self) -> Arc<BtleplugTransport> {
        Arc::new(BtleplugTransport {
            adapter: self.adapter.clone(),
            runtime: self.runtime.clone(),
            released: self.released.clone(),
            link: Arc::new(Mutex::new(None)),
        })
    }

    async fn forward(
        adapter: &Adapter,
        id: btleplug::platform::PeripheralId,
        sink: &mpsc::UnboundedSender<Advertisement>,
    ) -> bool {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return true;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return true,
        };

        let Some(name) = properties.local_name.clone() else {
            return true;
        };

        sink.send(Advertisement {
            identity: PeripheralIdentity::new(id.to_string(), name),
            data: encode_advertisement(&properties),
            rssi: properties.rssi.unwrap_or(i16::MIN),
        })
        .is_ok()
    }
}

#[async_trait]
impl AdvertisementSource for BleRadio {
    async fn start_scan(
        &self,
        name_filter: String,
        sink: mpsc::UnboundedSender<Advertisement>,
    ) -> Result<()> {
        if !self.is_available() {
            return Err(Error::RadioUnavailable);
        }

        let mut events = self.adapter.events().await.map_err(|e| {
            warn!("Failed to get adapter events: {}", e);
            Error::RadioUnavailable
        })?;

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| {
                warn!("Radio refused to scan: {}", e);
                Error::RadioUnavailable
            })?;

        debug!("Radio scanning, hint \"{}\"", name_filter);

        let adapter = self.adapter.clone();
        let task = self.runtime.spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ManufacturerDataAdvertisement { id, .. }
                    | CentralEvent::ServiceDataAdvertisement { id, .. }
                    | CentralEvent::ServicesAdvertisement { id, .. } => id,
                    _ => continue,
                };

                if !Self::forward(&adapter, id, &sink).await {
                    break;
                }
            }
            debug!("Advertisement pump ended");
        });

        if let Some(previous) = self.scan_task.lock().replace(task) {
            previous.abort();
        }

        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        if let Some(task) = self.scan_task.lock().take() {
            task.abort();
        }
        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }
}

impl Drop for BleRadio {
    fn drop(&mut self) {
        self.release();
    }
}

/// Rebuild advertising data structures from parsed peripheral properties.
///
/// The host stack only exposes the parsed form, so this produces a
/// canonical payload: local name, service UUIDs, service data, then
/// manufacturer data.
pub fn encode_advertisement(properties: &PeripheralProperties) -> Bytes {
    let mut out = BytesMut::new();

    let mut push = |ad_type: u8, body: &[u8]| {
        if body.len() > 254 {
            return;
        }
        out.put_u8(body.len() as u8 + 1);
        out.put_u8(ad_type);
        out.put_slice(body);
    };

    if let Some(name) = &properties.local_name {
        let name = name.as_bytes();
        push(0x09, &name[..name.len().min(29)]);
    }

    for uuid in &properties.services {
        match short_alias(uuid) {
            Some(alias) => push(0x03, &alias.to_le_bytes()),
            None => push(0x07, &uuid.as_u128().to_le_bytes()),
        }
    }

    let service_data: BTreeMap<_, _> = properties.service_data.iter().collect();
    for (uuid, data) in service_data {
        let mut body = Vec::with_capacity(data.len() + 16);
        let ad_type = match short_alias(uuid) {
            Some(alias) => {
                body.extend_from_slice(&alias.to_le_bytes());
                0x16
            }
            None => {
                body.extend_from_slice(&uuid.as_u128().to_le_bytes());
                0x21
            }
        };
        body.extend_from_slice(data);
        push(ad_type, &body);
    }

    let manufacturer_data: BTreeMap<_, _> = properties.manufacturer_data.iter().collect();
    for (company, data) in manufacturer_data {
        let mut body = company.to_le_bytes().to_vec();
        body.extend_from_slice(data);
        push(0xff, &body);
    }

    out.freeze()
}

fn short_alias(uuid: &Uuid) -> Option<u16> {
    let alias = (uuid.as_u128() >> 96) as u32;
    u16::try_from(alias)
        .ok()
        .filter(|alias| short_uuid(*alias) == *uuid)
}

/// Flatten btleplug's service tree into catalog descriptors.
///
/// Instance ids count repeated occurrences of the same service UUID.
pub fn catalog_from_services(services: impl IntoIterator<Item = Service>) -> Vec<ServiceDescriptor> {
    let mut seen: HashMap<Uuid, u16> = HashMap::new();

    services
        .into_iter()
        .map(|service| {
            let instance = seen.entry(service.uuid).or_insert(0);
            let mut descriptor = ServiceDescriptor::new(service.uuid, *instance);
            *instance += 1;

            for characteristic in service.characteristics {
                let mut entry =
                    CharacteristicDescriptor::new(characteristic.uuid, characteristic.properties);
                for d in characteristic.descriptors {
                    entry = entry.with_descriptor(d.uuid, Bytes::new());
                }
                descriptor = descriptor.with_characteristic(entry);
            }

            descriptor
        })
        .collect()
}

fn status_for(error: &btleplug::Error) -> GattStatus {
    match error {
        btleplug::Error::PermissionDenied => GattStatus::INSUFFICIENT_AUTHENTICATION,
        btleplug::Error::NotSupported(_) => GattStatus::REQUEST_NOT_SUPPORTED,
        _ => GattStatus::FAILURE,
    }
}

/// Log a failed disconnect; returns whether it failed.
fn log_teardown(
    peer: &(dyn std::fmt::Display + Sync),
    result: std::result::Result<(), btleplug::Error>,
) -> bool {
    match result {
        Ok(()) => false,
        Err(e) => {
            warn!("Failed to disconnect from {}: {}", peer, e);
            true
        }
    }
}

struct Link {
    callbacks: TransportCallbacks,
    peripheral: Option<Peripheral>,
    tasks: Vec<JoinHandle<()>>,
}

impl Link {
    fn abort(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// [`GattTransport`] over a btleplug peripheral.
pub struct BtleplugTransport {
    adapter: Adapter,
    runtime: Handle,
    released: Arc<AtomicBool>,
    link: Arc<Mutex<Option<Link>>>,
}

impl BtleplugTransport {
    /// Peripheral and callbacks of the established link.
    fn established(&self, operation: OperationKind) -> Result<(Peripheral, TransportCallbacks)> {
        let link = self.link.lock();
        link.as_ref()
            .and_then(|l| l.peripheral.clone().map(|p| (p, l.callbacks.clone())))
            .ok_or_else(|| Error::TransportFailure {
                operation,
                reason: "not connected".to_string(),
            })
    }

    fn characteristic(
        peripheral: &Peripheral,
        target: &CharacteristicRef,
        operation: OperationKind,
    ) -> Result<Characteristic> {
        peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == target.service)
            .and_then(|s| {
                s.characteristics
                    .into_iter()
                    .find(|c| c.uuid == target.characteristic)
            })
            .ok_or_else(|| Error::TransportFailure {
                operation,
                reason: format!("{} not present on peripheral", target),
            })
    }

    fn track(&self, link_id: u64, task: JoinHandle<()>) {
        match self.link.lock().as_mut() {
            Some(link) if link.callbacks.link() == link_id => link.tasks.push(task),
            _ => task.abort(),
        }
    }

    async fn open(adapter: &Adapter, peer: &PeripheralIdentity) -> Result<Peripheral> {
        let peripheral = adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.id().to_string() == peer.address)
            .ok_or_else(|| Error::TransportFailure {
                operation: OperationKind::Connect,
                reason: format!("{} is not known to the adapter", peer.address),
            })?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral.connect().await?;
        }

        Ok(peripheral)
    }

    async fn watch_notifications(peripheral: Peripheral, callbacks: TransportCallbacks) {
        let mut notifications = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to get notifications stream: {}", e);
                return;
            }
        };

        while let Some(notification) = notifications.next().await {
            let service = peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == notification.uuid)
                .map(|c| c.service_uuid);

            let Some(service) = service else {
                trace!("Push from unknown characteristic {}", notification.uuid);
                continue;
            };

            callbacks.deliver(TransportEvent::CharacteristicChanged {
                target: CharacteristicRef::new(service, notification.uuid),
                value: Bytes::from(notification.value),
            });
        }

        debug!("Notification stream ended");
    }

    async fn watch_disconnect(adapter: Adapter, peripheral: Peripheral, callbacks: TransportCallbacks) {
        let mut events = match adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to get adapter events: {}", e);
                return;
            }
        };

        let id = peripheral.id();
        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDisconnected(gone) = event {
                if gone == id {
                    debug!("Peripheral {} dropped the link", id);
                    callbacks.deliver(TransportEvent::ConnectionStateChanged {
                        connected: false,
                        status: GattStatus::SUCCESS,
                    });
                    break;
                }
            }
        }
    }
}

impl GattTransport for BtleplugTransport {
    fn is_available(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
    }

    fn connect(&self, peer: &PeripheralIdentity, callbacks: TransportCallbacks) -> Result<()> {
        let link_id = callbacks.link();
        if let Some(mut previous) = self.link.lock().replace(Link {
            callbacks: callbacks.clone(),
            peripheral: None,
            tasks: Vec::new(),
        }) {
            previous.abort();
        }

        let adapter = self.adapter.clone();
        let link = self.link.clone();
        let runtime = self.runtime.clone();
        let peer = peer.clone();

        let task = self.runtime.spawn(async move {
            let peripheral = match Self::open(&adapter, &peer).await {
                Ok(p) => p,
                Err(e) => {
                    warn!("Failed to connect to {}: {}", peer, e);
                    let status = match &e {
                        Error::Bluetooth(inner) => status_for(inner),
                        _ => GattStatus::FAILURE,
                    };
                    callbacks.deliver(TransportEvent::ConnectionStateChanged {
                        connected: false,
                        status,
                    });
                    return;
                }
            };

            let current = match link.lock().as_mut() {
                Some(l) if l.callbacks.link() == link_id => {
                    l.peripheral = Some(peripheral.clone());
                    l.tasks.push(runtime.spawn(Self::watch_notifications(
                        peripheral.clone(),
                        callbacks.clone(),
                    )));
                    l.tasks.push(runtime.spawn(Self::watch_disconnect(
                        adapter.clone(),
                        peripheral.clone(),
                        callbacks.clone(),
                    )));
                    true
                }
                _ => false,
            };

            if !current {
                debug!("Link to {} abandoned while connecting", peer);
                log_teardown(&peer, peripheral.disconnect().await);
                return;
            }

            callbacks.deliver(TransportEvent::ConnectionStateChanged {
                connected: true,
                status: GattStatus::SUCCESS,
            });
        });

        self.track(link_id, task);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let Some(mut link) = self.link.lock().take() else {
            return Ok(());
        };
        link.abort();

        if let Some(peripheral) = link.peripheral {
            self.runtime.spawn(async move {
                let peer = peripheral.id().to_string();
                log_teardown(&peer, peripheral.disconnect().await);
            });
        }

        Ok(())
    }

    fn discover_services(&self) -> Result<()> {
        let (peripheral, callbacks) = self.established(OperationKind::DiscoverServices)?;

        self.runtime.spawn(async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => TransportEvent::ServicesDiscovered {
                    status: GattStatus::SUCCESS,
                    services: catalog_from_services(peripheral.services()),
                },
                Err(e) => {
                    warn!("Service discovery failed: {}", e);
                    TransportEvent::ServicesDiscovered {
                        status: status_for(&e),
                        services: Vec::new(),
                    }
                }
            };
            callbacks.deliver(event);
        });

        Ok(())
    }

    fn read_characteristic(&self, target: &CharacteristicRef) -> Result<()> {
        let (peripheral, callbacks) = self.established(OperationKind::ReadCharacteristic)?;
        let characteristic =
            Self::characteristic(&peripheral, target, OperationKind::ReadCharacteristic)?;
        let target = *target;

        self.runtime.spawn(async move {
            let event = match peripheral.read(&characteristic).await {
                Ok(value) => TransportEvent::CharacteristicRead {
                    target,
                    value: Bytes::from(value),
                    status: GattStatus::SUCCESS,
                },
                Err(e) => TransportEvent::CharacteristicRead {
                    target,
                    value: Bytes::new(),
                    status: status_for(&e),
                },
            };
            callbacks.deliver(event);
        });

        Ok(())
    }

    fn write_characteristic(&self, target: &CharacteristicRef, payload: &[u8]) -> Result<()> {
        let (peripheral, callbacks) = self.established(OperationKind::WriteCharacteristic)?;
        let characteristic =
            Self::characteristic(&peripheral, target, OperationKind::WriteCharacteristic)?;
        let target = *target;
        let payload = payload.to_vec();

        self.runtime.spawn(async move {
            let status = match peripheral
                .write(&characteristic, &payload, WriteType::WithResponse)
                .await
            {
                Ok(()) => GattStatus::SUCCESS,
                Err(e) => status_for(&e),
            };
            callbacks.deliver(TransportEvent::CharacteristicWritten { target, status });
        });

        Ok(())
    }

    fn set_indication(&self, target: &CharacteristicRef, enabled: bool) -> Result<()> {
        let (peripheral, callbacks) = self.established(OperationKind::SetIndication)?;
        let characteristic =
            Self::characteristic(&peripheral, target, OperationKind::SetIndication)?;
        let target = *target;

        self.runtime.spawn(async move {
            let result = if enabled {
                peripheral.subscribe(&characteristic).await
            } else {
                peripheral.unsubscribe(&characteristic).await
            };
            let status = match result {
                Ok(()) => GattStatus::SUCCESS,
                Err(e) => status_for(&e),
            };
            callbacks.deliver(TransportEvent::IndicationStateWritten { target, status });
        });

        Ok(())
    }

    fn read_rssi(&self) -> Result<()> {
        let (peripheral, callbacks) = self.established(OperationKind::ReadRssi)?;

        self.runtime.spawn(async move {
            let event = match peripheral.properties().await {
                Ok(Some(PeripheralProperties { rssi: Some(rssi), .. })) => {
                    TransportEvent::RemoteRssi {
                        rssi,
                        status: GattStatus::SUCCESS,
                    }
                }
                Ok(_) => TransportEvent::RemoteRssi {
                    rssi: 0,
                    status: GattStatus::FAILURE,
                },
                Err(e) => TransportEvent::RemoteRssi {
                    rssi: 0,
                    status: status_for(&e),
                },
            };
            callbacks.deliver(event);
        });

        Ok(())
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        if let Some(mut link) = self.link.lock().take() {
            link.abort();
        }
    }
}
