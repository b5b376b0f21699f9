//! End-to-end flows through the public API with an in-memory radio.

use async_trait::async_trait;
use bdsk_ble::ble::uuids::*;
use bdsk_ble::ble::{
    Advertisement, AdvertisementSource, GattTransport, TransportCallbacks, TransportEvent,
};
use bdsk_ble::{
    CharacteristicDescriptor, CharacteristicRef, Error, EventConsumer, EventRouter,
    GattSession, GattStatus, OperationKind, PeripheralIdentity, Result, ScanCandidate,
    ScanConfig, ScanSession, ServiceDescriptor, SessionConfig, SessionEvent, SessionState,
};
use btleplug::api::CharPropFlags;
use bytes::Bytes;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";
const NAME: &str = "Miji_Bluetooth01";

#[derive(Default)]
struct Radio {
    advertisements: Mutex<Option<mpsc::UnboundedSender<Advertisement>>>,
    callbacks: Mutex<Option<TransportCallbacks>>,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl Radio {
    fn advertise(&self, name: &str, rssi: i16) {
        if let Some(tx) = self.advertisements.lock().as_ref() {
            let _ = tx.send(Advertisement {
                identity: PeripheralIdentity::new(ADDRESS, name),
                data: Bytes::from_static(&[0x02, 0x01, 0x06]),
                rssi,
            });
        }
    }

    /// Raise a completion from a separate thread, as a radio stack would.
    fn raise(&self, event: TransportEvent) {
        let callbacks = self.callbacks.lock().clone().expect("connected");
        std::thread::spawn(move || callbacks.deliver(event))
            .join()
            .unwrap();
    }
}

#[async_trait]
impl AdvertisementSource for Radio {
    async fn start_scan(
        &self,
        _name_filter: String,
        sink: mpsc::UnboundedSender<Advertisement>,
    ) -> Result<()> {
        *self.advertisements.lock() = Some(sink);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.advertisements.lock().take();
        Ok(())
    }
}

impl GattTransport for Radio {
    fn is_available(&self) -> bool {
        true
    }

    fn connect(&self, _peer: &PeripheralIdentity, callbacks: TransportCallbacks) -> Result<()> {
        *self.callbacks.lock() = Some(callbacks);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn discover_services(&self) -> Result<()> {
        Ok(())
    }

    fn read_characteristic(&self, _target: &CharacteristicRef) -> Result<()> {
        Ok(())
    }

    fn write_characteristic(&self, _target: &CharacteristicRef, payload: &[u8]) -> Result<()> {
        self.writes.lock().push(payload.to_vec());
        Ok(())
    }

    fn set_indication(&self, _target: &CharacteristicRef, _enabled: bool) -> Result<()> {
        Ok(())
    }

    fn read_rssi(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default, Clone)]
struct Transcript(Arc<Mutex<Vec<String>>>);

impl Transcript {
    fn lines(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

impl EventConsumer for Transcript {
    fn on_scan_started(&mut self) {
        self.0.lock().push("scan started".into());
    }

    fn on_candidate(&mut self, candidate: ScanCandidate) {
        self.0
            .lock()
            .push(format!("candidate {} {}", candidate.identity.address, candidate.rssi));
    }

    fn on_scan_stopped(&mut self) {
        self.0.lock().push("scan stopped".into());
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        let line = match event {
            SessionEvent::Connected => "connected".to_string(),
            SessionEvent::Disconnected => "disconnected".to_string(),
            SessionEvent::ServicesDiscovered { services, missing } => {
                format!("discovered {} missing {}", services, missing.len())
            }
            SessionEvent::CharacteristicRead { value, .. } => format!("read {:02x?}", &value[..]),
            SessionEvent::CharacteristicWritten { status, .. } => format!("written {}", status),
            SessionEvent::NotificationReceived { value, .. } => format!("pushed {:02x?}", &value[..]),
            other => format!("{:?}", other),
        };
        self.0.lock().push(line);
    }
}

fn peripheral_services() -> Vec<ServiceDescriptor> {
    vec![
        ServiceDescriptor::new(GENERIC_ACCESS_SERVICE_UUID, 1),
        ServiceDescriptor::new(GENERIC_ATTRIBUTE_SERVICE_UUID, 4),
        ServiceDescriptor::new(DEVICE_INFO_SERVICE_UUID, 8),
        ServiceDescriptor::new(TEMPERATURE_SERVICE_UUID, 16).with_characteristic(
            CharacteristicDescriptor::new(
                TEMPERATURE_VALUE_CHARACTERISTIC_UUID,
                CharPropFlags::READ | CharPropFlags::WRITE | CharPropFlags::INDICATE,
            ),
        ),
    ]
}

fn temperature() -> CharacteristicRef {
    CharacteristicRef::new(TEMPERATURE_SERVICE_UUID, TEMPERATURE_VALUE_CHARACTERISTIC_UUID)
}

fn session(radio: &Arc<Radio>, router: &EventRouter) -> GattSession {
    GattSession::new(
        radio.clone(),
        router.sender(),
        SessionConfig::default().with_connect_timeout(None),
    )
}

#[tokio::test]
async fn scan_then_connect_discover_read_and_disconnect() {
    let radio = Arc::new(Radio::default());
    let transcript = Transcript::default();
    let router = EventRouter::spawn(transcript.clone());

    // Scan: the same peripheral is reported every time it advertises.
    let scanner = ScanSession::new(radio.clone());
    scanner
        .start(
            &ScanConfig::new(NAME, Duration::from_secs(30)),
            Arc::new(router.sender()),
        )
        .await
        .unwrap();
    radio.advertise(NAME, -48);
    radio.advertise("Other", -30);
    radio.advertise(NAME, -52);
    tokio::time::sleep(Duration::from_millis(20)).await;
    scanner.stop().await;
    scanner.stop().await;

    // Connect and discover.
    let session = session(&radio, &router);
    session
        .connect(PeripheralIdentity::new(ADDRESS, NAME))
        .unwrap();
    assert_eq!(session.state(), SessionState::Connecting);
    radio.raise(TransportEvent::ConnectionStateChanged {
        connected: true,
        status: GattStatus::SUCCESS,
    });
    assert_eq!(session.state(), SessionState::Connected);

    session.discover_services().unwrap();
    radio.raise(TransportEvent::ServicesDiscovered {
        status: GattStatus::SUCCESS,
        services: peripheral_services(),
    });
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session
        .lookup(&TEMPERATURE_SERVICE_UUID, &TEMPERATURE_VALUE_CHARACTERISTIC_UUID)
        .is_some());

    // Read, then a push from the peripheral.
    let target = temperature();
    session
        .read_characteristic(&target.service, &target.characteristic)
        .unwrap();
    radio.raise(TransportEvent::CharacteristicRead {
        target,
        value: Bytes::from_static(&[0x01, 0x2c]),
        status: GattStatus::SUCCESS,
    });
    radio.raise(TransportEvent::CharacteristicChanged {
        target,
        value: Bytes::from_static(&[0x01, 0x2d]),
    });

    session.disconnect().unwrap();
    router.shutdown().await;

    assert_eq!(
        transcript.lines(),
        vec![
            "scan started",
            "candidate AA:BB:CC:DD:EE:FF -48",
            "candidate AA:BB:CC:DD:EE:FF -52",
            "scan stopped",
            "connected",
            "discovered 4 missing 0",
            "read [01, 2c]",
            "pushed [01, 2d]",
            "disconnected",
        ]
    );
}

#[tokio::test]
async fn disconnect_during_write_discards_late_completion() {
    let radio = Arc::new(Radio::default());
    let transcript = Transcript::default();
    let router = EventRouter::spawn(transcript.clone());
    let session = session(&radio, &router);

    session.connect(PeripheralIdentity::new(ADDRESS, NAME)).unwrap();
    radio.raise(TransportEvent::ConnectionStateChanged {
        connected: true,
        status: GattStatus::SUCCESS,
    });
    session.discover_services().unwrap();
    radio.raise(TransportEvent::ServicesDiscovered {
        status: GattStatus::SUCCESS,
        services: peripheral_services(),
    });

    let target = temperature();
    session
        .write_characteristic(&target.service, &target.characteristic, vec![0x01])
        .unwrap();
    assert_eq!(
        session.pending_operation(),
        Some(OperationKind::WriteCharacteristic)
    );

    session.disconnect().unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.catalog().is_empty());

    radio.raise(TransportEvent::CharacteristicWritten {
        target,
        status: GattStatus::SUCCESS,
    });
    router.shutdown().await;

    assert_eq!(*radio.writes.lock(), vec![vec![0x01]]);
    assert_eq!(
        transcript.lines(),
        vec!["connected", "discovered 4 missing 0", "disconnected"]
    );
}

#[tokio::test]
async fn unknown_characteristic_is_rejected_synchronously() {
    let radio = Arc::new(Radio::default());
    let router = EventRouter::spawn(Transcript::default());
    let session = session(&radio, &router);

    session.connect(PeripheralIdentity::new(ADDRESS, NAME)).unwrap();
    radio.raise(TransportEvent::ConnectionStateChanged {
        connected: true,
        status: GattStatus::SUCCESS,
    });
    session.discover_services().unwrap();
    radio.raise(TransportEvent::ServicesDiscovered {
        status: GattStatus::SUCCESS,
        services: peripheral_services(),
    });

    let result = session.write_characteristic(
        &TEMPERATURE_SERVICE_UUID,
        &TEMPERATURE_AUX_CHARACTERISTIC_UUID,
        vec![0xff],
    );
    assert!(matches!(result, Err(Error::NotFound { .. })));
    assert!(radio.writes.lock().is_empty());
    assert_eq!(session.state(), SessionState::Ready);

    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scan_window_expiry_reports_one_stop() {
    let radio = Arc::new(Radio::default());
    let transcript = Transcript::default();
    let router = EventRouter::spawn(transcript.clone());

    let scanner = ScanSession::new(radio.clone());
    scanner
        .start(
            &ScanConfig::new(NAME, Duration::from_secs(10)),
            Arc::new(router.sender()),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(!scanner.is_scanning());
    scanner.stop().await;

    // The radio already stopped; this sighting goes nowhere.
    radio.advertise(NAME, -40);
    router.shutdown().await;

    assert_eq!(transcript.lines(), vec!["scan started", "scan stopped"]);
}
