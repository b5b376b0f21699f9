//! GATT session state machine.
//!
//! A [`GattSession`] owns one peripheral link and enforces that at most one
//! request is outstanding on it. Public operations return as soon as the
//! request has been handed to the transport; outcomes arrive later as
//! [`SessionEvent`]s through the event router.
//!
//! Transport completions come in through [`TransportCallbacks`], which are
//! bound to the link they were created for. Once the session leaves that link
//! (disconnect, timeout, peer drop) anything delivered through the old handle
//! is discarded, so a late completion can never leak into a later connection.

use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::catalog::{CharacteristicDescriptor, CharacteristicRef, ServiceCatalog};
use crate::ble::router::EventSender;
use crate::ble::transport::{GattStatus, GattTransport, PeripheralIdentity, TransportEvent};
use crate::config::SessionConfig;
use crate::error::{Error, Result};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// No link.
    #[default]
    Disconnected,
    /// Waiting for the transport to confirm the link.
    Connecting,
    /// Link is up, services unknown.
    Connected,
    /// Service discovery in progress.
    Discovering,
    /// Services known; reads, writes and subscriptions allowed.
    Ready,
}

impl SessionState {
    /// Check if a link is up.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Discovering | Self::Ready)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Kind of a session request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperationKind {
    /// Open the link.
    Connect,
    /// Close the link.
    Disconnect,
    /// Discover services.
    DiscoverServices,
    /// Read a characteristic.
    ReadCharacteristic,
    /// Write a characteristic.
    WriteCharacteristic,
    /// Toggle indications.
    SetIndication,
    /// Read remote RSSI.
    ReadRssi,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A tagged session request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRequest {
    /// Open the link to a peripheral.
    Connect(PeripheralIdentity),
    /// Close the link.
    Disconnect,
    /// Discover services.
    DiscoverServices,
    /// Read a characteristic.
    ReadCharacteristic(CharacteristicRef),
    /// Write a payload to a characteristic.
    WriteCharacteristic(CharacteristicRef, Bytes),
    /// Enable or disable indications.
    SetIndication(CharacteristicRef, bool),
    /// Read remote RSSI.
    ReadRssi,
}

impl OperationRequest {
    /// The request's kind.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Connect(_) => OperationKind::Connect,
            Self::Disconnect => OperationKind::Disconnect,
            Self::DiscoverServices => OperationKind::DiscoverServices,
            Self::ReadCharacteristic(_) => OperationKind::ReadCharacteristic,
            Self::WriteCharacteristic(..) => OperationKind::WriteCharacteristic,
            Self::SetIndication(..) => OperationKind::SetIndication,
            Self::ReadRssi => OperationKind::ReadRssi,
        }
    }

    /// The characteristic this request targets, if any.
    pub fn target(&self) -> Option<&CharacteristicRef> {
        match self {
            Self::ReadCharacteristic(target)
            | Self::WriteCharacteristic(target, _)
            | Self::SetIndication(target, _) => Some(target),
            _ => None,
        }
    }
}

/// Why an operation failed after it was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The remote or local stack completed it with a non-success status.
    Status(GattStatus),
    /// The transport refused the request.
    Rejected(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "{}", status),
            Self::Rejected(reason) => write!(f, "rejected: {}", reason),
        }
    }
}

/// Event emitted by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The link is up.
    Connected,
    /// The link is gone. Emitted once per link.
    Disconnected,
    /// Discovery finished and the catalog holds the new snapshot.
    ServicesDiscovered {
        /// Number of services captured.
        services: usize,
        /// Expected services the peripheral does not expose.
        missing: Vec<Uuid>,
    },
    /// A characteristic read finished.
    CharacteristicRead {
        /// Read target.
        target: CharacteristicRef,
        /// Value read.
        value: Bytes,
        /// Completion status.
        status: GattStatus,
    },
    /// A characteristic write finished.
    CharacteristicWritten {
        /// Write target.
        target: CharacteristicRef,
        /// Completion status.
        status: GattStatus,
    },
    /// Indications were enabled or disabled.
    IndicationStateChanged {
        /// Characteristic whose indications changed.
        target: CharacteristicRef,
        /// New indication state.
        enabled: bool,
        /// Completion status.
        status: GattStatus,
    },
    /// The peer pushed a value.
    NotificationReceived {
        /// Source characteristic.
        target: CharacteristicRef,
        /// Pushed value.
        value: Bytes,
    },
    /// A remote RSSI read finished.
    RssiRead {
        /// Signal strength in dBm.
        rssi: i16,
        /// Completion status.
        status: GattStatus,
    },
    /// A submitted operation did not succeed.
    OperationFailed {
        /// What failed.
        kind: OperationKind,
        /// Why.
        reason: FailureReason,
    },
}

struct SessionInner {
    state: SessionState,
    peer: Option<PeripheralIdentity>,
    pending: Option<OperationRequest>,
    /// Incremented every time a link starts or ends.
    link: u64,
    connect_timer: Option<JoinHandle<()>>,
}

struct SessionShared {
    inner: Mutex<SessionInner>,
    catalog: ServiceCatalog,
    transport: Arc<dyn GattTransport>,
    events: EventSender,
    config: SessionConfig,
}

/// What to do once the state lock is released.
enum FollowUp {
    None,
    Discover,
}

impl SessionShared {
    /// Move to Disconnected, abandoning whatever was in flight.
    fn enter_disconnected(&self, inner: &mut SessionInner) {
        if let Some(timer) = inner.connect_timer.take() {
            timer.abort();
        }

        if let Some(pending) = inner.pending.take() {
            debug!("Abandoning outstanding {} request", pending.kind());
        }

        inner.link = inner.link.wrapping_add(1);
        inner.state = SessionState::Disconnected;
        self.catalog.clear();

        if let Some(peer) = &inner.peer {
            info!("Disconnected from {}", peer);
        }
        self.events.session(SessionEvent::Disconnected);
    }

    /// Take the pending request if it is the completion we were waiting for.
    fn complete(
        &self,
        inner: &mut SessionInner,
        kind: OperationKind,
        target: Option<&CharacteristicRef>,
    ) -> Option<OperationRequest> {
        let matches = inner
            .pending
            .as_ref()
            .map(|p| p.kind() == kind && (target.is_none() || p.target() == target))
            .unwrap_or(false);

        if matches {
            inner.pending.take()
        } else {
            warn!(
                "Unexpected {} completion (pending: {:?}), discarding",
                kind,
                inner.pending.as_ref().map(OperationRequest::kind)
            );
            None
        }
    }

    fn fail(&self, kind: OperationKind, reason: FailureReason) {
        warn!("{} failed: {}", kind, reason);
        self.events
            .session(SessionEvent::OperationFailed { kind, reason });
    }

    /// Apply one transport event for `link`.
    fn apply(&self, link: u64, event: TransportEvent) -> FollowUp {
        let mut inner = self.inner.lock();

        if inner.link != link || inner.state == SessionState::Disconnected {
            debug!("Discarding transport event from a finished link: {:?}", event);
            return FollowUp::None;
        }

        match event {
            TransportEvent::ConnectionStateChanged {
                connected: true, ..
            } => {
                if inner.state != SessionState::Connecting {
                    trace!("Duplicate connection confirmation while {}", inner.state);
                    return FollowUp::None;
                }

                if let Some(timer) = inner.connect_timer.take() {
                    timer.abort();
                }
                inner.pending = None;
                inner.state = SessionState::Connected;
                if let Some(peer) = &inner.peer {
                    info!("Connected to {}", peer);
                }
                self.events.session(SessionEvent::Connected);

                if self.config.discover_on_connect {
                    return FollowUp::Discover;
                }
            }
            TransportEvent::ConnectionStateChanged {
                connected: false,
                status,
            } => {
                debug!("Transport reported link down ({}) while {}", status, inner.state);
                self.enter_disconnected(&mut inner);
            }
            TransportEvent::ServicesDiscovered { status, services } => {
                if inner.state != SessionState::Discovering
                    || self
                        .complete(&mut inner, OperationKind::DiscoverServices, None)
                        .is_none()
                {
                    return FollowUp::None;
                }

                if status.is_success() {
                    self.catalog.replace(services);
                    let missing = self.catalog.missing_services(&self.config.expected_services);
                    if missing.is_empty() {
                        info!("Device has expected services");
                    } else {
                        warn!("Device does not have expected GATT services: {:?}", missing);
                    }
                    inner.state = SessionState::Ready;
                    self.events.session(SessionEvent::ServicesDiscovered {
                        services: self.catalog.len(),
                        missing,
                    });
                } else {
                    inner.state = SessionState::Connected;
                    self.fail(OperationKind::DiscoverServices, FailureReason::Status(status));
                }
            }
            TransportEvent::CharacteristicRead {
                target,
                value,
                status,
            } => {
                if self
                    .complete(&mut inner, OperationKind::ReadCharacteristic, Some(&target))
                    .is_none()
                {
                    return FollowUp::None;
                }

                if status.is_success() {
                    trace!("Read {} bytes from {}: {:02X?}", value.len(), target, &value[..]);
                    self.catalog.record_value(&target, &value);
                    self.events.session(SessionEvent::CharacteristicRead {
                        target,
                        value,
                        status,
                    });
                } else {
                    self.fail(OperationKind::ReadCharacteristic, FailureReason::Status(status));
                }
            }
            TransportEvent::CharacteristicWritten { target, status } => {
                let Some(request) =
                    self.complete(&mut inner, OperationKind::WriteCharacteristic, Some(&target))
                else {
                    return FollowUp::None;
                };

                if status.is_success() {
                    if let OperationRequest::WriteCharacteristic(_, payload) = &request {
                        self.catalog.record_value(&target, payload);
                    }
                    self.events
                        .session(SessionEvent::CharacteristicWritten { target, status });
                } else {
                    self.fail(OperationKind::WriteCharacteristic, FailureReason::Status(status));
                }
            }
            TransportEvent::IndicationStateWritten { target, status } => {
                let Some(OperationRequest::SetIndication(_, enabled)) =
                    self.complete(&mut inner, OperationKind::SetIndication, Some(&target))
                else {
                    return FollowUp::None;
                };

                if status.is_success() {
                    debug!("Indications on {} now {}", target, enabled);
                    self.events.session(SessionEvent::IndicationStateChanged {
                        target,
                        enabled,
                        status,
                    });
                } else {
                    self.fail(OperationKind::SetIndication, FailureReason::Status(status));
                }
            }
            TransportEvent::CharacteristicChanged { target, value } => {
                if inner.state != SessionState::Ready {
                    debug!("Ignoring push from {} while {}", target, inner.state);
                    return FollowUp::None;
                }

                trace!("Push from {}: {:02X?}", target, &value[..]);
                self.catalog.record_value(&target, &value);
                self.events
                    .session(SessionEvent::NotificationReceived { target, value });
            }
            TransportEvent::RemoteRssi { rssi, status } => {
                if self
                    .complete(&mut inner, OperationKind::ReadRssi, None)
                    .is_none()
                {
                    return FollowUp::None;
                }

                if status.is_success() {
                    self.events.session(SessionEvent::RssiRead { rssi, status });
                } else {
                    self.fail(OperationKind::ReadRssi, FailureReason::Status(status));
                }
            }
        }

        FollowUp::None
    }

    /// Undo a request the transport refused on submission.
    fn reject(&self, link: u64, kind: OperationKind, error: Error) {
        let mut inner = self.inner.lock();
        if inner.link != link {
            return;
        }

        match kind {
            OperationKind::Connect => {
                warn!("Transport refused connection: {}", error);
                if inner.state == SessionState::Connecting {
                    self.enter_disconnected(&mut inner);
                }
            }
            _ => {
                if inner.pending.as_ref().map(OperationRequest::kind) != Some(kind) {
                    return;
                }
                inner.pending = None;
                if kind == OperationKind::DiscoverServices
                    && inner.state == SessionState::Discovering
                {
                    inner.state = SessionState::Connected;
                }
                self.fail(kind, FailureReason::Rejected(error.to_string()));
            }
        }
    }

    /// Give up on a connection attempt that never completed.
    fn expire_connect(&self, link: u64) {
        {
            let mut inner = self.inner.lock();
            if inner.link != link || inner.state != SessionState::Connecting {
                return;
            }
            // The timer is the task running this; don't abort it.
            inner.connect_timer = None;
            warn!("Connection attempt timed out");
            self.enter_disconnected(&mut inner);
        }

        if let Err(e) = self.transport.disconnect() {
            debug!("Teardown after connect timeout failed: {}", e);
        }
    }
}

/// Handle a transport uses to report completions for one link.
#[derive(Clone)]
pub struct TransportCallbacks {
    session: Weak<SessionShared>,
    link: u64,
}

impl TransportCallbacks {
    /// Deliver a completion or unsolicited event.
    ///
    /// Safe to call from any thread. Deliveries for a link the session has
    /// already left, or for a dropped session, are ignored.
    pub fn deliver(&self, event: TransportEvent) {
        let Some(shared) = self.session.upgrade() else {
            trace!("Session dropped, ignoring transport event");
            return;
        };

        if let FollowUp::Discover = shared.apply(self.link, event) {
            let session = GattSession { shared };
            if let Err(e) = session.discover_services() {
                debug!("Automatic discovery not started: {}", e);
            }
        }
    }

    /// The link this handle belongs to.
    pub fn link(&self) -> u64 {
        self.link
    }
}

impl fmt::Debug for TransportCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCallbacks")
            .field("link", &self.link)
            .finish()
    }
}

/// A GATT client session with one peripheral.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct GattSession {
    shared: Arc<SessionShared>,
}

impl GattSession {
    /// Create a disconnected session over `transport`, emitting into `events`.
    pub fn new(
        transport: Arc<dyn GattTransport>,
        events: EventSender,
        config: SessionConfig,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                inner: Mutex::new(SessionInner {
                    state: SessionState::Disconnected,
                    peer: None,
                    pending: None,
                    link: 0,
                    connect_timer: None,
                }),
                catalog: ServiceCatalog::new(),
                transport,
                events,
                config,
            }),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    /// Peer of the current or most recent link.
    pub fn peer(&self) -> Option<PeripheralIdentity> {
        self.shared.inner.lock().peer.clone()
    }

    /// Kind of the outstanding request, if any.
    pub fn pending_operation(&self) -> Option<OperationKind> {
        self.shared
            .inner
            .lock()
            .pending
            .as_ref()
            .map(OperationRequest::kind)
    }

    /// The service catalog of the current link.
    pub fn catalog(&self) -> &ServiceCatalog {
        &self.shared.catalog
    }

    /// Resolve a characteristic in the current catalog.
    pub fn lookup(&self, service: &Uuid, characteristic: &Uuid) -> Option<CharacteristicDescriptor> {
        self.shared.catalog.lookup(service, characteristic)
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Dispatch a tagged request to the matching operation.
    pub fn submit(&self, request: OperationRequest) -> Result<()> {
        match request {
            OperationRequest::Connect(peer) => self.connect(peer),
            OperationRequest::Disconnect => self.disconnect(),
            OperationRequest::DiscoverServices => self.discover_services(),
            OperationRequest::ReadCharacteristic(target) => {
                self.read_characteristic(&target.service, &target.characteristic)
            }
            OperationRequest::WriteCharacteristic(target, payload) => {
                self.write_characteristic(&target.service, &target.characteristic, payload)
            }
            OperationRequest::SetIndication(target, enabled) => {
                self.set_indication_state(&target.service, &target.characteristic, enabled)
            }
            OperationRequest::ReadRssi => self.read_rssi(),
        }
    }

    /// Start connecting to `peer`. Valid only while Disconnected.
    pub fn connect(&self, peer: PeripheralIdentity) -> Result<()> {
        let shared = &self.shared;

        if !shared.transport.is_available() {
            return Err(Error::RadioUnavailable);
        }

        let callbacks = {
            let mut inner = shared.inner.lock();
            if inner.state != SessionState::Disconnected {
                return Err(Error::InvalidState {
                    operation: OperationKind::Connect,
                    state: inner.state,
                });
            }

            inner.link = inner.link.wrapping_add(1);
            inner.state = SessionState::Connecting;
            inner.peer = Some(peer.clone());
            inner.pending = Some(OperationRequest::Connect(peer.clone()));
            inner.connect_timer = self.arm_connect_timer(inner.link);

            info!("Connecting to {}", peer);

            TransportCallbacks {
                session: Arc::downgrade(shared),
                link: inner.link,
            }
        };

        let link = callbacks.link;
        if let Err(e) = shared.transport.connect(&peer, callbacks) {
            shared.reject(link, OperationKind::Connect, e);
        }

        Ok(())
    }

    fn arm_connect_timer(&self, link: u64) -> Option<JoinHandle<()>> {
        let timeout = self.shared.config.connect_timeout?;
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No async runtime, connection attempt will not time out");
                return None;
            }
        };

        let session = Arc::downgrade(&self.shared);
        Some(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = session.upgrade() {
                shared.expire_connect(link);
            }
        }))
    }

    /// Tear the link down. Valid from any state but Disconnected.
    ///
    /// The session is Disconnected when this returns and `Disconnected` has
    /// been emitted; the outstanding request, if any, is abandoned.
    pub fn disconnect(&self) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state == SessionState::Disconnected {
                return Err(Error::InvalidState {
                    operation: OperationKind::Disconnect,
                    state: inner.state,
                });
            }
            info!("Disconnecting while {}", inner.state);
            self.shared.enter_disconnected(&mut inner);
        }

        if let Err(e) = self.shared.transport.disconnect() {
            warn!("Transport teardown failed: {}", e);
        }

        Ok(())
    }

    /// Start service discovery. Valid only while Connected.
    pub fn discover_services(&self) -> Result<()> {
        let link = {
            let mut inner = self.shared.inner.lock();
            if inner.state != SessionState::Connected {
                return Err(Error::InvalidState {
                    operation: OperationKind::DiscoverServices,
                    state: inner.state,
                });
            }
            if let Some(pending) = &inner.pending {
                return Err(Error::OperationInProgress {
                    pending: pending.kind(),
                });
            }

            debug!("Discovering GATT services");
            inner.state = SessionState::Discovering;
            inner.pending = Some(OperationRequest::DiscoverServices);
            inner.link
        };

        if let Err(e) = self.shared.transport.discover_services() {
            self.shared
                .reject(link, OperationKind::DiscoverServices, e);
        }

        Ok(())
    }

    /// Start reading a characteristic. Valid only while Ready.
    pub fn read_characteristic(&self, service: &Uuid, characteristic: &Uuid) -> Result<()> {
        let target = CharacteristicRef::new(*service, *characteristic);
        let link = self.begin(OperationRequest::ReadCharacteristic(target))?;

        debug!("Reading {}", target);
        if let Err(e) = self.shared.transport.read_characteristic(&target) {
            self.shared
                .reject(link, OperationKind::ReadCharacteristic, e);
        }

        Ok(())
    }

    /// Start writing `payload` to a characteristic. Valid only while Ready.
    pub fn write_characteristic(
        &self,
        service: &Uuid,
        characteristic: &Uuid,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        let target = CharacteristicRef::new(*service, *characteristic);
        let payload = payload.into();
        let link = self.begin(OperationRequest::WriteCharacteristic(target, payload.clone()))?;

        debug!("Writing {} bytes to {}", payload.len(), target);
        if let Err(e) = self.shared.transport.write_characteristic(&target, &payload) {
            self.shared
                .reject(link, OperationKind::WriteCharacteristic, e);
        }

        Ok(())
    }

    /// Enable or disable indications on a characteristic. Valid only while Ready.
    pub fn set_indication_state(
        &self,
        service: &Uuid,
        characteristic: &Uuid,
        enabled: bool,
    ) -> Result<()> {
        let target = CharacteristicRef::new(*service, *characteristic);
        let link = self.begin(OperationRequest::SetIndication(target, enabled))?;

        debug!("Setting indications on {} to {}", target, enabled);
        if let Err(e) = self.shared.transport.set_indication(&target, enabled) {
            self.shared.reject(link, OperationKind::SetIndication, e);
        }

        Ok(())
    }

    /// Start a remote RSSI read. Valid while Connected or Ready.
    pub fn read_rssi(&self) -> Result<()> {
        let link = self.begin(OperationRequest::ReadRssi)?;

        trace!("Reading remote RSSI");
        if let Err(e) = self.shared.transport.read_rssi() {
            self.shared.reject(link, OperationKind::ReadRssi, e);
        }

        Ok(())
    }

    /// Claim the request slot for a read, write, subscribe or RSSI request.
    ///
    /// Checks run in order: state, catalog membership, slot availability.
    fn begin(&self, request: OperationRequest) -> Result<u64> {
        let kind = request.kind();
        let mut inner = self.shared.inner.lock();

        let allowed = match kind {
            OperationKind::ReadRssi => {
                matches!(inner.state, SessionState::Connected | SessionState::Ready)
            }
            _ => inner.state == SessionState::Ready,
        };
        if !allowed {
            return Err(Error::InvalidState {
                operation: kind,
                state: inner.state,
            });
        }

        if let Some(target) = request.target() {
            if self.shared.catalog.lookup_ref(target).is_none() {
                return Err(Error::NotFound {
                    service: target.service.to_string(),
                    characteristic: target.characteristic.to_string(),
                });
            }
        }

        if let Some(pending) = &inner.pending {
            return Err(Error::OperationInProgress {
                pending: pending.kind(),
            });
        }

        inner.pending = Some(request);
        Ok(inner.link)
    }
}

impl fmt::Debug for GattSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("GattSession")
            .field("state", &inner.state)
            .field("peer", &inner.peer)
            .field("pending", &inner.pending.as_ref().map(OperationRequest::kind))
            .finish()
    }
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.get_mut().connect_timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording transport used by the session tests.

    use super::*;

    /// A call the session made on the transport.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Connect(String),
        Disconnect,
        Discover,
        Read(CharacteristicRef),
        Write(CharacteristicRef, Vec<u8>),
        SetIndication(CharacteristicRef, bool),
        ReadRssi,
    }

    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub(crate) calls: Mutex<Vec<Call>>,
        pub(crate) callbacks: Mutex<Option<TransportCallbacks>>,
        pub(crate) refuse: Mutex<bool>,
        pub(crate) unavailable: Mutex<bool>,
    }

    impl FakeTransport {
        pub(crate) fn record(&self, call: Call) -> Result<()> {
            self.calls.lock().push(call);
            if *self.refuse.lock() {
                return Err(Error::TransportFailure {
                    operation: OperationKind::ReadRssi,
                    reason: "busy".into(),
                });
            }
            Ok(())
        }

        /// Deliver through the most recent link's callbacks.
        pub(crate) fn raise(&self, event: TransportEvent) {
            let callbacks = self.callbacks.lock().clone();
            if let Some(callbacks) = callbacks {
                callbacks.deliver(event);
            }
        }

        pub(crate) fn take_calls(&self) -> Vec<Call> {
            std::mem::take(&mut *self.calls.lock())
        }
    }

    impl GattTransport for FakeTransport {
        fn is_available(&self) -> bool {
            !*self.unavailable.lock()
        }

        fn connect(&self, peer: &PeripheralIdentity, callbacks: TransportCallbacks) -> Result<()> {
            *self.callbacks.lock() = Some(callbacks);
            self.record(Call::Connect(peer.address.clone()))
        }

        fn disconnect(&self) -> Result<()> {
            self.record(Call::Disconnect)
        }

        fn discover_services(&self) -> Result<()> {
            self.record(Call::Discover)
        }

        fn read_characteristic(&self, target: &CharacteristicRef) -> Result<()> {
            self.record(Call::Read(*target))
        }

        fn write_characteristic(&self, target: &CharacteristicRef, payload: &[u8]) -> Result<()> {
            self.record(Call::Write(*target, payload.to_vec()))
        }

        fn set_indication(&self, target: &CharacteristicRef, enabled: bool) -> Result<()> {
            self.record(Call::SetIndication(*target, enabled))
        }

        fn read_rssi(&self) -> Result<()> {
            self.record(Call::ReadRssi)
        }
    }
}
