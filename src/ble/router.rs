//! Event delivery to the single registered consumer.
//!
//! Producers (scan and GATT sessions) push into an unbounded queue and never
//! call the consumer directly; the consumer runs on a dedicated task, or on
//! whatever thread drains the receiver returned by [`EventRouter::channel`].

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::ble::scanner::{ScanCandidate, ScanSink};
use crate::ble::session::SessionEvent;

/// Anything the router can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedEvent {
    /// A scan activation began.
    ScanStarted,
    /// A matching advertisement was seen.
    Candidate(ScanCandidate),
    /// A scan activation ended.
    ScanStopped,
    /// A GATT session event.
    Session(SessionEvent),
}

impl RoutedEvent {
    /// Hand this event to the matching consumer method.
    pub fn dispatch<C: EventConsumer + ?Sized>(self, consumer: &mut C) {
        match self {
            Self::ScanStarted => consumer.on_scan_started(),
            Self::Candidate(candidate) => consumer.on_candidate(candidate),
            Self::ScanStopped => consumer.on_scan_stopped(),
            Self::Session(event) => consumer.on_session_event(event),
        }
    }
}

/// Receiver of routed events.
pub trait EventConsumer: Send + 'static {
    /// A scan activation began.
    fn on_scan_started(&mut self) {}

    /// A matching advertisement was seen.
    fn on_candidate(&mut self, _candidate: ScanCandidate) {}

    /// A scan activation ended.
    fn on_scan_stopped(&mut self) {}

    /// A GATT session event.
    fn on_session_event(&mut self, event: SessionEvent);
}

/// Cloneable producer handle into the router queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<RoutedEvent>,
}

impl EventSender {
    /// Queue an event. Returns false once the consumer side is gone.
    pub fn send(&self, event: RoutedEvent) -> bool {
        let delivered = self.tx.send(event).is_ok();
        if !delivered {
            trace!("Event router closed, dropping event");
        }
        delivered
    }

    pub(crate) fn session(&self, event: SessionEvent) {
        self.send(RoutedEvent::Session(event));
    }
}

impl ScanSink for EventSender {
    fn on_scan_started(&self) {
        self.send(RoutedEvent::ScanStarted);
    }

    fn on_candidate(&self, candidate: ScanCandidate) {
        self.send(RoutedEvent::Candidate(candidate));
    }

    fn on_scan_stopped(&self) {
        self.send(RoutedEvent::ScanStopped);
    }
}

/// Owns the consumer task.
pub struct EventRouter {
    sender: EventSender,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl EventRouter {
    /// Spawn a task that drives `consumer` with every queued event, in order.
    pub fn spawn<C: EventConsumer>(mut consumer: C) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<RoutedEvent>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            debug!("Event router started");
            loop {
                tokio::select! {
                    biased;
                    event = rx.recv() => match event {
                        Some(event) => event.dispatch(&mut consumer),
                        None => break,
                    },
                    _ = &mut shutdown_rx => {
                        // Deliver what was queued before shutdown.
                        while let Ok(event) = rx.try_recv() {
                            event.dispatch(&mut consumer);
                        }
                        break;
                    }
                }
            }
            debug!("Event router stopped");
        });

        Self {
            sender: EventSender { tx },
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Create a bare queue; the caller drains the receiver on its own context.
    pub fn channel() -> (EventSender, mpsc::UnboundedReceiver<RoutedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSender { tx }, rx)
    }

    /// Producer handle for sessions.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Stop the consumer task after it drains the queue.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for EventRouter {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
