//! Periodic signal strength polling and proximity banding.

use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::ble::session::{GattSession, SessionState};
use crate::error::Error;

/// Coarse distance estimate derived from RSSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProximityBand {
    /// -50 dBm or stronger.
    Near,
    /// Between -80 and -50 dBm.
    Mid,
    /// Weaker than -80 dBm.
    Far,
}

impl ProximityBand {
    /// Classify a signal strength in dBm.
    pub fn from_rssi(rssi: i16) -> Self {
        if rssi >= -50 {
            Self::Near
        } else if rssi >= -80 {
            Self::Mid
        } else {
            Self::Far
        }
    }
}

impl fmt::Display for ProximityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Near => write!(f, "near"),
            Self::Mid => write!(f, "mid"),
            Self::Far => write!(f, "far"),
        }
    }
}

/// Background task issuing RSSI reads at a fixed interval.
///
/// Readings arrive as `RssiRead` session events. The poller ends by itself
/// once the session disconnects, and is aborted when dropped.
#[derive(Debug)]
pub struct RssiPoller {
    handle: Option<JoinHandle<()>>,
}

impl RssiPoller {
    pub(crate) fn spawn(session: GattSession, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match session.state() {
                    SessionState::Disconnected | SessionState::Connecting => break,
                    SessionState::Connected | SessionState::Ready => {
                        match session.read_rssi() {
                            Ok(()) => {}
                            Err(Error::OperationInProgress { pending }) => {
                                trace!("Skipping RSSI poll, {} outstanding", pending);
                            }
                            Err(e) => {
                                debug!("RSSI poll failed: {}", e);
                                break;
                            }
                        }
                    }
                    SessionState::Discovering => trace!("Skipping RSSI poll while discovering"),
                }
            }

            debug!("RSSI polling ended");
        });

        Self {
            handle: Some(handle),
        }
    }

    /// Check if the polling task is still running.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop polling.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for RssiPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

impl GattSession {
    /// Poll remote RSSI every `interval` while a link is up.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_rssi_polling(&self, interval: Duration) -> RssiPoller {
        RssiPoller::spawn(self.clone(), interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::catalog::temperature_peripheral;
    use crate::ble::router::EventRouter;
    use crate::ble::session::testing::{Call, FakeTransport};
    use crate::ble::transport::{GattStatus, PeripheralIdentity, TransportEvent};
    use crate::config::SessionConfig;
    use std::sync::Arc;

    #[test]
    fn test_proximity_bands() {
        assert_eq!(ProximityBand::from_rssi(-30), ProximityBand::Near);
        assert_eq!(ProximityBand::from_rssi(-50), ProximityBand::Near);
        assert_eq!(ProximityBand::from_rssi(-51), ProximityBand::Mid);
        assert_eq!(ProximityBand::from_rssi(-80), ProximityBand::Mid);
        assert_eq!(ProximityBand::from_rssi(-81), ProximityBand::Far);
        assert_eq!(ProximityBand::Far.to_string(), "far");
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_skips_while_pending_and_ends_on_disconnect() {
        let transport = Arc::new(FakeTransport::default());
        let (sender, _rx) = EventRouter::channel();
        let session = GattSession::new(
            transport.clone(),
            sender,
            SessionConfig::default().with_connect_timeout(None),
        );
        session
            .connect(PeripheralIdentity::new("AA:BB:CC:DD:EE:FF", "Miji_Bluetooth01"))
            .unwrap();
        transport.raise(TransportEvent::ConnectionStateChanged {
            connected: true,
            status: GattStatus::SUCCESS,
        });
        session.discover_services().unwrap();
        transport.raise(TransportEvent::ServicesDiscovered {
            status: GattStatus::SUCCESS,
            services: temperature_peripheral(),
        });
        transport.take_calls();

        let poller = session.start_rssi_polling(Duration::from_secs(1));

        // First tick fires immediately; the next two find the read outstanding.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(transport.take_calls(), vec![Call::ReadRssi]);

        transport.raise(TransportEvent::RemoteRssi {
            rssi: -65,
            status: GattStatus::SUCCESS,
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.take_calls(), vec![Call::ReadRssi]);

        session.disconnect().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!poller.is_running());
    }
}
