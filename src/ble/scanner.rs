//! Time-bounded scanning for advertising peripherals.
//!
//! A [`ScanSession`] forwards every advertisement whose name matches the
//! configured filter to a [`ScanSink`] until it is stopped or its window
//! expires. Sightings are not deduplicated.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::ble::transport::{Advertisement, AdvertisementSource, PeripheralIdentity};
use crate::config::ScanConfig;
use crate::error::{Error, Result};

/// A matching advertisement.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanCandidate {
    /// Who advertised.
    pub identity: PeripheralIdentity,
    /// Raw advertising payload.
    pub advertisement: Bytes,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// When the advertisement was received.
    pub seen_at: DateTime<Utc>,
}

/// Receiver of scan callbacks.
pub trait ScanSink: Send + Sync {
    /// A scan activation began.
    fn on_scan_started(&self);

    /// A matching advertisement was seen.
    fn on_candidate(&self, candidate: ScanCandidate);

    /// A scan activation ended.
    fn on_scan_stopped(&self);
}

struct Activation {
    id: u64,
    sink: Arc<dyn ScanSink>,
    /// Held while a candidate is delivered; closed before the stop callback.
    gate: Arc<Mutex<bool>>,
    pump: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ScanState {
    activations: u64,
    active: Option<Activation>,
}

/// Scanner for peripherals advertising a given name.
pub struct ScanSession {
    source: Arc<dyn AdvertisementSource>,
    /// Serializes start, stop and expiry.
    control: Arc<tokio::sync::Mutex<()>>,
    state: Arc<Mutex<ScanState>>,
}

impl ScanSession {
    /// Create an idle scanner over `source`.
    pub fn new(source: Arc<dyn AdvertisementSource>) -> Self {
        Self {
            source,
            control: Arc::new(tokio::sync::Mutex::new(())),
            state: Arc::new(Mutex::new(ScanState::default())),
        }
    }

    /// Check if a scan is active.
    pub fn is_scanning(&self) -> bool {
        self.state.lock().active.is_some()
    }

    /// Start scanning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyScanning`] if a scan is active, or the source's
    /// error (typically [`Error::RadioUnavailable`]) if the radio refuses to
    /// scan. The session stays idle on error.
    pub async fn start(&self, config: &ScanConfig, sink: Arc<dyn ScanSink>) -> Result<()> {
        let _control = self.control.lock().await;

        if self.is_scanning() {
            return Err(Error::AlreadyScanning);
        }
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.source
            .start_scan(config.name_filter.clone(), tx)
            .await?;

        let id = {
            let mut state = self.state.lock();
            state.activations += 1;
            let id = state.activations;
            state.active = Some(Activation {
                id,
                sink: sink.clone(),
                gate: Arc::new(Mutex::new(true)),
                pump: None,
                timer: None,
            });
            id
        };

        info!(
            "Scanning for \"{}\" for {:?}",
            config.name_filter, config.duration
        );
        sink.on_scan_started();

        let pump = tokio::spawn(Self::pump(
            id,
            config.name_filter.clone(),
            rx,
            self.state.clone(),
        ));
        let timer = tokio::spawn(Self::expire(
            id,
            config.duration,
            self.source.clone(),
            self.control.clone(),
            self.state.clone(),
        ));

        let mut state = self.state.lock();
        match state.active.as_mut() {
            Some(activation) if activation.id == id => {
                activation.pump = Some(pump);
                activation.timer = Some(timer);
            }
            _ => {
                pump.abort();
                timer.abort();
            }
        }

        Ok(())
    }

    /// Stop scanning. Idempotent and never fails.
    pub async fn stop(&self) {
        let _control = self.control.lock().await;

        let activation = self.state.lock().active.take();
        match activation {
            Some(activation) => Self::finish(activation, self.source.as_ref(), false).await,
            None => debug!("Not scanning, ignoring stop request"),
        }
    }

    async fn pump(
        id: u64,
        name_filter: String,
        mut rx: mpsc::UnboundedReceiver<Advertisement>,
        state: Arc<Mutex<ScanState>>,
    ) {
        while let Some(advertisement) = rx.recv().await {
            if advertisement.identity.name != name_filter {
                trace!("Ignoring advertisement from {}", advertisement.identity);
                continue;
            }

            let (sink, gate) = {
                let guard = state.lock();
                match &guard.active {
                    Some(activation) if activation.id == id => {
                        (activation.sink.clone(), activation.gate.clone())
                    }
                    _ => break,
                }
            };

            // The state lock is released so the sink may call back into the session.
            let open = gate.lock();
            if !*open {
                break;
            }
            trace!(
                "Candidate {} ({} dBm)",
                advertisement.identity,
                advertisement.rssi
            );
            sink.on_candidate(ScanCandidate {
                identity: advertisement.identity,
                advertisement: advertisement.data,
                rssi: advertisement.rssi,
                seen_at: Utc::now(),
            });
        }

        debug!("Scan pump ended");
    }

    async fn expire(
        id: u64,
        duration: Duration,
        source: Arc<dyn AdvertisementSource>,
        control: Arc<tokio::sync::Mutex<()>>,
        state: Arc<Mutex<ScanState>>,
    ) {
        tokio::time::sleep(duration).await;

        let _control = control.lock().await;

        let activation = {
            let mut guard = state.lock();
            if guard.active.as_ref().map(|a| a.id) == Some(id) {
                guard.active.take()
            } else {
                None
            }
        };

        if let Some(activation) = activation {
            debug!("Scan window elapsed");
            Self::finish(activation, source.as_ref(), true).await;
        }
    }

    async fn finish(mut activation: Activation, source: &dyn AdvertisementSource, expired: bool) {
        if let Some(pump) = activation.pump.take() {
            pump.abort();
        }
        if let Some(timer) = activation.timer.take() {
            // The expiry task is the one running this when the window elapsed.
            if !expired {
                timer.abort();
            }
        }

        // Waits out a candidate already being delivered.
        *activation.gate.lock() = false;

        info!("Scan stopped");
        activation.sink.on_scan_stopped();

        if let Err(e) = source.stop_scan().await {
            warn!("Failed to stop radio scan: {}", e);
        }
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        let Some(mut activation) = self.state.lock().active.take() else {
            return;
        };

        debug!("Scan session dropped while scanning");
        if let Some(pump) = activation.pump.take() {
            pump.abort();
        }
        if let Some(timer) = activation.timer.take() {
            timer.abort();
        }
        *activation.gate.lock() = false;
        activation.sink.on_scan_stopped();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let source = self.source.clone();
                runtime.spawn(async move {
                    if let Err(e) = source.stop_scan().await {
                        warn!("Failed to stop radio scan: {}", e);
                    }
                });
            }
            Err(_) => warn!("No async runtime, radio scan left running"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::MockAdvertisementSource;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct FakeSource {
        sink: Mutex<Option<mpsc::UnboundedSender<Advertisement>>>,
        unavailable: bool,
        stops: Mutex<usize>,
    }

    impl FakeSource {
        fn advertise(&self, name: &str, rssi: i16) {
            if let Some(sink) = self.sink.lock().as_ref() {
                let _ = sink.send(Advertisement {
                    identity: PeripheralIdentity::new("AA:BB:CC:DD:EE:FF", name),
                    data: Bytes::from_static(&[0x02, 0x01, 0x06]),
                    rssi,
                });
            }
        }
    }

    #[async_trait]
    impl AdvertisementSource for FakeSource {
        async fn start_scan(
            &self,
            _name_filter: String,
            sink: mpsc::UnboundedSender<Advertisement>,
        ) -> Result<()> {
            if self.unavailable {
                return Err(Error::RadioUnavailable);
            }
            *self.sink.lock() = Some(sink);
            Ok(())
        }

        async fn stop_scan(&self) -> Result<()> {
            *self.stops.lock() += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl ScanSink for Log {
        fn on_scan_started(&self) {
            self.0.lock().push("started".into());
        }

        fn on_candidate(&self, candidate: ScanCandidate) {
            self.0
                .lock()
                .push(format!("{} {}", candidate.identity.name, candidate.rssi));
        }

        fn on_scan_stopped(&self) {
            self.0.lock().push("stopped".into());
        }
    }

    /// Sink that asks its own session whether it is scanning.
    #[derive(Default)]
    struct Reentrant {
        session: Mutex<std::sync::Weak<ScanSession>>,
        seen: Mutex<Vec<bool>>,
    }

    impl ScanSink for Reentrant {
        fn on_scan_started(&self) {}

        fn on_candidate(&self, _candidate: ScanCandidate) {
            let session = self.session.lock().upgrade();
            if let Some(session) = session {
                self.seen.lock().push(session.is_scanning());
            }
        }

        fn on_scan_stopped(&self) {}
    }

    fn config(secs: u64) -> ScanConfig {
        ScanConfig::new("Miji_Bluetooth01", Duration::from_secs(secs))
    }

    #[tokio::test]
    async fn test_exact_name_match_without_dedup() {
        let source = Arc::new(FakeSource::default());
        let session = ScanSession::new(source.clone());
        let log = Arc::new(Log::default());

        session.start(&config(60), log.clone()).await.unwrap();
        source.advertise("Miji_Bluetooth01", -40);
        source.advertise("Miji_Bluetooth0", -41);
        source.advertise("miji_bluetooth01", -42);
        source.advertise("Miji_Bluetooth01", -43);
        tokio::task::yield_now().await;
        session.stop().await;

        assert_eq!(
            *log.0.lock(),
            vec![
                "started".to_string(),
                "Miji_Bluetooth01 -40".to_string(),
                "Miji_Bluetooth01 -43".to_string(),
                "stopped".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_already_scanning() {
        let source = Arc::new(FakeSource::default());
        let session = ScanSession::new(source);
        let log = Arc::new(Log::default());

        session.start(&config(60), log.clone()).await.unwrap();
        let result = session.start(&config(60), log.clone()).await;
        assert!(matches!(result, Err(Error::AlreadyScanning)));
        assert!(session.is_scanning());
    }

    #[tokio::test]
    async fn test_already_scanning_wins_over_invalid_config() {
        let session = ScanSession::new(Arc::new(FakeSource::default()));
        let log = Arc::new(Log::default());

        session.start(&config(60), log.clone()).await.unwrap();
        let invalid = ScanConfig::new("", Duration::ZERO);
        let result = session.start(&invalid, log.clone()).await;
        assert!(matches!(result, Err(Error::AlreadyScanning)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sink_may_query_session_from_callback() {
        let source = Arc::new(FakeSource::default());
        let session = Arc::new(ScanSession::new(source.clone()));
        let sink = Arc::new(Reentrant::default());
        *sink.session.lock() = Arc::downgrade(&session);

        session.start(&config(60), sink.clone()).await.unwrap();
        source.advertise("Miji_Bluetooth01", -40);
        source.advertise("Miji_Bluetooth01", -41);

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let delivered = sink.seen.lock().len();
                if delivered >= 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("candidates delivered");

        tokio::time::timeout(Duration::from_secs(5), session.stop())
            .await
            .expect("stop completes");

        assert_eq!(*sink.seen.lock(), vec![true, true]);
        assert!(!session.is_scanning());
    }

    #[tokio::test]
    async fn test_drop_while_scanning_stops_radio() {
        let source = Arc::new(FakeSource::default());
        let log = Arc::new(Log::default());

        let session = ScanSession::new(source.clone());
        session.start(&config(60), log.clone()).await.unwrap();
        drop(session);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*source.stops.lock(), 1);
        assert_eq!(*log.0.lock(), vec!["started".to_string(), "stopped".to_string()]);
    }

    #[tokio::test]
    async fn test_radio_unavailable_stays_idle() {
        let source = Arc::new(FakeSource {
            unavailable: true,
            ..Default::default()
        });
        let session = ScanSession::new(source);
        let log = Arc::new(Log::default());

        let result = session.start(&config(60), log.clone()).await;
        assert!(matches!(result, Err(Error::RadioUnavailable)));
        assert!(!session.is_scanning());
        assert!(log.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_refused_scan_never_stops_radio() {
        let mut source = MockAdvertisementSource::new();
        source
            .expect_start_scan()
            .times(1)
            .returning(|_, _| Err(Error::RadioUnavailable));
        source.expect_stop_scan().never();

        let session = ScanSession::new(Arc::new(source));
        let log = Arc::new(Log::default());
        assert!(session.start(&config(5), log.clone()).await.is_err());
        session.stop().await;

        assert!(log.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let session = ScanSession::new(Arc::new(FakeSource::default()));
        let log = Arc::new(Log::default());
        let result = session.start(&ScanConfig::new("", Duration::from_secs(1)), log).await;
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_after_expiry() {
        let source = Arc::new(FakeSource::default());
        let session = ScanSession::new(source.clone());
        let log = Arc::new(Log::default());

        session.start(&config(10), log.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!session.is_scanning());

        session.stop().await;
        session.stop().await;

        assert_eq!(*log.0.lock(), vec!["started".to_string(), "stopped".to_string()]);
        assert_eq!(*source.stops.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_advertisement_after_stop_is_ignored() {
        let source = Arc::new(FakeSource::default());
        let session = ScanSession::new(source.clone());
        let log = Arc::new(Log::default());

        session.start(&config(10), log.clone()).await.unwrap();
        session.stop().await;
        source.advertise("Miji_Bluetooth01", -50);
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(*log.0.lock(), vec!["started".to_string(), "stopped".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_stop_per_activation() {
        let source = Arc::new(FakeSource::default());
        let session = ScanSession::new(source.clone());
        let log = Arc::new(Log::default());

        session.start(&config(5), log.clone()).await.unwrap();
        session.stop().await;
        session.start(&config(5), log.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        session.stop().await;

        assert_eq!(
            *log.0.lock(),
            vec![
                "started".to_string(),
                "stopped".to_string(),
                "started".to_string(),
                "stopped".to_string(),
            ]
        );
    }
}
