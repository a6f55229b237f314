//! # Scan Session Controller
//!
//! Owns the scanning on/off state, the armed timeout, and the device registry.
//!
//! ```text
//! Idle --start--> Scanning --timeout--> StoppingOnTimeout --> Idle
//!                    |  ^
//!                    |  +-- start (restart: old timeout cancelled)
//!                    +--stop--> Idle
//! ```
//!
//! Every method here must be called from the one thread that owns the
//! controller. Radio callbacks and timer expiries come in as `ScanEvent`s on
//! that thread's queue and are applied through `handle_event`.
//!
//! Each `start_scan` advances a session number and stamps it on the timeout
//! it arms. An expiry carrying an older number is dropped, so even a timeout
//! that was already queued when it got cancelled cannot end the new session.

use crate::device_registry::{Advertisement, DeviceRegistry, DiscoveredDevice};
use crate::error::ScanError;
use crate::radio::{DiscoverySink, Radio};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    StoppingOnTimeout,
}

/// Asynchronous input to the controller, serialized onto its thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Discovered(Advertisement),
    TimedOut { session: u64 },
}

/// An armed one-shot timeout
pub struct TimeoutHandle {
    session: u64,
    cancel: Box<dyn FnOnce() + Send>,
}

impl TimeoutHandle {
    pub fn new<F>(session: u64, cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            session,
            cancel: Box::new(cancel),
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn cancel(self) {
        (self.cancel)()
    }
}

/// Arms timeouts that come back as `ScanEvent::TimedOut { session }`
pub trait TimeoutScheduler {
    fn arm(&mut self, after: Duration, session: u64) -> TimeoutHandle;
}

/// Notifications for the presentation layer
pub trait ScanListener {
    /// Raised after every discovery accepted during a scan, and after a refresh clears the list
    fn on_registry_changed(&mut self, registry: &DeviceRegistry);

    /// Raised once per session that was running: on timeout, on stop, or when
    /// a restart tears it down and then fails to start again
    fn on_scan_ended(&mut self);
}

pub struct ScanController<R, S, L> {
    radio: R,
    scheduler: S,
    listener: L,
    sink: DiscoverySink,
    registry: DeviceRegistry,
    state: ScanState,
    scan_duration: Duration,
    timeout: Option<TimeoutHandle>,
    session: u64,
}

impl<R, S, L> ScanController<R, S, L>
where
    R: Radio,
    S: TimeoutScheduler,
    L: ScanListener,
{
    pub fn new(
        radio: R,
        scheduler: S,
        listener: L,
        sink: DiscoverySink,
        scan_duration: Duration,
    ) -> Self {
        Self {
            radio,
            scheduler,
            listener,
            sink,
            registry: DeviceRegistry::new(),
            state: ScanState::Idle,
            scan_duration,
            timeout: None,
            session: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Starts a scan session, replacing the current one if scanning.
    ///
    /// On failure the controller is left `Idle` and the error is returned
    /// as-is; nothing is retried.
    pub fn start_scan(&mut self) -> Result<(), ScanError> {
        self.cancel_timeout();
        self.session += 1;

        let restarting = self.state == ScanState::Scanning;
        if restarting {
            log::debug!("Restarting scan, session {}", self.session);
            self.radio.stop_discovery();
        }

        match self.radio.start_discovery(self.sink.clone()) {
            Ok(()) => {
                self.state = ScanState::Scanning;
                self.timeout = Some(self.scheduler.arm(self.scan_duration, self.session));
                log::info!(
                    "Scan session {} started for {:?}",
                    self.session,
                    self.scan_duration
                );
                Ok(())
            }
            Err(e) => {
                self.state = ScanState::Idle;
                log::error!("Scan session {} failed to start: {}", self.session, e);
                if restarting {
                    self.listener.on_scan_ended();
                }
                Err(e)
            }
        }
    }

    /// Halts scanning. No-op while idle.
    pub fn stop_scan(&mut self) {
        if self.state == ScanState::Idle {
            return;
        }
        self.cancel_timeout();
        self.radio.stop_discovery();
        self.state = ScanState::Idle;
        log::info!("Scan session {} stopped", self.session);
        self.listener.on_scan_ended();
    }

    /// Manual refresh: forget every device, then start a fresh session
    pub fn refresh(&mut self) -> Result<(), ScanError> {
        self.registry.clear();
        self.listener.on_registry_changed(&self.registry);
        self.start_scan()
    }

    pub fn handle_event(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::Discovered(advertisement) => self.on_discovered(advertisement),
            ScanEvent::TimedOut { session } => self.on_timed_out(session),
        }
    }

    fn on_discovered(&mut self, advertisement: Advertisement) {
        if self.state != ScanState::Scanning {
            log::debug!("Dropping advertisement from {} outside a scan", advertisement.id);
            return;
        }
        if self.registry.upsert(DiscoveredDevice::from(advertisement)) {
            if let Ok(device) = self.registry.at(self.registry.count() - 1) {
                log::info!(
                    "Discovered {} ({}) at {} dBm",
                    device.display_name(),
                    device.address,
                    device.rssi
                );
            }
        }
        self.listener.on_registry_changed(&self.registry);
    }

    fn on_timed_out(&mut self, session: u64) {
        if self.state != ScanState::Scanning || session != self.session {
            log::debug!("Ignoring stale timeout for session {}", session);
            return;
        }
        // Already fired; nothing left to cancel.
        self.timeout = None;
        self.state = ScanState::StoppingOnTimeout;
        log::info!("Scan session {} timed out, stopping scan", session);
        self.radio.stop_discovery();
        self.state = ScanState::Idle;
        self.listener.on_scan_ended();
    }

    fn cancel_timeout(&mut self) {
        if let Some(timeout) = self.timeout.take() {
            log::debug!("Cancelling timeout for session {}", timeout.session());
            timeout.cancel();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct RadioLog {
        pub starts: usize,
        pub stops: usize,
        pub fail_next: Option<ScanError>,
        pub sink: Option<DiscoverySink>,
    }

    #[derive(Clone, Default)]
    pub struct FakeRadio(pub Arc<Mutex<RadioLog>>);

    impl Radio for FakeRadio {
        fn start_discovery(&mut self, sink: DiscoverySink) -> Result<(), ScanError> {
            let mut log = self.0.lock().unwrap();
            if let Some(err) = log.fail_next.take() {
                return Err(err);
            }
            log.starts += 1;
            log.sink = Some(sink);
            Ok(())
        }

        fn stop_discovery(&mut self) {
            let mut log = self.0.lock().unwrap();
            log.stops += 1;
            log.sink = None;
        }
    }

    #[derive(Default)]
    struct SchedulerLog {
        armed: Vec<(Duration, u64)>,
        cancelled: Vec<u64>,
    }

    #[derive(Clone, Default)]
    struct ManualScheduler(Arc<Mutex<SchedulerLog>>);

    impl TimeoutScheduler for ManualScheduler {
        fn arm(&mut self, after: Duration, session: u64) -> TimeoutHandle {
            self.0.lock().unwrap().armed.push((after, session));
            let log = self.0.clone();
            TimeoutHandle::new(session, move || log.lock().unwrap().cancelled.push(session))
        }
    }

    #[derive(Default)]
    struct ListenerLog {
        changes: Vec<Vec<String>>,
        ended: usize,
    }

    #[derive(Clone, Default)]
    struct RecordingListener(Arc<Mutex<ListenerLog>>);

    impl ScanListener for RecordingListener {
        fn on_registry_changed(&mut self, registry: &DeviceRegistry) {
            let ids = registry.iter().map(|d| d.id.clone()).collect();
            self.0.lock().unwrap().changes.push(ids);
        }

        fn on_scan_ended(&mut self) {
            self.0.lock().unwrap().ended += 1;
        }
    }

    struct Harness {
        controller: TestController,
        radio: FakeRadio,
        scheduler: ManualScheduler,
        listener: RecordingListener,
    }

    const DURATION: Duration = Duration::from_secs(120);

    fn harness() -> Harness {
        let radio = FakeRadio::default();
        let scheduler = ManualScheduler::default();
        let listener = RecordingListener::default();
        let sink = DiscoverySink::new(|_| true);
        let controller = ScanController::new(
            radio.clone(),
            scheduler.clone(),
            listener.clone(),
            sink,
            DURATION,
        );
        Harness { controller, radio, scheduler, listener }
    }

    pub fn adv(id: &str) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            address: "00:00:00:00:00:00".to_string(),
            name: Some(format!("dev-{}", id)),
            rssi: -60,
            payload: vec![0x02, 0x01, 0x06],
        }
    }

    type TestController = ScanController<FakeRadio, ManualScheduler, RecordingListener>;

    fn ids(controller: &TestController) -> Vec<String> {
        controller.registry().iter().map(|d| d.id.clone()).collect()
    }

    #[test]
    fn test_starts_idle() {
        let h = harness();
        assert_eq!(h.controller.state(), ScanState::Idle);
        assert!(h.controller.registry().is_empty());
    }

    #[test]
    fn test_start_arms_timeout_and_starts_radio() {
        let mut h = harness();
        h.controller.start_scan().unwrap();

        assert_eq!(h.controller.state(), ScanState::Scanning);
        assert_eq!(h.radio.0.lock().unwrap().starts, 1);
        assert_eq!(h.scheduler.0.lock().unwrap().armed, vec![(DURATION, 1)]);
    }

    #[test]
    fn test_duplicate_discoveries_deduplicated() {
        let mut h = harness();
        h.controller.start_scan().unwrap();
        for address in ["A", "B", "A", "C"] {
            h.controller.handle_event(ScanEvent::Discovered(adv(address)));
        }

        assert_eq!(h.controller.registry().count(), 3);
        assert_eq!(ids(&h.controller), ["A", "B", "C"]);
        // Every callback is announced, including the repeat of A.
        let changes = h.listener.0.lock().unwrap().changes.clone();
        assert_eq!(changes.len(), 4);
        assert_eq!(changes[2], ["A", "B"]);
    }

    #[test]
    fn test_discoveries_ignored_while_idle() {
        let mut h = harness();
        h.controller.handle_event(ScanEvent::Discovered(adv("A")));
        assert!(h.controller.registry().is_empty());
        assert!(h.listener.0.lock().unwrap().changes.is_empty());
    }

    #[test]
    fn test_timeout_with_no_discoveries() {
        let mut h = harness();
        h.controller.start_scan().unwrap();
        h.controller.handle_event(ScanEvent::TimedOut { session: 1 });

        assert_eq!(h.controller.state(), ScanState::Idle);
        assert_eq!(h.listener.0.lock().unwrap().ended, 1);
        assert_eq!(h.radio.0.lock().unwrap().stops, 1);
        assert!(h.controller.registry().is_empty());
    }

    #[test]
    fn test_timeout_keeps_registry() {
        let mut h = harness();
        h.controller.start_scan().unwrap();
        h.controller.handle_event(ScanEvent::Discovered(adv("A")));
        h.controller.handle_event(ScanEvent::TimedOut { session: 1 });

        assert_eq!(ids(&h.controller), ["A"]);
        h.controller.handle_event(ScanEvent::Discovered(adv("B")));
        assert_eq!(ids(&h.controller), ["A"]);
    }

    #[test]
    fn test_restart_cancels_previous_timeout() {
        let mut h = harness();
        h.controller.start_scan().unwrap();
        h.controller.start_scan().unwrap();

        {
            let log = h.scheduler.0.lock().unwrap();
            assert_eq!(log.armed, vec![(DURATION, 1), (DURATION, 2)]);
            assert_eq!(log.cancelled, vec![1]);
        }

        // The first session's expiry may already be queued; it must not count.
        h.controller.handle_event(ScanEvent::TimedOut { session: 1 });
        assert_eq!(h.controller.state(), ScanState::Scanning);
        assert_eq!(h.listener.0.lock().unwrap().ended, 0);

        h.controller.handle_event(ScanEvent::TimedOut { session: 2 });
        assert_eq!(h.controller.state(), ScanState::Idle);
        assert_eq!(h.listener.0.lock().unwrap().ended, 1);

        h.controller.handle_event(ScanEvent::TimedOut { session: 2 });
        assert_eq!(h.listener.0.lock().unwrap().ended, 1);
    }

    #[test]
    fn test_refresh_clears_and_rearms() {
        let mut h = harness();
        h.controller.start_scan().unwrap();
        h.controller.handle_event(ScanEvent::Discovered(adv("A")));
        h.controller.handle_event(ScanEvent::Discovered(adv("B")));

        h.controller.refresh().unwrap();

        assert!(h.controller.registry().is_empty());
        assert_eq!(h.controller.state(), ScanState::Scanning);
        assert_eq!(h.scheduler.0.lock().unwrap().cancelled, vec![1]);
        assert_eq!(h.listener.0.lock().unwrap().changes.last(), Some(&Vec::new()));

        h.controller.handle_event(ScanEvent::TimedOut { session: 1 });
        assert_eq!(h.controller.state(), ScanState::Scanning);
        assert_eq!(h.listener.0.lock().unwrap().ended, 0);
    }

    #[test]
    fn test_stop_while_idle_is_noop() {
        let mut h = harness();
        h.controller.stop_scan();

        assert_eq!(h.controller.state(), ScanState::Idle);
        assert_eq!(h.radio.0.lock().unwrap().stops, 0);
        assert_eq!(h.listener.0.lock().unwrap().ended, 0);
    }

    #[test]
    fn test_stop_cancels_timeout() {
        let mut h = harness();
        h.controller.start_scan().unwrap();
        h.controller.stop_scan();
        h.controller.stop_scan();

        assert_eq!(h.controller.state(), ScanState::Idle);
        assert_eq!(h.scheduler.0.lock().unwrap().cancelled, vec![1]);
        assert_eq!(h.radio.0.lock().unwrap().stops, 1);
        assert_eq!(h.listener.0.lock().unwrap().ended, 1);

        h.controller.handle_event(ScanEvent::TimedOut { session: 1 });
        assert_eq!(h.listener.0.lock().unwrap().ended, 1);
    }

    #[test]
    fn test_failed_start_stays_idle() {
        let mut h = harness();
        h.radio.0.lock().unwrap().fail_next = Some(ScanError::RadioUnavailable);

        assert_eq!(h.controller.start_scan(), Err(ScanError::RadioUnavailable));
        assert_eq!(h.controller.state(), ScanState::Idle);
        assert!(h.scheduler.0.lock().unwrap().armed.is_empty());
        // Nothing was running, so there is no session to end.
        assert_eq!(h.listener.0.lock().unwrap().ended, 0);

        // A fresh start is the retry.
        h.controller.start_scan().unwrap();
        assert_eq!(h.controller.state(), ScanState::Scanning);
    }

    #[test]
    fn test_failed_restart_ends_previous_session() {
        let mut h = harness();
        h.controller.start_scan().unwrap();
        h.radio.0.lock().unwrap().fail_next = Some(ScanError::StartFailed("busy".to_string()));

        assert!(h.controller.start_scan().is_err());
        assert_eq!(h.controller.state(), ScanState::Idle);
        assert_eq!(h.scheduler.0.lock().unwrap().cancelled, vec![1]);
        // The session that was torn down still gets its one scan-ended.
        assert_eq!(h.listener.0.lock().unwrap().ended, 1);

        h.controller.handle_event(ScanEvent::TimedOut { session: 1 });
        h.controller.handle_event(ScanEvent::TimedOut { session: 2 });
        assert_eq!(h.listener.0.lock().unwrap().ended, 1);
    }
}
