//! # Scan Service Module
//!
//! Runs the scan controller on a dedicated thread with its own Tokio runtime.
//! This thread is the single place where scan state and the device registry
//! are mutated.
//!
//! ## Key Components
//! - `ScanService`: the event loop that owns the `ScanController`
//! - `ScanHandle`: cheap handle the console uses to send `ScanCommand`s
//! - `ScanUpdate`: notifications sent back to the console
//!
//! ## Event Flow
//! Console commands, advertisements from the radio task, and timeout expiries
//! from timer tasks all land on one queue and are handled strictly in
//! arrival order. Nothing outside this thread touches the controller.

use crate::config::Config;
use crate::device_registry::DeviceRegistry;
use crate::error::ScanError;
use crate::radio::{BtleplugRadio, DiscoverySink, Radio};
use crate::scan_session::{
    ScanController, ScanEvent, ScanListener, TimeoutHandle, TimeoutScheduler,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCommand {
    Start,
    /// Clear the device list, then start
    Refresh,
    Stop,
    Shutdown,
}

/// Notifications from the scan thread to the console
#[derive(Debug, Clone)]
pub enum ScanUpdate {
    Started,
    /// Snapshot of the registry after it changed
    RegistryChanged(DeviceRegistry),
    Ended,
    Failed(ScanError),
}

enum ServiceEvent {
    Command(ScanCommand),
    Scan(ScanEvent),
}

/// Sends commands to a running `ScanService`
#[derive(Clone)]
pub struct ScanHandle {
    sender: Sender<ServiceEvent>,
}

impl ScanHandle {
    pub fn send(&self, command: ScanCommand) -> bool {
        self.sender.send(ServiceEvent::Command(command)).is_ok()
    }

    pub fn start(&self) -> bool {
        self.send(ScanCommand::Start)
    }

    pub fn refresh(&self) -> bool {
        self.send(ScanCommand::Refresh)
    }

    pub fn stop(&self) -> bool {
        self.send(ScanCommand::Stop)
    }

    pub fn shutdown(&self) -> bool {
        self.send(ScanCommand::Shutdown)
    }
}

struct TokioScheduler {
    runtime: Handle,
    events: Sender<ServiceEvent>,
}

impl TimeoutScheduler for TokioScheduler {
    fn arm(&mut self, after: Duration, session: u64) -> TimeoutHandle {
        let events = self.events.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(ServiceEvent::Scan(ScanEvent::TimedOut { session }));
        });
        TimeoutHandle::new(session, move || task.abort())
    }
}

struct UpdateForwarder {
    sender: Sender<ScanUpdate>,
}

impl ScanListener for UpdateForwarder {
    fn on_registry_changed(&mut self, registry: &DeviceRegistry) {
        if self.sender.send(ScanUpdate::RegistryChanged(registry.clone())).is_err() {
            log::debug!("Scan service: console gone, dropping registry update");
        }
    }

    fn on_scan_ended(&mut self) {
        if self.sender.send(ScanUpdate::Ended).is_err() {
            log::debug!("Scan service: console gone, dropping scan-ended update");
        }
    }
}

/// Owns the scan session for the lifetime of the application.
pub struct ScanService {
    events: Receiver<ServiceEvent>,
    event_sender: Sender<ServiceEvent>,
    update_sender: Sender<ScanUpdate>,
    scan_duration: Duration,
    adapter_index: usize,
}

impl ScanService {
    /// Creates a new ScanService.
    ///
    /// Returns the service and a handle for issuing commands from the console.
    pub fn new(update_sender: Sender<ScanUpdate>, config: &Config) -> (Self, ScanHandle) {
        let (event_sender, events) = unbounded();
        let handle = ScanHandle {
            sender: event_sender.clone(),
        };

        let service = ScanService {
            events,
            event_sender,
            update_sender,
            scan_duration: config.scan_duration(),
            adapter_index: config.adapter_index,
        };

        (service, handle)
    }

    /// Runs the scan loop against the system Bluetooth adapter.
    ///
    /// Call this in a spawned thread. It blocks until `ScanCommand::Shutdown`
    /// arrives. Timer and radio tasks hold senders too, so dropping every
    /// `ScanHandle` is not enough to end the loop.
    pub fn run(self) {
        let rt = match Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                let error =
                    ScanError::StartFailed(format!("Failed to create async runtime: {}", e));
                log::error!("{}", error);
                let _ = self.update_sender.send(ScanUpdate::Failed(error));
                return;
            }
        };

        let radio = BtleplugRadio::new(rt.handle().clone(), self.adapter_index);
        self.run_with(rt.handle().clone(), radio);
    }

    pub fn run_with<R: Radio>(self, runtime: Handle, radio: R) {
        let ScanService {
            events,
            event_sender,
            update_sender,
            scan_duration,
            ..
        } = self;

        let sink_sender = event_sender.clone();
        let sink = DiscoverySink::new(move |advertisement| {
            sink_sender
                .send(ServiceEvent::Scan(ScanEvent::Discovered(advertisement)))
                .is_ok()
        });
        let scheduler = TokioScheduler {
            runtime,
            events: event_sender,
        };
        let listener = UpdateForwarder {
            sender: update_sender.clone(),
        };
        let mut controller = ScanController::new(radio, scheduler, listener, sink, scan_duration);

        while let Ok(event) = events.recv() {
            match event {
                ServiceEvent::Command(ScanCommand::Start) => {
                    log::info!("Scan service: start requested");
                    report(&update_sender, controller.start_scan());
                }
                ServiceEvent::Command(ScanCommand::Refresh) => {
                    log::info!("Scan service: refresh requested");
                    report(&update_sender, controller.refresh());
                }
                ServiceEvent::Command(ScanCommand::Stop) => {
                    log::info!("Scan service: stop requested ({:?})", controller.state());
                    controller.stop_scan();
                }
                ServiceEvent::Command(ScanCommand::Shutdown) => {
                    log::info!(
                        "Scan service: shutdown requested, {} device(s) known",
                        controller.registry().count()
                    );
                    controller.stop_scan();
                    break;
                }
                ServiceEvent::Scan(event) => controller.handle_event(event),
            }
        }

        log::info!("Scan service: shutting down");
    }
}

fn report(update_sender: &Sender<ScanUpdate>, result: Result<(), ScanError>) {
    let update = match result {
        Ok(()) => ScanUpdate::Started,
        Err(e) => ScanUpdate::Failed(e),
    };
    let _ = update_sender.send(update);
}
