//! # Console Application
//!
//! Line-oriented front end for the scanner. Scan notifications and typed
//! commands both arrive as `Message`s and go through `ScanConsole::update`,
//! which returns the lines to print. The console never mutates scan state
//! itself; it keeps the latest registry snapshot and sends commands.
//!
//! ## Commands
//! - `r`: refresh (clear the list and scan again)
//! - `s`: stop scanning
//! - `l`: list devices
//! - `<n>`: show details of device `n`
//! - `h`: help
//! - `q`: quit

use crate::advertisement::{self, hex};
use crate::device_registry::{DeviceRegistry, DiscoveredDevice, RSSI_UNAVAILABLE};
use crate::scan_service::{ScanHandle, ScanUpdate};
use std::time::Duration;

const HELP: &str =
    "Commands: r = refresh, s = stop, l = list, <n> = device details, h = help, q = quit";

#[derive(Debug, Clone)]
pub enum Message {
    Scan(ScanUpdate),
    Refresh,
    Stop,
    List,
    ShowDetails(usize),
    Help,
    Quit,
}

impl Message {
    /// Parses one line of user input
    pub fn parse(line: &str) -> Result<Message, String> {
        let line = line.trim();
        match line {
            "r" | "refresh" => Ok(Message::Refresh),
            "s" | "stop" => Ok(Message::Stop),
            "l" | "list" | "" => Ok(Message::List),
            "h" | "help" | "?" => Ok(Message::Help),
            "q" | "quit" | "exit" => Ok(Message::Quit),
            _ => line
                .parse::<usize>()
                .map(Message::ShowDetails)
                .map_err(|_| format!("Unknown command '{}'", line)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleState {
    Idle,
    /// A start or refresh was sent and not yet confirmed
    Starting,
    Scanning,
}

pub struct ScanConsole {
    pub registry: DeviceRegistry,
    pub state: ConsoleState,
    scan_duration: Duration,
    scan_handle: ScanHandle,
    quit: bool,
}

impl ScanConsole {
    pub fn new(scan_handle: ScanHandle, scan_duration: Duration) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            state: ConsoleState::Idle,
            scan_duration,
            scan_handle,
            quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// Asks the scan service for a first scan, as on application start
    pub fn start(&mut self) -> Vec<String> {
        self.send_start(false)
    }

    pub fn update(&mut self, message: Message) -> Vec<String> {
        match message {
            Message::Scan(update) => self.on_scan_update(update),
            Message::Refresh => self.send_start(true),
            Message::Stop => {
                if !self.scan_handle.stop() {
                    return vec!["Scan service is not running".to_string()];
                }
                Vec::new()
            }
            Message::List => self.render_list(),
            Message::ShowDetails(index) => match self.registry.at(index) {
                Ok(device) => render_details(index, device),
                Err(e) => vec![e.to_string()],
            },
            Message::Help => vec![HELP.to_string()],
            Message::Quit => {
                self.quit = true;
                self.scan_handle.shutdown();
                vec!["Bye".to_string()]
            }
        }
    }

    fn send_start(&mut self, refresh: bool) -> Vec<String> {
        let sent = if refresh {
            self.scan_handle.refresh()
        } else {
            self.scan_handle.start()
        };
        if !sent {
            return vec!["Scan service is not running".to_string()];
        }
        self.state = ConsoleState::Starting;
        Vec::new()
    }

    fn on_scan_update(&mut self, update: ScanUpdate) -> Vec<String> {
        match update {
            ScanUpdate::Started => {
                self.state = ConsoleState::Scanning;
                vec![format!("Scanning for {} s...", self.scan_duration.as_secs())]
            }
            ScanUpdate::RegistryChanged(registry) => {
                let added: Vec<String> = registry
                    .iter()
                    .enumerate()
                    .skip(self.registry.count())
                    .map(|(i, device)| render_row(i, device))
                    .collect();
                let cleared = registry.count() < self.registry.count();
                self.registry = registry;
                if cleared {
                    vec!["Device list cleared".to_string()]
                } else {
                    added
                }
            }
            ScanUpdate::Ended => {
                self.state = ConsoleState::Idle;
                vec![format!("Scan finished, {} device(s) found", self.registry.count())]
            }
            ScanUpdate::Failed(e) => {
                self.state = ConsoleState::Idle;
                vec![format!("Could not scan: {}", e)]
            }
        }
    }

    fn render_list(&self) -> Vec<String> {
        let status = match self.state {
            ConsoleState::Idle => "idle",
            ConsoleState::Starting => "starting",
            ConsoleState::Scanning => "scanning",
        };
        let mut lines = vec![format!("Devices ({}) [{}]", self.registry.count(), status)];
        if self.registry.is_empty() {
            lines.push("  No devices found. Type 'r' to scan again.".to_string());
        }
        lines.extend(
            self.registry
                .iter()
                .enumerate()
                .map(|(i, device)| render_row(i, device)),
        );
        lines
    }
}

fn rssi_text(rssi: i16) -> String {
    if rssi == RSSI_UNAVAILABLE {
        "n/a".to_string()
    } else {
        format!("{} dBm", rssi)
    }
}

fn render_row(index: usize, device: &DiscoveredDevice) -> String {
    format!(
        "{:>3}. {:<24} {}  {}",
        index,
        device.display_name(),
        device.address,
        rssi_text(device.rssi)
    )
}

fn render_details(index: usize, device: &DiscoveredDevice) -> Vec<String> {
    let mut lines = vec![
        format!("Device {}", index),
        format!("  Name:       {}", device.display_name()),
        format!("  Id:         {}", device.id),
        format!("  Address:    {}", device.address),
        format!("  RSSI:       {}", rssi_text(device.rssi)),
        format!("  First seen: {}", device.first_seen.format("%Y-%m-%d %H:%M:%S")),
    ];
    if device.payload.is_empty() {
        lines.push("  Payload:    (empty)".to_string());
    } else {
        lines.push(format!("  Payload:    {}", hex(&device.payload)));
        lines.extend(
            advertisement::parse(&device.payload)
                .iter()
                .map(|ad| format!("    {}", ad)),
        );
    }
    lines
}
