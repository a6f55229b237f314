//! # Discovered-Device Registry
//!
//! Insertion-ordered list of the unique peripherals seen during scanning.
//! The scan thread is the only writer; the console only ever gets a cloned
//! snapshot after a change notification.
//!
//! Entries are keyed on the radio's peripheral id, not the hardware address:
//! some platforms (CoreBluetooth) hide MAC addresses and report all zeroes.
//! Re-discovering a known id is a no-op: the first-seen name, RSSI and
//! payload are kept and the entry does not move.

use crate::error::ScanError;
use chrono::{DateTime, Local};

const UNKNOWN_DEVICE: &str = "Unknown device";

/// HCI's "RSSI not available" value, used when the radio reports none
pub const RSSI_UNAVAILABLE: i16 = 127;

/// One advertisement as delivered by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Stable per-peripheral identity assigned by the radio
    pub id: String,
    /// Hardware address as reported; may be all zeroes
    pub address: String,
    pub name: Option<String>,
    pub rssi: i16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: String,
    pub address: String,
    pub name: Option<String>,
    pub rssi: i16,
    pub payload: Vec<u8>,
    pub first_seen: DateTime<Local>,
}

impl DiscoveredDevice {
    pub fn new(advertisement: Advertisement) -> Self {
        Self {
            id: advertisement.id,
            address: advertisement.address,
            name: advertisement.name,
            rssi: advertisement.rssi,
            payload: advertisement.payload,
            first_seen: Local::now(),
        }
    }

    /// Name to show in the list; empty names count as missing
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => UNKNOWN_DEVICE,
        }
    }
}

impl From<Advertisement> for DiscoveredDevice {
    fn from(advertisement: Advertisement) -> Self {
        Self::new(advertisement)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<DiscoveredDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `device` unless its id is already known.
    ///
    /// Returns `true` when a new entry was appended.
    pub fn upsert(&mut self, device: DiscoveredDevice) -> bool {
        if self.contains(&device.id) {
            return false;
        }
        self.devices.push(device);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.iter().any(|d| d.id == id)
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Entry at `index` in first-seen order
    pub fn at(&self, index: usize) -> Result<&DiscoveredDevice, ScanError> {
        self.devices.get(index).ok_or(ScanError::IndexOutOfRange {
            index,
            len: self.devices.len(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredDevice> {
        self.devices.iter()
    }
}
