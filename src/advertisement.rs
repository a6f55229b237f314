//! # Advertisement Payload Module
//!
//! btleplug reports parsed peripheral properties, not the raw advertising
//! PDU. To keep an opaque payload per device we rebuild the standard AD
//! structure layout (`len`, `type`, `data...`) from those properties, and
//! decode it again for the details view.

use std::collections::BTreeMap;
use std::fmt;

pub const AD_INCOMPLETE_16BIT_UUIDS: u8 = 0x02;
pub const AD_COMPLETE_16BIT_UUIDS: u8 = 0x03;
pub const AD_COMPLETE_128BIT_UUIDS: u8 = 0x07;
pub const AD_SHORTENED_LOCAL_NAME: u8 = 0x08;
pub const AD_COMPLETE_LOCAL_NAME: u8 = 0x09;
pub const AD_TX_POWER_LEVEL: u8 = 0x0A;
pub const AD_SERVICE_DATA_16BIT: u8 = 0x16;
pub const AD_MANUFACTURER_DATA: u8 = 0xFF;

/// Low 96 bits of the Bluetooth base UUID 0000xxxx-0000-1000-8000-00805F9B34FB
const BASE_UUID_LOW: u128 = 0x0000_1000_8000_0080_5F9B_34FB;
const LOW_96_MASK: u128 = (1 << 96) - 1;

/// Largest data field a single AD structure can carry
const MAX_AD_DATA: usize = u8::MAX as usize - 1;

/// One decoded AD structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdStructure {
    pub ad_type: u8,
    pub data: Vec<u8>,
}

impl AdStructure {
    pub fn type_name(&self) -> &'static str {
        match self.ad_type {
            0x01 => "Flags",
            AD_INCOMPLETE_16BIT_UUIDS => "Incomplete 16-bit UUIDs",
            AD_COMPLETE_16BIT_UUIDS => "Complete 16-bit UUIDs",
            0x06 => "Incomplete 128-bit UUIDs",
            AD_COMPLETE_128BIT_UUIDS => "Complete 128-bit UUIDs",
            AD_SHORTENED_LOCAL_NAME => "Shortened Local Name",
            AD_COMPLETE_LOCAL_NAME => "Complete Local Name",
            AD_TX_POWER_LEVEL => "TX Power Level",
            AD_SERVICE_DATA_16BIT => "Service Data",
            AD_MANUFACTURER_DATA => "Manufacturer Specific Data",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for AdStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:02X}] {}: ", self.ad_type, self.type_name())?;
        match self.ad_type {
            AD_SHORTENED_LOCAL_NAME | AD_COMPLETE_LOCAL_NAME => {
                write!(f, "{}", String::from_utf8_lossy(&self.data))
            }
            AD_TX_POWER_LEVEL if self.data.len() == 1 => {
                write!(f, "{} dBm", self.data[0] as i8)
            }
            AD_MANUFACTURER_DATA if self.data.len() >= 2 => {
                let company = u16::from_le_bytes([self.data[0], self.data[1]]);
                write!(f, "company 0x{:04X} {}", company, hex(&self.data[2..]))
            }
            _ => write!(f, "{}", hex(&self.data)),
        }
    }
}

/// Builds a payload from the properties a radio reports
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    bytes: Vec<u8>,
}

impl PayloadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, ad_type: u8, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let data = &data[..data.len().min(MAX_AD_DATA)];
        self.bytes.push(data.len() as u8 + 1);
        self.bytes.push(ad_type);
        self.bytes.extend_from_slice(data);
    }

    pub fn local_name(mut self, name: Option<&str>) -> Self {
        if let Some(name) = name {
            self.push(AD_COMPLETE_LOCAL_NAME, name.as_bytes());
        }
        self
    }

    pub fn tx_power(mut self, level: Option<i16>) -> Self {
        if let Some(level) = level {
            let clamped = level.clamp(i8::MIN as i16, i8::MAX as i16) as i8;
            self.push(AD_TX_POWER_LEVEL, &clamped.to_le_bytes());
        }
        self
    }

    /// Service UUIDs as 128-bit integers; base-UUID aliases shrink to 16 bits
    pub fn services(mut self, uuids: &[u128]) -> Self {
        let mut short = Vec::new();
        let mut long = Vec::new();
        for &uuid in uuids {
            match short_uuid(uuid) {
                Some(alias) => short.extend_from_slice(&alias.to_le_bytes()),
                None => long.extend_from_slice(&uuid.to_le_bytes()),
            }
        }
        self.push(AD_COMPLETE_16BIT_UUIDS, &short);
        self.push(AD_COMPLETE_128BIT_UUIDS, &long);
        self
    }

    pub fn manufacturer_data(mut self, data: &BTreeMap<u16, Vec<u8>>) -> Self {
        for (company, bytes) in data {
            let mut field = company.to_le_bytes().to_vec();
            field.extend_from_slice(bytes);
            self.push(AD_MANUFACTURER_DATA, &field);
        }
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

fn short_uuid(uuid: u128) -> Option<u16> {
    if uuid & LOW_96_MASK != BASE_UUID_LOW {
        return None;
    }
    u16::try_from(uuid >> 96).ok()
}

/// Splits a payload into AD structures.
///
/// Stops at a zero length byte (padding) or a structure running past the end.
pub fn parse(payload: &[u8]) -> Vec<AdStructure> {
    let mut structures = Vec::new();
    let mut i = 0;
    while i < payload.len() {
        let len = payload[i] as usize;
        if len == 0 || i + len >= payload.len() {
            break;
        }
        structures.push(AdStructure {
            ad_type: payload[i + 1],
            data: payload[i + 2..i + 1 + len].to_vec(),
        });
        i += len + 1;
    }
    structures
}

pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
