//! Parsing of printer responses: print status, heartbeat and info values.

use super::packet::Packet;
use super::{RESPONSE_NOT_SUPPORTED, RESPONSE_PRINT_ERROR};
use crate::{NiimbotError, Result};

/// Print progress reported by QueryStatus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintStatus {
    /// Pages completed so far.
    pub page: u16,
    pub print_percent: u8,
    pub feed_percent: u8,
}

impl PrintStatus {
    /// Parse a QueryStatus response. Short payloads carry no status.
    pub fn parse(packet: &Packet) -> Option<Self> {
        match packet.payload() {
            [page_hi, page_lo, print, feed, ..] => Some(Self {
                page: u16::from_be_bytes([*page_hi, *page_lo]),
                print_percent: *print,
                feed_percent: *feed,
            }),
            _ => None,
        }
    }

    /// True once `total_pages` pages are fully printed and fed.
    pub fn is_complete(&self, total_pages: u16) -> bool {
        self.page == total_pages && self.print_percent >= 100 && self.feed_percent >= 100
    }
}

/// Device state reported by Heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub closing_state: u8,
    pub power_level: u8,
    pub paper_state: u8,
    pub rfid_read_state: u8,
    pub printing_completed: Option<bool>,
}

impl Heartbeat {
    pub fn parse(packet: &Packet) -> Option<Self> {
        let data = packet.payload();
        if data.len() < 4 {
            return None;
        }
        Some(Self {
            closing_state: data[0],
            power_level: data[1],
            paper_state: data[2],
            rfid_read_state: data[3],
            printing_completed: data.get(9).map(|&b| b == 1),
        })
    }
}

/// Keys accepted by GetInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InfoKey {
    Density = 1,
    PrintSpeed = 2,
    LabelType = 3,
    LanguageType = 6,
    AutoShutdownTime = 7,
    DeviceType = 8,
    SoftVersion = 9,
    Battery = 10,
    DeviceSerial = 11,
    HardVersion = 12,
}

/// A decoded GetInfo answer.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    Number(u64),
    /// Firmware/hardware versions are reported in hundredths.
    Version(f32),
    Serial(String),
}

impl InfoKey {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn decode(self, packet: &Packet) -> InfoValue {
        match self {
            InfoKey::DeviceSerial => InfoValue::Serial(
                packet.payload().iter().map(|b| format!("{b:02x}")).collect(),
            ),
            InfoKey::SoftVersion | InfoKey::HardVersion => {
                InfoValue::Version(packet.payload_as_uint() as f32 / 100.0)
            }
            _ => InfoValue::Number(packet.payload_as_uint()),
        }
    }
}

impl std::fmt::Display for InfoValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InfoValue::Number(n) => write!(f, "{n}"),
            InfoValue::Version(v) => write!(f, "{v:.2}"),
            InfoValue::Serial(s) => f.write_str(s),
        }
    }
}

/// Reject packets that carry an explicit printer-side error.
pub fn check_device_error(packet: &Packet) -> Result<()> {
    match packet.command() {
        RESPONSE_PRINT_ERROR => Err(NiimbotError::Protocol(format!(
            "printer reported error code {:#04x}",
            packet.payload().first().copied().unwrap_or_default()
        ))),
        RESPONSE_NOT_SUPPORTED => Err(NiimbotError::Protocol(
            "printer does not support the request".into(),
        )),
        _ => Ok(()),
    }
}
