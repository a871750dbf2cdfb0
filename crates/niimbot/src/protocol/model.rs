//! Per-model encoding rules.
//!
//! The B1 and D110 families speak the same command set but use different
//! payload layouts for BeginPrint and SetPageSize, and only the D110 family
//! knows the Clear command. Every format decision in a print session goes
//! through the single [`ModelProfile`] resolved at connect time.

use super::Command;
use super::packet::Packet;
use crate::{NiimbotError, Result};

/// Firmware protocol variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    /// Wide layouts: 7-byte BeginPrint, copies carried inside SetPageSize.
    B1,
    /// Minimal layouts: 1-byte BeginPrint, separate SetQuantity, Clear per page.
    D110,
}

/// How the end of a print job is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStrategy {
    /// Poll QueryStatus until page/print/feed progress reports done.
    StatusPoll,
    /// Repeat EndPrint until its acknowledgement reports done.
    EndAck,
}

/// Immutable per-model configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelProfile {
    pub family: ModelFamily,
    /// Canonical model identifier (e.g. "b1").
    pub name: &'static str,
    /// Print head width in pixels.
    pub max_width_px: u16,
    pub has_clear_command: bool,
    pub completion_strategy: CompletionStrategy,
}

const B1: ModelProfile = ModelProfile {
    family: ModelFamily::B1,
    name: "b1",
    max_width_px: 384,
    has_clear_command: false,
    completion_strategy: CompletionStrategy::StatusPoll,
};

// The D110 status channel mirrors the B1 one on the firmware seen so far;
// switch to EndAck here if a revision stops answering QueryStatus.
const D110: ModelProfile = ModelProfile {
    family: ModelFamily::D110,
    name: "d110",
    max_width_px: 240,
    has_clear_command: true,
    completion_strategy: CompletionStrategy::StatusPoll,
};

/// Known model identifiers.
const PROFILES: &[ModelProfile] = &[B1, D110];

/// Advertised-name prefixes mapped to the model they identify.
const NAME_PREFIXES: &[(&str, &str)] = &[("D110", "d110"), ("B1", "b1")];

impl ModelProfile {
    /// Look up the profile for a model identifier.
    ///
    /// Unknown identifiers fail closed: guessing a byte layout for unknown
    /// hardware risks a wasted label or a jam.
    pub fn resolve(model_identifier: &str) -> Result<Self> {
        let wanted = model_identifier.trim();
        PROFILES
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(wanted))
            .copied()
            .ok_or_else(|| NiimbotError::UnknownModel(model_identifier.to_string()))
    }

    /// Guess the model identifier from an advertised device name
    /// (e.g. "B1-H813122541" → "b1").
    pub fn infer_from_device_name(name: &str) -> Option<&'static str> {
        let upper = name.trim().to_ascii_uppercase();
        NAME_PREFIXES
            .iter()
            .find(|(prefix, _)| upper.starts_with(prefix))
            .map(|&(_, model)| model)
    }

    /// BeginPrint payload for a job of `total_pages` printed pages.
    pub fn begin_print_payload(&self, total_pages: u16) -> Vec<u8> {
        match self.family {
            ModelFamily::B1 => {
                let mut payload = total_pages.to_be_bytes().to_vec();
                payload.extend_from_slice(&[0x00; 5]);
                payload
            }
            ModelFamily::D110 => vec![0x01],
        }
    }

    /// SetPageSize payload. B1 carries the copy count, D110 does not.
    pub fn page_size_payload(&self, height: u16, width: u16, copies: u16) -> Vec<u8> {
        let mut payload = Vec::with_capacity(6);
        payload.extend_from_slice(&height.to_be_bytes());
        payload.extend_from_slice(&width.to_be_bytes());
        if self.family == ModelFamily::B1 {
            payload.extend_from_slice(&copies.to_be_bytes());
        }
        payload
    }

    /// Whether copies need a dedicated SetQuantity command.
    pub fn needs_set_quantity(&self) -> bool {
        self.family == ModelFamily::D110
    }

    /// Packets that size one page, in wire order.
    pub fn page_size_packets(&self, height: u16, width: u16, copies: u16) -> Result<Vec<Packet>> {
        let payload = self.page_size_payload(height, width, copies);
        let mut packets = vec![Command::SetPageSize.packet(payload)?];
        if self.needs_set_quantity() {
            packets.push(Command::SetQuantity.packet(copies.to_be_bytes())?);
        }
        Ok(packets)
    }
}
