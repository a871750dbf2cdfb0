//! Niimbot label printer control library supporting the B1 and D110 families.
//!
//! Provides the framed packet codec, per-model encoding rules, bitmap line
//! encoding, a BLE transport, device discovery and the print session state
//! machine that drives one job from configuration to completion.

pub mod bitmap;
pub mod ble;
pub mod config;
pub mod discovery;
pub mod info;
pub mod job;
pub mod lock;
pub mod protocol;
pub mod session;
pub mod transport;

use std::time::Duration;

// Re-exports for convenience
pub use bitmap::MonoImage;
pub use ble::BleConnection;
pub use config::SessionConfig;
pub use discovery::{DiscoveredDevice, Discovery};
pub use info::DeviceInfo;
pub use job::PrintJob;
pub use lock::DeviceLocks;
pub use protocol::model::{CompletionStrategy, ModelFamily, ModelProfile};
pub use protocol::packet::Packet;
pub use session::{PrintProgress, PrintReport, PrintSession, SessionState};
pub use transport::Transport;

/// Print head resolution shared by every supported model.
pub const DPI: u16 = 203;

/// Convert a physical length in millimetres to device pixels at [`DPI`].
pub fn mm_to_px(mm: f32) -> u16 {
    (mm * f32::from(DPI) / 25.4).round().clamp(0.0, f32::from(u16::MAX)) as u16
}

/// Why a BLE connection attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("device or GATT characteristic not found: {0}")]
    NotFound(String),

    #[error("connection timeout after {0:?}")]
    Timeout(Duration),

    #[error("connection rejected: {0}")]
    Rejected(String),
}

/// Errors that can occur during printer operations.
#[derive(Debug, thiserror::Error)]
pub enum NiimbotError {
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    #[error("Malformed packet: {0}")]
    Framing(String),

    #[error("Payload too large: {0} bytes (max 255)")]
    PayloadTooLarge(usize),

    #[error("Label too wide: {width}px exceeds the {max}px print head")]
    LabelTooWide { width: u16, max: u16 },

    #[error("Image is not black and white")]
    NotMonochrome,

    #[error("Invalid print job: {0}")]
    InvalidJob(String),

    #[error("Unknown printer model: {0}")]
    UnknownModel(String),

    #[error("BLE adapter error: {0}")]
    Adapter(String),

    #[error("BLE scan error: {0}")]
    Scan(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("BLE write error: {0}")]
    Write(String),

    #[error("Timed out after {0:?} waiting for a notification")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Printer did not report completion within {0:?}")]
    PrintTimeout(Duration),

    #[error("Device {0} is busy with another session")]
    DeviceBusy(String),

    #[error("Print session cancelled")]
    Cancelled,
}

/// Terminal failure category of a print session, for display and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    InvalidInput,
    Transport,
    Protocol,
    PrintTimeout,
    DeviceBusy,
    Cancelled,
}

impl NiimbotError {
    /// Map this error onto the session failure category it produces.
    pub fn fail_reason(&self) -> FailReason {
        match self {
            Self::PayloadTooLarge(_)
            | Self::LabelTooWide { .. }
            | Self::NotMonochrome
            | Self::InvalidJob(_)
            | Self::UnknownModel(_) => FailReason::InvalidInput,
            Self::Checksum { .. } | Self::Framing(_) | Self::Protocol(_) => FailReason::Protocol,
            Self::Adapter(_)
            | Self::Scan(_)
            | Self::Connection(_)
            | Self::Write(_)
            | Self::Timeout(_) => FailReason::Transport,
            Self::PrintTimeout(_) => FailReason::PrintTimeout,
            Self::DeviceBusy(_) => FailReason::DeviceBusy,
            Self::Cancelled => FailReason::Cancelled,
        }
    }

    /// Whether submitting the same job again (as a new job) may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(ConnectionError::NotFound(_)) => false,
            Self::Adapter(_) => false,
            other => matches!(
                other.fail_reason(),
                FailReason::Transport | FailReason::DeviceBusy | FailReason::PrintTimeout
            ),
        }
    }
}

/// Result type alias for niimbot operations.
pub type Result<T> = std::result::Result<T, NiimbotError>;
