//! Printer protocol definitions.
//!
//! Every message is a framed packet (see [`packet`]). The B1 and D110
//! families share the command set but disagree on the byte layout of a few
//! commands; those differences live in [`model`].

pub mod model;
pub mod packet;
pub mod status;

pub use model::{CompletionStrategy, ModelFamily, ModelProfile};
pub use packet::Packet;

/// Response command carrying a printer-side error code in `payload[0]`.
pub const RESPONSE_PRINT_ERROR: u8 = 0xdb;

/// Response command sent when the printer does not support a request.
pub const RESPONSE_NOT_SUPPORTED: u8 = 0x00;

/// Request commands understood by the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    BeginPrint = 0x01,
    BeginPage = 0x03,
    SetPageSize = 0x13,
    SetQuantity = 0x15,
    Clear = 0x20,
    SetDensity = 0x21,
    SetLabelType = 0x23,
    GetInfo = 0x40,
    BitmapLine = 0x85,
    QueryStatus = 0xa3,
    Heartbeat = 0xdc,
    EndPage = 0xe3,
    EndPrint = 0xf3,
}

impl Command {
    pub const ALL: [Command; 13] = [
        Command::BeginPrint,
        Command::BeginPage,
        Command::SetPageSize,
        Command::SetQuantity,
        Command::Clear,
        Command::SetDensity,
        Command::SetLabelType,
        Command::GetInfo,
        Command::BitmapLine,
        Command::QueryStatus,
        Command::Heartbeat,
        Command::EndPage,
        Command::EndPrint,
    ];

    /// Wire value of this command.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Whether the printer acknowledges this command with a notification.
    ///
    /// Bitmap lines are streamed without acknowledgement.
    pub fn expects_response(self) -> bool {
        !matches!(self, Command::BitmapLine)
    }

    /// Build a packet for this command.
    pub fn packet(self, payload: impl Into<Vec<u8>>) -> crate::Result<Packet> {
        Packet::new(self.code(), payload)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({:#04x})", self, self.code())
    }
}
