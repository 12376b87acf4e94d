
use thiserror::Error;

/// Driver errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DaliError {
    /// Collision or malformed half-bit on the bus. During a `Compare` this
    /// is a meaningful answer (more than one gear replied), not a fault
    #[error("framing error on the bus")]
    Framing,

    /// Two gears settled on the same 24-bit search address
    #[error("search address clash")]
    SearchAddressClash,

    /// A gear did not retain the short address programmed into it
    #[error("short address did not stick (returned {got:?} instead of {expected:#04x})")]
    ShortAddressNotStored {
        expected: u8,
        got: Option<u8>,
    },

    /// More gears on the bus than free short addresses
    #[error("short address pool exhausted")]
    ShortAddressPoolExhausted,

    /// The adapter has not been opened, or has already been closed
    #[error("device not open")]
    NotOpen,

    /// The driver was closed while this request was still pending
    #[error("device closed with commands outstanding")]
    Closed,

    /// A gear that was expected to answer stayed silent
    #[error("no response from gear")]
    NoResponse,

    /// A reply arrived whose value the protocol does not allow here
    #[error("unexpected response value {0:#04x}")]
    UnexpectedResponse(u8),

    /// Decoding error
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Wrapper for unhandled / underlying adapter errors
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

/// Inbound packet faults. These are logged and the packet dropped, they
/// never close the driver
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// Packet shorter than the fixed inbound layout
    #[error("short packet ({0} bytes)")]
    ShortPacket(usize),

    /// Unknown source tag in byte 0
    #[error("unknown message source {0:#04x}")]
    UnknownSource(u8),

    /// Unknown packet type in byte 1
    #[error("unknown packet type {0:#04x}")]
    UnknownPacketType(u8),

    /// Device type byte outside the nine gear categories
    #[error("unknown gear type {0:#04x}")]
    UnknownGearType(u8),

    /// Memory bank read returned fewer bytes than the bank 0 layout
    #[error("short memory bank read ({0} bytes)")]
    ShortMemoryRead(usize),
}

/// Transport level faults. The reader loop treats these as fatal and
/// closes the driver
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    /// Underlying HID operation failed
    #[error("hid: {0}")]
    Hid(String),

    /// Non-HID operating system fault (thread spawn, device node)
    #[error("io: {0}")]
    Io(String),

    /// The adapter was closed out from under the caller
    #[error("adapter closed")]
    Closed,
}

impl From<hidapi::HidError> for AdapterError {
    fn from(e: hidapi::HidError) -> Self {
        AdapterError::Hid(e.to_string())
    }
}
