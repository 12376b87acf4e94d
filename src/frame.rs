//! Outbound DALI frame construction.

use crate::address::Address;
use crate::command::SpecialCommandCode;

/// Standard addressed commands set bit 8 of the 16-bit frame to select
/// command (rather than direct arc power) semantics for the data byte
const COMMAND_SELECT: u16 = 0x0100;

/// 25-bit quiescent mode control words, sent twice on the wire
pub const QUIESCENT_START: u32 = 0xFF_FE1D;
pub const QUIESCENT_STOP: u32 = 0xFF_FE1E;

/// How many times the adapter puts the frame on the wire. `Twice` is the
/// DALI configuration command requirement (both transmissions within
/// 100 ms), performed by the adapter itself; it is not a retry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Repeat {
    Once,
    Twice,
}

/// An outbound frame. The three legal widths are the only representable
/// ones
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxFrame {
    /// 16-bit forward frame to control gear
    Gear(u16),

    /// 24-bit forward frame to control devices
    Device(u32),

    /// 25-bit DA24 configuration frame
    Da24Config(u32),
}

impl TxFrame {
    /// Addressed standard command, `(addr << 8) | 0x100 | cmd` with the
    /// low opcode bits already ORed into `opcode` for parameterised
    /// command families
    pub fn command(address: Address, opcode: u8) -> Self {
        TxFrame::Gear((address.code() as u16) << 8 | COMMAND_SELECT | opcode as u16)
    }

    /// Direct arc power (DAPC) frame
    pub fn direct_arc_power(address: Address, level: u8) -> Self {
        TxFrame::Gear((address.code() as u16) << 8 | level as u16)
    }

    /// Special command frame
    pub fn special(code: SpecialCommandCode, operand: u8) -> Self {
        TxFrame::Gear((code as u16) << 8 | operand as u16)
    }

    /// Frame payload as high/mid/low bytes. 16-bit frames carry zero in
    /// the high byte
    pub fn bytes(&self) -> [u8; 3] {
        let word = match self {
            TxFrame::Gear(w) => *w as u32,
            TxFrame::Device(w) | TxFrame::Da24Config(w) => *w,
        };

        [(word >> 16) as u8, (word >> 8) as u8, word as u8]
    }
}
