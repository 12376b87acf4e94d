//! Typed inbound bus traffic.

use core::fmt;

use strum::FromRepr;

use crate::address::Address;
use crate::command::{CommandCode, SpecialCommandCode};
use crate::tridonic::{RxKind, RxPacket};

/// Who put the frame on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum MessageSource {
    /// Another bus master
    External = 0x11,

    /// This adapter's own transmission
    SelfSent = 0x12,
}

/// A message received from the bus. `sequence` is zero for traffic
/// originated by another master, 1..=255 for our own
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Message {
    pub source: MessageSource,
    pub sequence: u8,
    pub body: MessageBody,
}

/// Message payload variants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageBody {
    /// No gear answered a query
    Nak,

    /// 8-bit backward frame
    NumericResponse(u8),

    /// Collision or malformed half-bit
    FramingError,

    /// Special command observed on (or echoed from) the wire
    SpecialCommand {
        command: SpecialCommandCode,
        operand: u8,
    },

    /// Addressed standard command
    AddressedCommand {
        address: Address,
        command: CommandCode,
    },

    /// Direct arc power (DAPC) frame
    DirectArcPower {
        address: Address,
        level: u8,
    },

    /// Frame bytes that did not parse as any of the above
    BadFrame,
}

impl Message {
    /// Build a typed message from a decoded adapter packet. Frame contents
    /// that fail to classify become [MessageBody::BadFrame] rather than an
    /// error; only the packet framing itself is fallible (handled upstream)
    pub fn from_packet(pkt: &RxPacket) -> Message {
        let [_high, mid, low] = pkt.frame;

        let body = match pkt.kind {
            RxKind::Nak => MessageBody::Nak,
            RxKind::Response => MessageBody::NumericResponse(low),
            RxKind::FramingError => MessageBody::FramingError,
            RxKind::TxComplete | RxKind::BroadcastReceived => Self::classify_frame(mid, low),
        };

        Message {
            source: pkt.source,
            sequence: pkt.sequence,
            body,
        }
    }

    fn classify_frame(mid: u8, low: u8) -> MessageBody {
        if SpecialCommandCode::is_special_command(mid) {
            return match SpecialCommandCode::from_repr(mid) {
                Some(command) => MessageBody::SpecialCommand { command, operand: low },
                None => MessageBody::BadFrame,
            };
        }

        // Every non-special byte classifies as an address
        let address = match Address::parse(mid) {
            Some(a) => a,
            None => return MessageBody::BadFrame,
        };

        if mid & 0x01 == 0 {
            MessageBody::DirectArcPower { address, level: low }
        } else {
            match CommandCode::from_repr(low) {
                Some(command) => MessageBody::AddressedCommand { address, command },
                None => MessageBody::BadFrame,
            }
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?} ({})", self.source, self.sequence)?;

        match &self.body {
            MessageBody::Nak => write!(f, " NAK"),
            MessageBody::NumericResponse(v) => write!(f, " < {}", v),
            MessageBody::FramingError => write!(f, " framing error"),
            MessageBody::SpecialCommand { command, operand } => {
                write!(f, " special > {:?}({:#04x})", command, operand)
            }
            MessageBody::AddressedCommand { address, command } => {
                write!(f, " > {:?}({})", command, address)
            }
            MessageBody::DirectArcPower { address, level } => {
                write!(f, " DAPC({}, {})", address, level)
            }
            MessageBody::BadFrame => write!(f, " bad frame"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn packet(kind: RxKind, frame: [u8; 3], sequence: u8) -> RxPacket {
        RxPacket {
            source: MessageSource::SelfSent,
            kind,
            frame,
            sequence,
        }
    }

    #[test]
    fn nak_and_response() {
        let m = Message::from_packet(&packet(RxKind::Nak, [0, 0, 0], 7));
        assert_eq!(m.body, MessageBody::Nak);
        assert_eq!(m.sequence, 7);

        let m = Message::from_packet(&packet(RxKind::Response, [0, 0, 0x7F], 0x2A));
        assert_eq!(m.body, MessageBody::NumericResponse(127));
    }

    #[test]
    fn echoed_command() {
        // Off to A3, echoed back as tx-complete
        let m = Message::from_packet(&packet(RxKind::TxComplete, [0, 0x07, 0x00], 3));
        assert_eq!(
            m.body,
            MessageBody::AddressedCommand {
                address: Address::Short(3),
                command: CommandCode::Off
            }
        );
    }

    #[test]
    fn observed_dapc() {
        let m = Message::from_packet(&packet(RxKind::BroadcastReceived, [0, 0x06, 0x80], 0));
        assert_eq!(
            m.body,
            MessageBody::DirectArcPower {
                address: Address::Short(3),
                level: 128
            }
        );
    }

    #[test]
    fn special_command_echo() {
        let m = Message::from_packet(&packet(RxKind::TxComplete, [0, 0xA9, 0x00], 9));
        assert_eq!(
            m.body,
            MessageBody::SpecialCommand {
                command: SpecialCommandCode::Compare,
                operand: 0
            }
        );
    }

    #[test]
    fn unknown_opcode_is_bad_frame() {
        // AddToGroup|3 does not map back to a discrete opcode
        let m = Message::from_packet(&packet(RxKind::TxComplete, [0, 0x07, 0x63], 4));
        assert_eq!(m.body, MessageBody::BadFrame);
    }
}
