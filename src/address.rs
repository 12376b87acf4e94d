//! DALI forward-frame addressing.

use core::fmt;

use crate::command::SpecialCommandCode;
use crate::gear::Gear;

/// Address half of a 16-bit forward frame. A wire byte with the high bit
/// set and bits 5-6 nonzero is not an address at all, it belongs to the
/// special command opcode space (see [SpecialCommandCode::is_special_command])
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Address {
    /// A single gear, 0..=63
    Short(u8),

    /// One of the 16 collective group addresses, 0..=15
    Group(u8),

    /// All devices. `unaddressed` restricts the frame to gear without a
    /// short address; both forms are 0xFF on the wire and differ only by
    /// sender intent
    Broadcast {
        unaddressed: bool,
    },
}

impl Address {
    /// Broadcast to every device on the bus
    pub const BROADCAST: Address = Address::Broadcast { unaddressed: false };

    /// Short gear address, panics above 63
    pub fn short(addr: u8) -> Self {
        assert!(addr <= 63, "short address out of bounds");
        Address::Short(addr)
    }

    /// Group address, panics above 15
    pub fn group(group: u8) -> Self {
        assert!(group <= 15, "group number out of bounds");
        Address::Group(group)
    }

    /// Wire encoding of this address
    pub fn code(&self) -> u8 {
        match self {
            Address::Short(a) => a << 1,
            Address::Group(g) => 0x80 | (g << 1),
            Address::Broadcast { .. } => 0xFF,
        }
    }

    /// Classify a received address byte. Returns `None` for bytes in the
    /// special command space
    pub fn parse(byte: u8) -> Option<Address> {
        if byte == 0xFF {
            return Some(Address::BROADCAST);
        }

        if SpecialCommandCode::is_special_command(byte) {
            return None;
        }

        if byte & 0x80 != 0 {
            Some(Address::Group((byte >> 1) & 0x0F))
        } else {
            Some(Address::Short(byte >> 1))
        }
    }

    /// Whether a frame sent to this address lands on the supplied gear.
    /// Broadcast matches everything, groups match via the gear's membership
    /// bitmap, short addresses by equality
    pub fn matches_gear(&self, gear: &Gear) -> bool {
        match self {
            Address::Short(a) => gear.short_address == *a,
            Address::Group(g) => gear.groups & (1 << g) != 0,
            Address::Broadcast { .. } => true,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Short(a) => write!(f, "A{}", a),
            Address::Group(g) => write!(f, "G{}", g),
            Address::Broadcast { unaddressed: false } => write!(f, "Broadcast"),
            Address::Broadcast { unaddressed: true } => write!(f, "Unaddressed Broadcast"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_short() {
        for s in 0..64 {
            assert_eq!(Address::short(s).code(), s << 1);
        }
    }

    #[test]
    fn encode_group() {
        for g in 0..16 {
            assert_eq!(Address::group(g).code(), 0x80 | (g << 1));
        }
    }

    #[test]
    fn encode_broadcast() {
        assert_eq!(Address::BROADCAST.code(), 0xFF);
        assert_eq!(Address::Broadcast { unaddressed: true }.code(), 0xFF);
    }

    #[test]
    fn parse_round_trip() {
        // The low bit of a non-special byte selects command vs arc power,
        // so the round trip is over bytes with the selector clear
        for b in (0..=255u8).filter(|b| b & 1 == 0 || *b == 0xFF) {
            match Address::parse(b) {
                Some(addr) => assert_eq!(addr.code(), b),
                None => assert!(SpecialCommandCode::is_special_command(b)),
            }
        }
    }

    #[test]
    fn parse_variants() {
        assert_eq!(Address::parse(0x06), Some(Address::Short(3)));
        assert_eq!(Address::parse(0x07), Some(Address::Short(3)));
        assert_eq!(Address::parse(0x86), Some(Address::Group(3)));
        assert_eq!(Address::parse(0xFF), Some(Address::BROADCAST));
        // Special command space is not an address
        assert_eq!(Address::parse(0xA1), None);
        assert_eq!(Address::parse(0xC5), None);
    }

    #[test]
    fn matching() {
        let mut g = Gear::new(5);
        g.groups = 1 << 2;

        assert!(Address::short(5).matches_gear(&g));
        assert!(!Address::short(6).matches_gear(&g));
        assert!(Address::group(2).matches_gear(&g));
        assert!(!Address::group(3).matches_gear(&g));
        assert!(Address::BROADCAST.matches_gear(&g));
    }
}
