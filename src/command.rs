//! IEC 62386-102 command opcodes.

use strum::FromRepr;

/// Standard gear commands, sent in the data byte of an addressed 16-bit
/// frame. `GoToScene`, `SetScene`, `RemoveFromScene`, `AddToGroup`,
/// `RemoveFromGroup` and `QuerySceneLevel` are the base codes of
/// parameterised families; the driver ORs the scene or group number into
/// the low nibble when sending
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum CommandCode {
    Off = 0x00,
    Up = 0x01,
    Down = 0x02,
    StepUp = 0x03,
    StepDown = 0x04,
    RecallMaxLevel = 0x05,
    RecallMinLevel = 0x06,
    StepDownAndOff = 0x07,
    OnAndStepUp = 0x08,
    EnableDAPCSequence = 0x09,
    GoToLastActiveLevel = 0x0A,
    ContinuousUp = 0x0B,
    ContinuousDown = 0x0C,
    GoToScene = 0x10,
    Reset = 0x20,
    StoreActualLevelInDTR0 = 0x21,
    SavePersistentVariables = 0x22,
    SetOperatingMode = 0x23,
    ResetMemoryBank = 0x24,
    IdentifyDevice = 0x25,
    SetMaxLevel = 0x2A,
    SetMinLevel = 0x2B,
    SetSystemFailureLevel = 0x2C,
    SetPowerOnLevel = 0x2D,
    SetFadeTime = 0x2E,
    SetFadeRate = 0x2F,
    SetExtendedFadeTime = 0x30,
    SetScene = 0x40,
    RemoveFromScene = 0x50,
    AddToGroup = 0x60,
    RemoveFromGroup = 0x70,
    SetShortAddress = 0x80,
    EnableWriteMemory = 0x81,
    QueryStatus = 0x90,
    QueryControlGearPresent = 0x91,
    QueryLampFailure = 0x92,
    QueryLampPowerOn = 0x93,
    QueryLimitError = 0x94,
    QueryResetState = 0x95,
    QueryMissingShortAddress = 0x96,
    QueryVersionNumber = 0x97,
    QueryContentDTR0 = 0x98,
    QueryDeviceType = 0x99,
    QueryPhysicalMinimum = 0x9A,
    QueryPowerFailure = 0x9B,
    QueryContentDTR1 = 0x9C,
    QueryContentDTR2 = 0x9D,
    QueryOperatingMode = 0x9E,
    QueryLightSourceType = 0x9F,
    QueryActualLevel = 0xA0,
    QueryMaxLevel = 0xA1,
    QueryMinLevel = 0xA2,
    QueryPowerOnLevel = 0xA3,
    QuerySystemFailureLevel = 0xA4,
    QueryFadeTimeFadeRate = 0xA5,
    QueryManufacturerSpecificMode = 0xA6,
    QueryNextDeviceType = 0xA7,
    QueryExtendedFadeTime = 0xA8,
    QueryControlGearFailure = 0xAA,
    QuerySceneLevel = 0xB0,
    QueryGroupsZeroToSeven = 0xC0,
    QueryGroupsEightToFifteen = 0xC1,
    QueryRandomAddressH = 0xC2,
    QueryRandomAddressM = 0xC3,
    QueryRandomAddressL = 0xC4,
    ReadMemoryLocation = 0xC5,
}

impl CommandCode {
    /// Whether the command mutates gear state. Everything above `Reset`
    /// is either a configuration write (guarded by the repeat requirement)
    /// or a pure query
    pub fn has_side_effects(&self) -> bool {
        (*self as u8) <= CommandCode::Reset as u8
    }
}

/// Special commands, carried in the address byte of a 16-bit frame using
/// the opcode space that does not decode as an address
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum SpecialCommandCode {
    Terminate = 0xA1,
    SetDTR0 = 0xA3,
    Initialise = 0xA5,
    Randomise = 0xA7,
    Compare = 0xA9,
    Withdraw = 0xAB,
    Ping = 0xAD,
    SearchAddrH = 0xB1,
    SearchAddrM = 0xB3,
    SearchAddrL = 0xB5,
    ProgramShortAddress = 0xB7,
    VerifyShortAddress = 0xB9,
    QueryShortAddress = 0xBB,
    EnableDeviceType = 0xC1,
    SetDTR1 = 0xC3,
    SetDTR2 = 0xC5,
    WriteMemoryLocation = 0xC7,
    WriteMemoryLocationNoReply = 0xC9,
}

impl SpecialCommandCode {
    /// Whether an address byte falls in the special command opcode space
    pub fn is_special_command(addr_byte: u8) -> bool {
        addr_byte & 0x80 == 0x80 && addr_byte & 0x60 != 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn side_effects() {
        assert!(CommandCode::Off.has_side_effects());
        assert!(CommandCode::GoToLastActiveLevel.has_side_effects());
        assert!(CommandCode::Reset.has_side_effects());

        assert!(!CommandCode::QueryActualLevel.has_side_effects());
        assert!(!CommandCode::QueryDeviceType.has_side_effects());
        assert!(!CommandCode::ReadMemoryLocation.has_side_effects());
    }

    #[test]
    fn special_command_space() {
        for b in 0..=255u8 {
            let expected = (b & 0x80 != 0) && (b & 0x60 != 0);
            assert_eq!(SpecialCommandCode::is_special_command(b), expected);
        }

        // Every special opcode classifies as one
        assert!(SpecialCommandCode::is_special_command(SpecialCommandCode::Terminate as u8));
        assert!(SpecialCommandCode::is_special_command(SpecialCommandCode::Compare as u8));
        assert!(SpecialCommandCode::is_special_command(SpecialCommandCode::QueryShortAddress as u8));
    }

    #[test]
    fn from_wire_byte() {
        assert_eq!(CommandCode::from_repr(0xA0), Some(CommandCode::QueryActualLevel));
        assert_eq!(CommandCode::from_repr(0x0F), None);
        assert_eq!(SpecialCommandCode::from_repr(0xA9), Some(SpecialCommandCode::Compare));
        assert_eq!(SpecialCommandCode::from_repr(0xA0), None);
    }
}
