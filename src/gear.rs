//! Control gear and group model.

use core::fmt;

use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::address::Address;
use crate::bus::Transceiver;
use crate::command::{CommandCode, SpecialCommandCode};
use crate::error::{DaliError, DecodeError};
use crate::frame::Repeat;
use crate::productdb::ProductRecord;

/// The nine DALI gear categories from IEC 62386 part 102
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::FromRepr)]
#[repr(u8)]
pub enum GearType {
    FluorescentLamp = 0,
    EmergencyLighting = 1,
    HidLamp = 2,
    LowVoltageHalogenLamp = 3,
    IncandescentLampDimmer = 4,
    DcControlledDimmer = 5,
    LedLamp = 6,
    Relay = 7,
    Colour = 8,
}

/// Fade configuration as reported by `QueryFadeTimeFadeRate`. Both values
/// are 4-bit codes; time 0 is "as fast as possible" up to 15 = 90.5 s,
/// rate 1 is 358 steps/s down to 15 = 2.8 steps/s
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fade {
    pub time: u8,
    pub rate: u8,
}

impl From<u8> for Fade {
    fn from(byte: u8) -> Self {
        Fade {
            time: byte >> 4,
            rate: byte & 0x0F,
        }
    }
}

bitflags! {
    /// Status bits from `QueryStatus`
    pub struct GearStatus: u8 {
        const CONTROL_GEAR_FAILURE   = 1 << 0;
        const LAMP_FAILURE           = 1 << 1;
        const LAMP_ON                = 1 << 2;
        const LIMIT_ERROR            = 1 << 3;
        const FADE_RUNNING           = 1 << 4;
        const RESET_STATE            = 1 << 5;
        const MISSING_SHORT_ADDRESS  = 1 << 6;
        const POWER_FAILURE          = 1 << 7;
    }
}

/// A firmware or hardware version pair
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Identity and configuration read from memory bank 0, bytes 2..27
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bank0 {
    pub last_mem_bank: u8,
    pub gtin: u64,
    pub firmware_version: Version,
    pub serial: String,
    pub hardware_version: Version,
    pub dali_version: u8,
    pub logical_control_units: u8,
    pub logical_control_gears: u8,
    pub control_index: u8,
}

impl Bank0 {
    /// Parse the 25-byte buffer read from bank offset 2 onward
    pub fn parse(buf: &[u8]) -> Result<Bank0, DecodeError> {
        if buf.len() < 25 {
            return Err(DecodeError::ShortMemoryRead(buf.len()));
        }

        Ok(Bank0 {
            last_mem_bank: buf[0],
            gtin: BigEndian::read_u48(&buf[1..7]),
            firmware_version: Version {
                major: buf[7],
                minor: buf[8],
            },
            // Serial bytes are stored least significant first
            serial: format!(
                "{:02x}{:02x}{:02x}{:02x}{:02x}.{:02x}{:02x}{:02x}",
                buf[13], buf[12], buf[11], buf[10], buf[9], buf[16], buf[15], buf[14]
            ),
            hardware_version: Version {
                major: buf[17],
                minor: buf[18],
            },
            dali_version: buf[19],
            logical_control_units: buf[22],
            logical_control_gears: buf[23],
            control_index: buf[24],
        })
    }
}

/// State of one of the 64 gear slots. A gear is present iff its device
/// type is known
#[derive(Clone, Debug, PartialEq)]
pub struct Gear {
    pub short_address: u8,
    pub device_type: Option<GearType>,

    pub level: u8,
    pub min_level: u8,
    pub max_level: u8,

    /// Authoritative group membership bitmap, bit g set = member of group g
    pub groups: u16,

    pub last_mem_bank: u8,
    pub gtin: u64,
    pub firmware_version: Option<Version>,
    pub hardware_version: Option<Version>,
    pub serial: Option<String>,
    pub dali_version: u8,

    /// Multi-logical-device hardware descriptors
    pub logical_control_units: u8,
    pub logical_control_gears: u8,
    pub control_index: u8,

    pub product: Option<ProductRecord>,
}

impl Gear {
    pub(crate) fn new(short_address: u8) -> Self {
        Self {
            short_address,
            device_type: None,
            level: 0,
            min_level: 1,
            max_level: 254,
            groups: 0,
            last_mem_bank: 0,
            gtin: 0,
            firmware_version: None,
            hardware_version: None,
            serial: None,
            dali_version: 0,
            logical_control_units: 0,
            logical_control_gears: 0,
            control_index: 0,
            product: None,
        }
    }

    pub fn present(&self) -> bool {
        self.device_type.is_some()
    }

    pub fn address(&self) -> Address {
        Address::Short(self.short_address)
    }

    /// GTIN and serial are globally unique and immutable; the control
    /// index distinguishes logical devices sharing one housing
    pub fn unique_id(&self) -> Option<String> {
        if !self.present() {
            return None;
        }

        let serial = self.serial.as_deref().unwrap_or("");
        Some(format!("{}-{}-{}", self.gtin, serial, self.control_index))
    }

    pub(crate) fn apply_bank0(&mut self, info: Bank0) {
        self.last_mem_bank = info.last_mem_bank;
        self.gtin = info.gtin;
        self.firmware_version = Some(info.firmware_version);
        self.serial = Some(info.serial);
        self.hardware_version = Some(info.hardware_version);
        self.dali_version = info.dali_version;
        self.logical_control_units = info.logical_control_units;
        self.logical_control_gears = info.logical_control_gears;
        self.control_index = info.control_index;
    }

    pub(crate) fn clear(&mut self) {
        *self = Gear::new(self.short_address);
    }
}

/// State of one of the 16 group slots. Membership is derived from the
/// gear bitmaps, never stored independently
#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    pub number: u8,
    /// Short addresses of member gear
    pub members: Vec<u8>,
    pub level: u8,
    pub min_level: u8,
    pub max_level: u8,
}

impl Group {
    pub(crate) fn new(number: u8) -> Self {
        Self {
            number,
            members: Vec::new(),
            level: 0,
            min_level: 1,
            max_level: 254,
        }
    }

    pub fn has_gear(&self) -> bool {
        !self.members.is_empty()
    }

    pub fn address(&self) -> Address {
        Address::Group(self.number)
    }
}

/// The fixed 64 gear and 16 group slots owned by a transceiver
pub(crate) struct BusModel {
    pub gears: Vec<Gear>,
    pub groups: Vec<Group>,
}

impl BusModel {
    pub fn new() -> Self {
        Self {
            gears: (0..64).map(Gear::new).collect(),
            groups: (0..16).map(Group::new).collect(),
        }
    }

    /// Re-derive every group's member list and levels from the gear
    /// bitmaps. Min/max come from the first member, 1..254 when empty
    pub fn rebuild_groups(&mut self) {
        let gears = &self.gears;
        for group in self.groups.iter_mut() {
            let mask = 1u16 << group.number;
            group.members = gears
                .iter()
                .filter(|g| g.present() && g.groups & mask != 0)
                .map(|g| g.short_address)
                .collect();

            match group.members.first().map(|m| &gears[*m as usize]) {
                Some(first) => {
                    group.min_level = first.min_level;
                    group.max_level = first.max_level;
                    group.level = first.level;
                }
                None => {
                    group.min_level = 1;
                    group.max_level = 254;
                    group.level = 0;
                }
            }
        }
    }
}

/// Operations on a single gear slot, addressed through its transceiver
#[derive(Clone, Copy)]
pub struct GearRef<'a> {
    pub(crate) bus: &'a Transceiver,
    pub(crate) short: u8,
}

impl<'a> GearRef<'a> {
    pub fn address(&self) -> Address {
        Address::Short(self.short)
    }

    /// Snapshot of the modelled state
    pub fn state(&self) -> Gear {
        self.bus.with_model(|m| m.gears[self.short as usize].clone())
    }

    async fn send(&self, cmd: CommandCode) -> Result<Option<u8>, DaliError> {
        self.bus.send_cmd(self.address(), cmd, Repeat::Once).await
    }

    /// Recall the last active level. The plain `On` semantics of DALI are
    /// covered by `OnAndStepUp`; ballasts in the field respond more
    /// consistently to this
    pub async fn on(&self) -> Result<(), DaliError> {
        self.send(CommandCode::GoToLastActiveLevel).await.map(|_| ())
    }

    pub async fn off(&self) -> Result<(), DaliError> {
        self.send(CommandCode::Off).await.map(|_| ())
    }

    pub async fn max(&self) -> Result<(), DaliError> {
        self.send(CommandCode::RecallMaxLevel).await.map(|_| ())
    }

    pub async fn min(&self) -> Result<(), DaliError> {
        self.send(CommandCode::RecallMinLevel).await.map(|_| ())
    }

    pub async fn brighten(&self) -> Result<(), DaliError> {
        self.send(CommandCode::Up).await.map(|_| ())
    }

    pub async fn dim(&self) -> Result<(), DaliError> {
        self.send(CommandCode::Down).await.map(|_| ())
    }

    /// Set an absolute level with a direct arc power frame
    pub async fn brightness(&self, level: u8) -> Result<(), DaliError> {
        self.bus
            .send_direct_arc_power(self.address(), level)
            .await
            .map(|_| ())
    }

    /// Re-query the actual level, then switch off when lit or recall the
    /// last active level when dark
    pub async fn toggle(&self) -> Result<(), DaliError> {
        let level = self.update_level().await?;
        if level == 0 {
            self.on().await
        } else {
            self.off().await
        }
    }

    pub async fn identify(&self) -> Result<(), DaliError> {
        self.send(CommandCode::IdentifyDevice).await.map(|_| ())
    }

    /// Query the actual level and fold it into the model. A silent gear
    /// counts as level 0
    pub async fn update_level(&self) -> Result<u8, DaliError> {
        let level = self.send(CommandCode::QueryActualLevel).await?.unwrap_or(0);
        self.bus
            .with_model(|m| m.gears[self.short as usize].level = level);
        Ok(level)
    }

    pub async fn query_fade(&self) -> Result<Option<Fade>, DaliError> {
        let raw = self.send(CommandCode::QueryFadeTimeFadeRate).await?;
        Ok(raw.map(Fade::from))
    }

    pub async fn query_status(&self) -> Result<Option<GearStatus>, DaliError> {
        let raw = self.send(CommandCode::QueryStatus).await?;
        Ok(raw.map(GearStatus::from_bits_truncate))
    }

    pub async fn query_power_on_level(&self) -> Result<Option<u8>, DaliError> {
        self.send(CommandCode::QueryPowerOnLevel).await
    }

    /// Store a new power-on level. Configuration commands must land twice
    /// within 100 ms, so the repeat is done by the adapter, not by two
    /// separate sends
    pub async fn set_power_on_level(&self, level: u8) -> Result<(), DaliError> {
        self.bus
            .send_special_cmd(SpecialCommandCode::SetDTR0, level, Repeat::Once)
            .await?;
        self.bus
            .send_cmd(self.address(), CommandCode::SetPowerOnLevel, Repeat::Twice)
            .await
            .map(|_| ())
    }

    /// Join group `group`, updating the membership bitmap on success
    pub async fn add_to_group(&self, group: u8) -> Result<(), DaliError> {
        assert!(group <= 15, "group number out of bounds");

        self.bus
            .send_opcode(
                self.address(),
                CommandCode::AddToGroup as u8 | group,
                Repeat::Twice,
            )
            .await?;

        self.bus.with_model(|m| {
            m.gears[self.short as usize].groups |= 1 << group;
            m.rebuild_groups();
        });
        Ok(())
    }

    /// Leave group `group`
    pub async fn remove_from_group(&self, group: u8) -> Result<(), DaliError> {
        assert!(group <= 15, "group number out of bounds");

        self.bus
            .send_opcode(
                self.address(),
                CommandCode::RemoveFromGroup as u8 | group,
                Repeat::Twice,
            )
            .await?;

        self.bus.with_model(|m| {
            m.gears[self.short as usize].groups &= !(1 << group);
            m.rebuild_groups();
        });
        Ok(())
    }

    /// Read `count` bytes from a memory bank. Relies on the gear
    /// auto-incrementing DTR0 after each `ReadMemoryLocation`
    pub async fn read_memory(&self, bank: u8, offset: u8, count: usize) -> Result<Vec<u8>, DaliError> {
        self.bus
            .send_special_cmd(SpecialCommandCode::SetDTR1, bank, Repeat::Once)
            .await?;
        self.bus
            .send_special_cmd(SpecialCommandCode::SetDTR0, offset, Repeat::Once)
            .await?;

        let mut buf = Vec::with_capacity(count);
        for _ in 0..count {
            match self.send(CommandCode::ReadMemoryLocation).await? {
                Some(byte) => buf.push(byte),
                None => return Err(DaliError::NoResponse),
            }
        }
        Ok(buf)
    }

    /// Interrogate the gear: device type, memory bank 0 identity, group
    /// membership, level limits, actual level, and best-effort product
    /// metadata. A NAK on the device type query marks the slot not-present
    pub async fn fetch_deviceinfo(&self) -> Result<(), DaliError> {
        let device_type = match self.send(CommandCode::QueryDeviceType).await? {
            Some(raw) => {
                GearType::from_repr(raw).ok_or(DecodeError::UnknownGearType(raw))?
            }
            None => {
                self.bus
                    .with_model(|m| m.gears[self.short as usize].clear());
                return Ok(());
            }
        };

        let bank0 = Bank0::parse(&self.read_memory(0, 2, 25).await?)?;

        let g0 = self.send(CommandCode::QueryGroupsZeroToSeven).await?.unwrap_or(0);
        let g1 = self.send(CommandCode::QueryGroupsEightToFifteen).await?.unwrap_or(0);

        let min_level = self.send(CommandCode::QueryMinLevel).await?.unwrap_or(1);
        let max_level = self.send(CommandCode::QueryMaxLevel).await?.unwrap_or(254);

        let product = self.bus.product_info(bank0.gtin);

        debug!("Gear {} present, gtin {}", self.short, bank0.gtin);

        self.bus.with_model(|m| {
            let gear = &mut m.gears[self.short as usize];
            gear.device_type = Some(device_type);
            gear.apply_bank0(bank0);
            gear.groups = (g1 as u16) << 8 | g0 as u16;
            gear.min_level = min_level;
            gear.max_level = max_level;
            gear.product = product;
        });

        self.update_level().await?;
        Ok(())
    }
}

/// Operations on a group slot
#[derive(Clone, Copy)]
pub struct GroupRef<'a> {
    pub(crate) bus: &'a Transceiver,
    pub(crate) number: u8,
}

impl<'a> GroupRef<'a> {
    pub fn address(&self) -> Address {
        Address::Group(self.number)
    }

    pub fn state(&self) -> Group {
        self.bus.with_model(|m| m.groups[self.number as usize].clone())
    }

    /// Group identity, scoped to the owning transceiver
    pub fn unique_id(&self) -> String {
        format!("{}/group-{}", self.bus.unique_id(), self.number)
    }

    fn first_member(&self) -> Option<u8> {
        self.bus
            .with_model(|m| m.groups[self.number as usize].members.first().copied())
    }

    async fn send(&self, cmd: CommandCode) -> Result<Option<u8>, DaliError> {
        self.bus.send_cmd(self.address(), cmd, Repeat::Once).await
    }

    pub async fn on(&self) -> Result<(), DaliError> {
        self.send(CommandCode::GoToLastActiveLevel).await.map(|_| ())
    }

    pub async fn off(&self) -> Result<(), DaliError> {
        self.send(CommandCode::Off).await.map(|_| ())
    }

    pub async fn max(&self) -> Result<(), DaliError> {
        self.send(CommandCode::RecallMaxLevel).await.map(|_| ())
    }

    pub async fn min(&self) -> Result<(), DaliError> {
        self.send(CommandCode::RecallMinLevel).await.map(|_| ())
    }

    pub async fn brighten(&self) -> Result<(), DaliError> {
        self.send(CommandCode::Up).await.map(|_| ())
    }

    pub async fn dim(&self) -> Result<(), DaliError> {
        self.send(CommandCode::Down).await.map(|_| ())
    }

    pub async fn brightness(&self, level: u8) -> Result<(), DaliError> {
        self.bus
            .send_direct_arc_power(self.address(), level)
            .await
            .map(|_| ())
    }

    /// Levels are per-gear, so the group level is taken from the first
    /// member
    pub async fn update_level(&self) -> Result<u8, DaliError> {
        let level = match self.first_member() {
            Some(short) => self.bus.gear(short).update_level().await?,
            None => 0,
        };

        self.bus
            .with_model(|m| m.groups[self.number as usize].level = level);
        Ok(level)
    }

    pub async fn toggle(&self) -> Result<(), DaliError> {
        let level = self.update_level().await?;
        if level == 0 {
            self.on().await
        } else {
            self.off().await
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // From a live LED driver, bank 0 from offset 2:
    // LMB GTIN         VER  SER major    minor  HWV  DALI
    // 01  07ee4bb3b889 0707 00001a5838   920269 0300 08
    const BANK0: [u8; 25] = [
        0x01, 0x07, 0xEE, 0x4B, 0xB3, 0xB8, 0x89, 0x07, 0x07, 0x38, 0x58, 0x1A, 0x00, 0x00, 0x69,
        0x02, 0x92, 0x03, 0x00, 0x08, 0x00, 0x00, 0x01, 0x01, 0x00,
    ];

    #[test]
    fn parse_bank0() {
        let info = Bank0::parse(&BANK0).unwrap();

        assert_eq!(info.last_mem_bank, 1);
        assert_eq!(info.gtin, 0x07EE4BB3B889);
        assert_eq!(info.firmware_version, Version { major: 7, minor: 7 });
        assert_eq!(info.serial, "00001a5838.920269");
        assert_eq!(info.hardware_version, Version { major: 3, minor: 0 });
        assert_eq!(info.dali_version, 8);
        assert_eq!(info.logical_control_units, 1);
        assert_eq!(info.logical_control_gears, 1);
        assert_eq!(info.control_index, 0);
    }

    #[test]
    fn parse_bank0_short() {
        assert_eq!(
            Bank0::parse(&BANK0[..10]),
            Err(DecodeError::ShortMemoryRead(10))
        );
    }

    #[test]
    fn fade_nibbles() {
        let fade = Fade::from(0x4B);
        assert_eq!(fade.time, 4);
        assert_eq!(fade.rate, 11);
    }

    #[test]
    fn status_bits() {
        let status = GearStatus::from_bits_truncate(0x04);
        assert!(status.contains(GearStatus::LAMP_ON));
        assert!(!status.contains(GearStatus::LAMP_FAILURE));
    }

    #[test]
    fn gear_identity() {
        let mut gear = Gear::new(3);
        assert_eq!(gear.unique_id(), None);

        gear.device_type = Some(GearType::LedLamp);
        gear.gtin = 12345;
        gear.serial = Some("aa.bb".to_string());
        gear.control_index = 2;
        assert_eq!(gear.unique_id(), Some("12345-aa.bb-2".to_string()));
    }

    use crate::bus::Transceiver;
    use crate::mock::{MockAdapter, MockHandle, VirtualBus, VirtualGear};
    use crate::productdb::{ProductInfoSource, ProductRecord};
    use std::sync::Arc;

    fn gear_at(short: u8, search: u32) -> VirtualGear {
        let mut g = VirtualGear::new(search);
        g.short_address = Some(short);
        g
    }

    fn sim_bus(gears: Vec<VirtualGear>) -> (Transceiver, MockHandle) {
        let adapter = MockAdapter::new();
        let handle = adapter.handle();
        let mut sim = VirtualBus::new(gears);
        handle.respond(move |pkt| sim.handle(pkt));
        (Transceiver::new(adapter), handle)
    }

    struct StaticDb;

    impl ProductInfoSource for StaticDb {
        fn fetch(&self, gtin: u64) -> Option<ProductRecord> {
            Some(ProductRecord {
                brand_name: "Acme".to_string(),
                product_name: format!("Driver {}", gtin),
                dali_parts: vec![102],
                initial_registration: None,
                last_updated: None,
            })
        }
    }

    #[tokio::test]
    async fn scan_populates_model() {
        let mut a = gear_at(3, 0x10);
        a.groups = 1 << 2;
        a.level = 100;
        let b = gear_at(7, 0x20);

        let (bus, _handle) = sim_bus(vec![a, b]);
        bus.set_product_info_source(Arc::new(StaticDb));
        bus.open().unwrap();

        let gears = bus.scan_for_gear().await.unwrap();

        let present: Vec<u8> = gears
            .iter()
            .filter(|g| g.present())
            .map(|g| g.short_address)
            .collect();
        assert_eq!(present, vec![3, 7]);

        let g3 = &gears[3];
        assert_eq!(g3.device_type, Some(GearType::LedLamp));
        assert_eq!(g3.gtin, 0x07EE_4BB3_B889);
        assert_eq!(g3.serial.as_deref(), Some("00001a5838.920269"));
        assert_eq!(g3.firmware_version, Some(Version { major: 7, minor: 7 }));
        assert_eq!(g3.groups, 1 << 2);
        assert_eq!(g3.level, 100);
        assert_eq!(g3.product.as_ref().map(|p| p.brand_name.as_str()), Some("Acme"));

        // Group projection derives from the bitmaps
        let groups = bus.present_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].number, 2);
        assert_eq!(groups[0].members, vec![3]);

        bus.close();
    }

    #[tokio::test]
    async fn toggle_turns_off_then_on() {
        let mut g = gear_at(0, 0x10);
        g.level = 200;
        g.last_level = 200;

        let (bus, _handle) = sim_bus(vec![g]);
        bus.open().unwrap();

        // Lit, so toggle switches off
        bus.gear(0).toggle().await.unwrap();
        assert_eq!(bus.gear(0).update_level().await.unwrap(), 0);

        // Dark, so toggle recalls the last active level
        bus.gear(0).toggle().await.unwrap();
        assert_eq!(bus.gear(0).update_level().await.unwrap(), 200);

        bus.close();
    }

    #[tokio::test]
    async fn set_power_on_level_uses_repeat_flag() {
        let (bus, handle) = sim_bus(vec![gear_at(1, 0x10)]);
        bus.open().unwrap();

        bus.gear(1).set_power_on_level(42).await.unwrap();

        let written = handle.written();
        assert_eq!(written.len(), 2);
        // SetDTR0 goes out once, the configuration command repeats
        assert_eq!(written[0][2], 0x00);
        assert_eq!(written[1][2], 0x20);
        assert_eq!(written[1][7], CommandCode::SetPowerOnLevel as u8);

        bus.close();
    }

    #[tokio::test]
    async fn group_membership_round_trip() {
        let (bus, _handle) = sim_bus(vec![gear_at(2, 0x10)]);
        bus.open().unwrap();
        bus.with_model(|m| m.gears[2].device_type = Some(GearType::LedLamp));

        bus.gear(2).add_to_group(5).await.unwrap();
        assert_eq!(bus.gear(2).state().groups, 1 << 5);
        assert_eq!(bus.group(5).state().members, vec![2]);

        // The gear itself confirms the bitmap
        let g0 = bus
            .gear(2)
            .query_status()
            .await
            .unwrap();
        assert!(g0.is_some());

        bus.gear(2).remove_from_group(5).await.unwrap();
        assert_eq!(bus.gear(2).state().groups, 0);
        assert!(bus.group(5).state().members.is_empty());

        bus.close();
    }

    #[tokio::test]
    async fn brightness_and_levels() {
        let (bus, _handle) = sim_bus(vec![gear_at(4, 0x10)]);
        bus.open().unwrap();

        bus.gear(4).brightness(128).await.unwrap();
        assert_eq!(bus.gear(4).update_level().await.unwrap(), 128);

        bus.gear(4).max().await.unwrap();
        assert_eq!(bus.gear(4).update_level().await.unwrap(), 254);

        bus.gear(4).min().await.unwrap();
        assert_eq!(bus.gear(4).update_level().await.unwrap(), 1);

        let fade = bus.gear(4).query_fade().await.unwrap();
        assert_eq!(fade, Some(Fade { time: 0, rate: 7 }));

        bus.close();
    }

    #[test]
    fn group_derivation() {
        let mut model = BusModel::new();
        model.gears[3].device_type = Some(GearType::LedLamp);
        model.gears[3].groups = 0b0000_0000_0000_0101;
        model.gears[3].min_level = 10;
        model.gears[3].max_level = 200;
        model.gears[7].device_type = Some(GearType::Relay);
        model.gears[7].groups = 0b0000_0000_0000_0100;
        // Not present, bitmap must be ignored
        model.gears[9].groups = 0xFFFF;

        model.rebuild_groups();

        assert_eq!(model.groups[0].members, vec![3]);
        assert_eq!(model.groups[2].members, vec![3, 7]);
        assert!(model.groups[1].members.is_empty());

        assert_eq!(model.groups[0].min_level, 10);
        assert_eq!(model.groups[0].max_level, 200);
        assert_eq!(model.groups[1].min_level, 1);
        assert_eq!(model.groups[1].max_level, 254);
    }
}
