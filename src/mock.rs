//! Mock adapter and simulated gear for testing without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};

use crate::command::SpecialCommandCode;
use crate::error::AdapterError;
use crate::message::MessageSource;
use crate::tridonic::{
    RxKind, RX_FRAME_HIGH, RX_FRAME_LOW, RX_FRAME_MID, RX_PACKET_LEN, RX_SEQUENCE, RX_SOURCE,
    RX_TYPE, TX_FRAME_LOW, TX_FRAME_MID, TX_PACKET_LEN, TX_SEQUENCE, TX_TYPE, TYPE_GEAR_16,
};
use crate::Adapter;

type Responder =
    Box<dyn FnMut(&[u8; TX_PACKET_LEN]) -> Vec<[u8; RX_PACKET_LEN]> + Send>;

struct MockState {
    written: Vec<[u8; TX_PACKET_LEN]>,
    rx: VecDeque<[u8; RX_PACKET_LEN]>,
    responder: Option<Responder>,
    fail_reads: bool,
}

/// A scripted byte-packet device speaking the adapter wire format.
/// Inbound packets either come from [MockHandle::push] or from a
/// responder closure fed each written packet
pub struct MockAdapter {
    state: Arc<Mutex<MockState>>,
    closed: AtomicBool,
    serial: String,
}

/// Test-side handle onto a [MockAdapter] that has been moved into a
/// transceiver
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                written: Vec::new(),
                rx: VecDeque::new(),
                responder: None,
                fail_reads: false,
            })),
            closed: AtomicBool::new(false),
            serial: "mock-0".to_string(),
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }

    fn rx_packet(source: MessageSource, kind: RxKind, frame: [u8; 3], seq: u8) -> [u8; RX_PACKET_LEN] {
        let mut pkt = [0u8; RX_PACKET_LEN];
        pkt[RX_SOURCE] = source as u8;
        pkt[RX_TYPE] = kind as u8;
        pkt[RX_FRAME_HIGH] = frame[0];
        pkt[RX_FRAME_MID] = frame[1];
        pkt[RX_FRAME_LOW] = frame[2];
        pkt[RX_SEQUENCE] = seq;
        pkt
    }

    /// 8-bit backward frame correlated to `seq`
    pub fn response_packet(seq: u8, value: u8) -> [u8; RX_PACKET_LEN] {
        Self::rx_packet(MessageSource::SelfSent, RxKind::Response, [0, 0, value], seq)
    }

    /// "No gear answered" correlated to `seq`
    pub fn nak_packet(seq: u8) -> [u8; RX_PACKET_LEN] {
        Self::rx_packet(MessageSource::SelfSent, RxKind::Nak, [0, 0, 0], seq)
    }

    /// Collision correlated to `seq`
    pub fn framing_error_packet(seq: u8) -> [u8; RX_PACKET_LEN] {
        Self::rx_packet(MessageSource::SelfSent, RxKind::FramingError, [0, 0, 0], seq)
    }

    /// Echo of an own transmission
    pub fn echo_packet(seq: u8, frame: [u8; 3]) -> [u8; RX_PACKET_LEN] {
        Self::rx_packet(MessageSource::SelfSent, RxKind::TxComplete, frame, seq)
    }

    /// Forward frame observed on the bus
    pub fn broadcast_packet(
        source: MessageSource,
        frame: [u8; 3],
        seq: u8,
    ) -> [u8; RX_PACKET_LEN] {
        Self::rx_packet(source, RxKind::BroadcastReceived, frame, seq)
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Install a responder invoked with every written packet; the packets
    /// it returns are queued for reading
    pub fn respond(
        &self,
        f: impl FnMut(&[u8; TX_PACKET_LEN]) -> Vec<[u8; RX_PACKET_LEN]> + Send + 'static,
    ) {
        self.state.lock().unwrap().responder = Some(Box::new(f));
    }

    /// Queue an unsolicited inbound packet
    pub fn push(&self, pkt: [u8; RX_PACKET_LEN]) {
        self.state.lock().unwrap().rx.push_back(pkt);
    }

    /// Every packet written so far
    pub fn written(&self) -> Vec<[u8; TX_PACKET_LEN]> {
        self.state.lock().unwrap().written.clone()
    }

    /// Make subsequent reads fail with an I/O error
    pub fn fail_reads(&self) {
        self.state.lock().unwrap().fail_reads = true;
    }
}

impl Adapter for MockAdapter {
    fn write_packet(&self, buf: &[u8]) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::Closed);
        }

        let mut pkt = [0u8; TX_PACKET_LEN];
        pkt[..buf.len().min(TX_PACKET_LEN)].copy_from_slice(&buf[..buf.len().min(TX_PACKET_LEN)]);

        let mut state = self.state.lock().unwrap();
        state.written.push(pkt);

        if let Some(mut responder) = state.responder.take() {
            let replies = responder(&pkt);
            state.rx.extend(replies);
            state.responder = Some(responder);
        }

        Ok(())
    }

    fn read_packet(&self, buf: &mut [u8]) -> Result<usize, AdapterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::Closed);
        }

        {
            let mut state = self.state.lock().unwrap();
            if state.fail_reads {
                return Err(AdapterError::Hid("injected read failure".to_string()));
            }
            if let Some(pkt) = state.rx.pop_front() {
                buf[..RX_PACKET_LEN].copy_from_slice(&pkt);
                return Ok(RX_PACKET_LEN);
            }
        }

        // Nothing queued; behave like a read timeout
        thread::sleep(Duration::from_millis(2));
        Ok(0)
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// A simulated gear participating in commissioning and queries
#[derive(Clone, Debug)]
pub struct VirtualGear {
    pub search_address: u32,
    pub short_address: Option<u8>,
    pub device_type: u8,
    pub gtin: u64,

    pub level: u8,
    pub last_level: u8,
    pub min_level: u8,
    pub max_level: u8,
    pub power_on_level: u8,
    pub fade: u8,
    pub status: u8,
    pub groups: u16,

    initialised: bool,
    withdrawn: bool,
}

impl VirtualGear {
    pub fn new(search_address: u32) -> Self {
        Self {
            search_address,
            short_address: None,
            device_type: 6,
            gtin: 0x07EE_4BB3_B889,
            level: 0,
            last_level: 254,
            min_level: 1,
            max_level: 254,
            power_on_level: 254,
            fade: 0x07,
            status: 0,
            groups: 0,
            initialised: false,
            withdrawn: false,
        }
    }

    fn matches(&self, addr_byte: u8) -> bool {
        if addr_byte == 0xFF {
            return true;
        }
        if addr_byte & 0x80 != 0 {
            return self.groups & (1 << ((addr_byte >> 1) & 0x0F)) != 0;
        }
        self.short_address == Some(addr_byte >> 1)
    }

    /// Memory bank 0 image, bytes addressed the way `ReadMemoryLocation`
    /// sees them
    fn bank0(&self) -> Vec<u8> {
        let mut bank = vec![0u8; 27];
        bank[2] = 1;
        BigEndian::write_u48(&mut bank[3..9], self.gtin);
        bank[9] = 7;
        bank[10] = 7;
        bank[11..16].copy_from_slice(&[0x38, 0x58, 0x1A, 0x00, 0x00]);
        bank[16..19].copy_from_slice(&[0x69, 0x02, 0x92]);
        bank[19] = 3;
        bank[20] = 0;
        bank[21] = 8;
        bank[24] = 1;
        bank[25] = 1;
        bank[26] = 0;
        bank
    }
}

/// A bus full of [VirtualGear], usable as a [MockHandle] responder:
///
/// ```ignore
/// let adapter = MockAdapter::new();
/// let mut sim = VirtualBus::new(vec![VirtualGear::new(0x800000)]);
/// adapter.handle().respond(move |pkt| sim.handle(pkt));
/// ```
pub struct VirtualBus {
    pub gears: Vec<VirtualGear>,
    search: u32,
    dtr0: u8,
    dtr1: u8,
    dtr2: u8,
}

impl VirtualBus {
    pub fn new(gears: Vec<VirtualGear>) -> Self {
        Self {
            gears,
            search: 0xFF_FFFF,
            dtr0: 0,
            dtr1: 0,
            dtr2: 0,
        }
    }

    /// Process one outbound packet, producing the echo plus whatever
    /// backward traffic the gear generate. Zero answers become a NAK, one
    /// becomes a response, several become a framing error
    pub fn handle(&mut self, pkt: &[u8; TX_PACKET_LEN]) -> Vec<[u8; RX_PACKET_LEN]> {
        let seq = pkt[TX_SEQUENCE];

        if pkt[TX_TYPE] != TYPE_GEAR_16 {
            // 24/25-bit traffic is not simulated; gear stays silent
            return vec![MockAdapter::nak_packet(seq)];
        }

        let mid = pkt[TX_FRAME_MID];
        let low = pkt[TX_FRAME_LOW];

        let mut replies = vec![MockAdapter::echo_packet(seq, [0, mid, low])];

        let answers = if SpecialCommandCode::is_special_command(mid) {
            self.special(mid, low)
        } else {
            self.addressed(mid, low)
        };

        match answers.len() {
            0 => replies.push(MockAdapter::nak_packet(seq)),
            1 => replies.push(MockAdapter::response_packet(seq, answers[0])),
            _ => replies.push(MockAdapter::framing_error_packet(seq)),
        }

        replies
    }

    fn special(&mut self, code: u8, operand: u8) -> Vec<u8> {
        let code = match SpecialCommandCode::from_repr(code) {
            Some(c) => c,
            None => return Vec::new(),
        };

        use SpecialCommandCode::*;
        match code {
            Terminate => {
                for g in self.gears.iter_mut() {
                    g.initialised = false;
                    g.withdrawn = false;
                }
            }
            Initialise => {
                for g in self.gears.iter_mut() {
                    g.initialised = true;
                }
            }
            Randomise => (),
            SearchAddrH => self.search = (self.search & 0x00_FFFF) | (operand as u32) << 16,
            SearchAddrM => self.search = (self.search & 0xFF_00FF) | (operand as u32) << 8,
            SearchAddrL => self.search = (self.search & 0xFF_FF00) | operand as u32,
            Compare => {
                let n = self
                    .gears
                    .iter()
                    .filter(|g| g.initialised && !g.withdrawn && g.search_address <= self.search)
                    .count();
                return vec![0xFF; n];
            }
            ProgramShortAddress => {
                for g in self.selected() {
                    g.short_address = Some(operand >> 1);
                }
            }
            QueryShortAddress => {
                return self
                    .gears
                    .iter()
                    .filter(|g| g.initialised && !g.withdrawn && g.search_address == self.search)
                    .filter_map(|g| g.short_address.map(|s| s << 1 | 1))
                    .collect();
            }
            Withdraw => {
                for g in self.selected() {
                    g.withdrawn = true;
                }
            }
            SetDTR0 => self.dtr0 = operand,
            SetDTR1 => self.dtr1 = operand,
            SetDTR2 => self.dtr2 = operand,
            _ => (),
        }

        Vec::new()
    }

    /// Gear whose search address equals the search register
    fn selected(&mut self) -> impl Iterator<Item = &mut VirtualGear> {
        let search = self.search;
        self.gears
            .iter_mut()
            .filter(move |g| g.initialised && !g.withdrawn && g.search_address == search)
    }

    fn addressed(&mut self, mid: u8, low: u8) -> Vec<u8> {
        use crate::command::CommandCode as Cmd;

        let dtr0 = self.dtr0;
        let dtr1 = self.dtr1;
        let mut answers = Vec::new();
        let mut read_memory = false;

        for g in self.gears.iter_mut().filter(|g| g.matches(mid)) {
            if mid & 0x01 == 0 {
                // Direct arc power
                g.level = low;
                if low > 0 {
                    g.last_level = low;
                }
                continue;
            }

            match low {
                c if c == Cmd::Off as u8 => g.level = 0,
                c if c == Cmd::Up as u8 => g.level = g.level.saturating_add(1).min(g.max_level),
                c if c == Cmd::Down as u8 => g.level = g.level.saturating_sub(1),
                c if c == Cmd::RecallMaxLevel as u8 => g.level = g.max_level,
                c if c == Cmd::RecallMinLevel as u8 => g.level = g.min_level,
                c if c == Cmd::GoToLastActiveLevel as u8 => g.level = g.last_level,
                c if c == Cmd::SetPowerOnLevel as u8 => g.power_on_level = dtr0,
                c if c == Cmd::SetShortAddress as u8 => {
                    g.short_address = if dtr0 == 0xFF { None } else { Some(dtr0 >> 1) };
                }
                c if (Cmd::AddToGroup as u8..=Cmd::AddToGroup as u8 | 0x0F).contains(&c) => {
                    g.groups |= 1 << (c & 0x0F);
                }
                c if (Cmd::RemoveFromGroup as u8..=Cmd::RemoveFromGroup as u8 | 0x0F)
                    .contains(&c) =>
                {
                    g.groups &= !(1 << (c & 0x0F));
                }
                c if c == Cmd::QueryStatus as u8 => answers.push(g.status),
                c if c == Cmd::QueryDeviceType as u8 => answers.push(g.device_type),
                c if c == Cmd::QueryActualLevel as u8 => answers.push(g.level),
                c if c == Cmd::QueryMaxLevel as u8 => answers.push(g.max_level),
                c if c == Cmd::QueryMinLevel as u8 => answers.push(g.min_level),
                c if c == Cmd::QueryPowerOnLevel as u8 => answers.push(g.power_on_level),
                c if c == Cmd::QueryFadeTimeFadeRate as u8 => answers.push(g.fade),
                c if c == Cmd::QueryGroupsZeroToSeven as u8 => answers.push(g.groups as u8),
                c if c == Cmd::QueryGroupsEightToFifteen as u8 => {
                    answers.push((g.groups >> 8) as u8)
                }
                c if c == Cmd::ReadMemoryLocation as u8 => {
                    if dtr1 == 0 {
                        let bank = g.bank0();
                        if let Some(byte) = bank.get(dtr0 as usize) {
                            answers.push(*byte);
                            read_memory = true;
                        }
                    }
                }
                _ => (),
            }
        }

        // DTR0 auto-increments after a memory read
        if read_memory {
            self.dtr0 = self.dtr0.wrapping_add(1);
        }

        answers
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn virtual_compare_counts() {
        let mut bus = VirtualBus::new(vec![VirtualGear::new(0x100), VirtualGear::new(0x200)]);
        for g in bus.gears.iter_mut() {
            g.initialised = true;
        }

        bus.search = 0x0FF;
        assert!(bus.special(SpecialCommandCode::Compare as u8, 0).is_empty());

        bus.search = 0x100;
        assert_eq!(bus.special(SpecialCommandCode::Compare as u8, 0).len(), 1);

        bus.search = 0x300;
        assert_eq!(bus.special(SpecialCommandCode::Compare as u8, 0).len(), 2);
    }

    #[test]
    fn virtual_program_and_withdraw() {
        let mut bus = VirtualBus::new(vec![VirtualGear::new(0x42)]);
        bus.gears[0].initialised = true;

        bus.search = 0x42;
        bus.special(SpecialCommandCode::ProgramShortAddress as u8, 5 << 1 | 1);
        assert_eq!(bus.gears[0].short_address, Some(5));

        let q = bus.special(SpecialCommandCode::QueryShortAddress as u8, 0);
        assert_eq!(q, vec![5 << 1 | 1]);

        bus.special(SpecialCommandCode::Withdraw as u8, 0);
        assert!(bus.special(SpecialCommandCode::Compare as u8, 0).is_empty());
    }

    #[test]
    fn virtual_memory_read_increments_dtr0() {
        let mut bus = VirtualBus::new(vec![VirtualGear::new(0)]);
        bus.gears[0].short_address = Some(3);

        bus.dtr0 = 2;
        let a = bus.addressed(3 << 1 | 1, crate::command::CommandCode::ReadMemoryLocation as u8);
        assert_eq!(a, vec![1]); // last accessible bank
        assert_eq!(bus.dtr0, 3);
    }
}
