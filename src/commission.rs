//! Commissioning: assignment of short addresses to unaddressed gear.
//!
//! Gears randomise themselves a 24-bit search address; a binary search
//! over that space isolates one gear at a time, which is then programmed
//! with the next free short address and withdrawn from the search.

use std::collections::VecDeque;

use log::{debug, info, warn};
use tokio::time::{sleep, Duration};

use crate::bus::Transceiver;
use crate::command::CommandCode;
use crate::command::SpecialCommandCode::*;
use crate::error::DaliError;
use crate::frame::Repeat;

const SEARCH_SPACE_MAX: u32 = 0xFF_FFFF;

/// Outcome of a `Compare`: how many gears sit at or below the search
/// address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CompareCount {
    None,
    One,
    Many,
}

/// Tracks the search address bytes on the bus so only changed components
/// are re-sent
struct SearchAddressSender {
    last_high: Option<u8>,
    last_mid: Option<u8>,
    last_low: Option<u8>,
}

impl SearchAddressSender {
    fn new() -> Self {
        Self {
            last_high: None,
            last_mid: None,
            last_low: None,
        }
    }

    async fn send(&mut self, bus: &Transceiver, addr: u32) -> Result<(), DaliError> {
        let low = addr as u8;
        let mid = (addr >> 8) as u8;
        let high = (addr >> 16) as u8;

        if self.last_low != Some(low) {
            bus.send_special_cmd(SearchAddrL, low, Repeat::Once).await?;
            self.last_low = Some(low);
        }
        if self.last_mid != Some(mid) {
            bus.send_special_cmd(SearchAddrM, mid, Repeat::Once).await?;
            self.last_mid = Some(mid);
        }
        if self.last_high != Some(high) {
            bus.send_special_cmd(SearchAddrH, high, Repeat::Once).await?;
            self.last_high = Some(high);
        }

        Ok(())
    }
}

impl Transceiver {
    /// Compare the bus population against `search`. A 0xFF reply means
    /// exactly one gear is at or below it, silence means none, and a
    /// collision means several answered at once
    async fn compare(
        &self,
        search: u32,
        sender: &mut SearchAddressSender,
    ) -> Result<CompareCount, DaliError> {
        sender.send(self, search).await?;

        match self.send_special_cmd(Compare, 0, Repeat::Once).await {
            Ok(Some(0xFF)) => Ok(CompareCount::One),
            Ok(Some(other)) => Err(DaliError::UnexpectedResponse(other)),
            Ok(None) => Ok(CompareCount::None),
            Err(DaliError::Framing) => Ok(CompareCount::Many),
            Err(e) => Err(e),
        }
    }

    /// Binary search for the participating gear with the lowest search
    /// address at or above `floor`. Returns none when no gear answers,
    /// and [DaliError::SearchAddressClash] when two gears share the
    /// winning address
    async fn search_gear(&self, floor: u32) -> Result<Option<u32>, DaliError> {
        if floor > SEARCH_SPACE_MAX {
            return Ok(None);
        }

        let mut low = floor;
        let mut high = SEARCH_SPACE_MAX;
        let mut sender = SearchAddressSender::new();

        loop {
            let mid = (low + high) / 2;
            let count = self.compare(mid, &mut sender).await?;

            if low == high {
                return match count {
                    CompareCount::One => Ok(Some(mid)),
                    CompareCount::Many => Err(DaliError::SearchAddressClash),
                    CompareCount::None => Ok(None),
                };
            }

            match count {
                // Nothing at or below mid, the winner is above
                CompareCount::None => low = mid + 1,
                // At least one at or below, but we don't yet know which
                CompareCount::One | CompareCount::Many => high = mid,
            }
        }
    }

    /// Run the full commissioning protocol: wipe addressing state, have
    /// all gear randomise, then repeatedly isolate the lowest search
    /// address and hand it the next free short address. Returns the
    /// assigned short addresses in order
    pub async fn commission(&self) -> Result<Vec<u8>, DaliError> {
        // Cancel any initialisation left over from an earlier run
        self.send_special_cmd(Terminate, 0, Repeat::Once).await?;

        let result = self.commission_inner().await;

        // Terminate on every exit path
        let terminate = self.send_special_cmd(Terminate, 0, Repeat::Once).await;

        let assigned = result?;
        terminate?;
        Ok(assigned)
    }

    async fn commission_inner(&self) -> Result<Vec<u8>, DaliError> {
        info!("Commissioning {}", self.unique_id());

        self.send_special_cmd(Initialise, 0, Repeat::Twice).await?;

        // Clear out any existing short addresses; 0xFF is "no address"
        self.send_special_cmd(SetDTR0, 0xFF, Repeat::Once).await?;
        self.broadcast(CommandCode::SetShortAddress, Repeat::Twice)
            .await?;

        // Reset operating mode
        self.send_special_cmd(SetDTR0, 128, Repeat::Once).await?;
        self.broadcast(CommandCode::SetOperatingMode, Repeat::Twice)
            .await?;

        // Remove all gear from all groups
        for group in 0..16u8 {
            self.broadcast_opcode(CommandCode::RemoveFromGroup as u8 | group, Repeat::Twice)
                .await?;
        }

        self.send_special_cmd(Randomise, 0, Repeat::Twice).await?;
        sleep(Duration::from_millis(self.settle_ms())).await;

        let mut pool: VecDeque<u8> = (0..64).collect();
        let mut assigned = Vec::new();
        let mut floor: u32 = 0;

        loop {
            match self.search_gear(floor).await {
                Ok(Some(found)) => {
                    let short = pool
                        .pop_front()
                        .ok_or(DaliError::ShortAddressPoolExhausted)?;
                    let shifted = short << 1 | 1;

                    self.send_special_cmd(ProgramShortAddress, shifted, Repeat::Once)
                        .await?;
                    let queried = self.send_special_cmd(QueryShortAddress, 0, Repeat::Once).await?;

                    if queried != Some(shifted) {
                        return Err(DaliError::ShortAddressNotStored {
                            expected: shifted,
                            got: queried,
                        });
                    }

                    self.send_special_cmd(Withdraw, 0, Repeat::Once).await?;

                    info!("Assigned A{} to gear at {:#08x}", short, found);
                    assigned.push(short);
                    floor = found + 1;
                }
                Ok(None) => {
                    debug!("No more gear found");
                    break;
                }
                Err(DaliError::SearchAddressClash) => {
                    // Two gears settled on the same search address; rerun
                    // the search over the full space so the contested
                    // range resolves against the remaining population
                    warn!("Search address clash, restarting search");
                    floor = 0;
                }
                Err(e) => return Err(e),
            }
        }

        info!("Commissioning complete, {} gear assigned", assigned.len());
        Ok(assigned)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::{MockAdapter, VirtualBus, VirtualGear};

    #[tokio::test]
    async fn commission_single_gear() {
        let adapter = MockAdapter::new();
        let mut sim = VirtualBus::new(vec![VirtualGear::new(0x80_0000)]);
        adapter.handle().respond(move |pkt| sim.handle(pkt));

        let bus = Transceiver::new(adapter);
        bus.open().unwrap();

        let assigned = bus.commission().await.unwrap();
        assert_eq!(assigned, vec![0]);

        bus.close();
    }

    #[tokio::test]
    async fn commission_assigns_unique_addresses() {
        let adapter = MockAdapter::new();
        let mut sim = VirtualBus::new(vec![
            VirtualGear::new(0x00_0001),
            VirtualGear::new(0x80_0000),
            VirtualGear::new(0xFF_FFFE),
        ]);
        adapter.handle().respond(move |pkt| sim.handle(pkt));

        let bus = Transceiver::new(adapter);
        bus.open().unwrap();

        let assigned = bus.commission().await.unwrap();
        assert_eq!(assigned, vec![0, 1, 2]);

        bus.close();
    }

    #[tokio::test]
    async fn commission_gear_at_top_of_space() {
        // A gear at the very top must not leave the search running with
        // the floor past the end of the space
        let adapter = MockAdapter::new();
        let mut sim = VirtualBus::new(vec![VirtualGear::new(SEARCH_SPACE_MAX)]);
        adapter.handle().respond(move |pkt| sim.handle(pkt));

        let bus = Transceiver::new(adapter);
        bus.open().unwrap();

        let assigned = bus.commission().await.unwrap();
        assert_eq!(assigned, vec![0]);

        bus.close();
    }

    #[tokio::test]
    async fn commission_empty_bus() {
        let adapter = MockAdapter::new();
        let mut sim = VirtualBus::new(Vec::new());
        adapter.handle().respond(move |pkt| sim.handle(pkt));

        let bus = Transceiver::new(adapter);
        bus.open().unwrap();

        let assigned = bus.commission().await.unwrap();
        assert!(assigned.is_empty());

        bus.close();
    }

    #[tokio::test]
    async fn commission_ends_initialisation_on_failure() {
        // Break QueryShortAddress by never programming anything: a gear
        // that answers the search but ignores programming trips the
        // short-address check, and Terminate must still go out
        let adapter = MockAdapter::new();
        let handle = adapter.handle();
        let mut sim = VirtualBus::new(vec![VirtualGear::new(0x10)]);
        handle.respond(move |pkt| {
            // Drop ProgramShortAddress frames before the simulator sees
            // them
            if pkt[6] == ProgramShortAddress as u8 {
                return vec![MockAdapter::nak_packet(pkt[1])];
            }
            sim.handle(pkt)
        });

        let bus = Transceiver::new(adapter);
        bus.open().unwrap();

        let err = bus.commission().await.unwrap_err();
        assert!(matches!(err, DaliError::ShortAddressNotStored { .. }));

        // Last frame on the wire is the Terminate from the cleanup path
        let written = handle.written();
        let last = written.last().unwrap();
        assert_eq!(last[6], Terminate as u8);

        bus.close();
    }
}
