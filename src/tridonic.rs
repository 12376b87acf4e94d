//! Tridonic DALI USB adapter support.
//!
//! Packet layouts reverse-engineered by USB sniffing. The adapter performs
//! the manchester line coding and repeat transmission itself; this module
//! only speaks its byte-packet format.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use hidapi::{DeviceInfo, HidApi, HidDevice};
use log::trace;
use strum::FromRepr;

use crate::error::{AdapterError, DecodeError};
use crate::frame::{Repeat, TxFrame};
use crate::message::MessageSource;
use crate::Adapter;

pub const VENDOR_ID: u16 = 0x17B5;
pub const PRODUCT_ID: u16 = 0x0020;

/// Outbound packets are 64 bytes, zero padded past the first 8
pub const TX_PACKET_LEN: usize = 64;

/// Inbound packets are 16 bytes
pub const RX_PACKET_LEN: usize = 16;

// Outbound layout
pub(crate) const TX_SOURCE: usize = 0;
pub(crate) const TX_SEQUENCE: usize = 1;
pub(crate) const TX_REPEAT: usize = 2;
pub(crate) const TX_TYPE: usize = 3;
pub(crate) const TX_FRAME_HIGH: usize = 5;
pub(crate) const TX_FRAME_MID: usize = 6;
pub(crate) const TX_FRAME_LOW: usize = 7;

pub(crate) const REPEAT_TWICE: u8 = 0x20;

pub(crate) const TYPE_GEAR_16: u8 = 0x03;
pub(crate) const TYPE_DEVICE_24: u8 = 0x04;
pub(crate) const TYPE_DA24_CONFIG: u8 = 0x06;

// Inbound layout
pub(crate) const RX_SOURCE: usize = 0;
pub(crate) const RX_TYPE: usize = 1;
pub(crate) const RX_FRAME_HIGH: usize = 3;
pub(crate) const RX_FRAME_MID: usize = 4;
pub(crate) const RX_FRAME_LOW: usize = 5;
pub(crate) const RX_SEQUENCE: usize = 8;

/// Inbound packet type tags
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum RxKind {
    /// No gear answered a query
    Nak = 0x71,

    /// 8-bit backward frame
    Response = 0x72,

    /// Echo of a frame this adapter put on the wire
    TxComplete = 0x73,

    /// Forward frame observed on the bus
    BroadcastReceived = 0x74,

    /// Collision or malformed half-bit
    FramingError = 0x77,
}

/// A decoded inbound packet, still carrying the raw frame bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxPacket {
    pub source: MessageSource,
    pub kind: RxKind,
    /// Frame bytes high/mid/low; high is zero for 16-bit traffic
    pub frame: [u8; 3],
    /// Zero for frames originated by another bus master
    pub sequence: u8,
}

/// Encode an outbound frame into the adapter's 64-byte packet format
pub fn encode_packet(sequence: u8, frame: TxFrame, repeat: Repeat) -> [u8; TX_PACKET_LEN] {
    let mut pkt = [0u8; TX_PACKET_LEN];

    pkt[TX_SOURCE] = MessageSource::SelfSent as u8;
    pkt[TX_SEQUENCE] = sequence;
    if repeat == Repeat::Twice {
        pkt[TX_REPEAT] = REPEAT_TWICE;
    }

    pkt[TX_TYPE] = match frame {
        TxFrame::Gear(_) => TYPE_GEAR_16,
        TxFrame::Device(_) => TYPE_DEVICE_24,
        TxFrame::Da24Config(_) => TYPE_DA24_CONFIG,
    };

    let [high, mid, low] = frame.bytes();
    pkt[TX_FRAME_HIGH] = high;
    pkt[TX_FRAME_MID] = mid;
    pkt[TX_FRAME_LOW] = low;

    pkt
}

/// Decode a 16-byte inbound packet
pub fn decode_packet(buf: &[u8]) -> Result<RxPacket, DecodeError> {
    if buf.len() < RX_PACKET_LEN {
        return Err(DecodeError::ShortPacket(buf.len()));
    }

    let source = MessageSource::from_repr(buf[RX_SOURCE])
        .ok_or(DecodeError::UnknownSource(buf[RX_SOURCE]))?;
    let kind = RxKind::from_repr(buf[RX_TYPE])
        .ok_or(DecodeError::UnknownPacketType(buf[RX_TYPE]))?;

    Ok(RxPacket {
        source,
        kind,
        frame: [buf[RX_FRAME_HIGH], buf[RX_FRAME_MID], buf[RX_FRAME_LOW]],
        sequence: buf[RX_SEQUENCE],
    })
}

/// A connected Tridonic USB adapter
pub struct TridonicAdapter {
    dev: HidDevice,
    serial: String,
    manufacturer: Option<String>,
    product: Option<String>,
    closed: AtomicBool,
    read_timeout_ms: i32,
}

// hidapi's `HidDevice` is not `Sync` on every backend (it may hold raw FFI
// pointers or interior-mutable FFI state), but callers are required to
// serialise access to the write/read endpoints (see `Adapter`), so sharing
// a `&TridonicAdapter` across threads never causes concurrent device access.
unsafe impl Sync for TridonicAdapter {}

impl TridonicAdapter {
    /// Open the adapter with the given serial number
    pub fn open(api: &HidApi, serial: &str) -> Result<Self, AdapterError> {
        let dev = api.open_serial(VENDOR_ID, PRODUCT_ID, serial)?;

        let manufacturer = dev.get_manufacturer_string().unwrap_or(None);
        let product = dev.get_product_string().unwrap_or(None);

        Ok(Self {
            dev,
            serial: serial.to_string(),
            manufacturer,
            product,
            closed: AtomicBool::new(false),
            read_timeout_ms: 250,
        })
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.manufacturer.as_deref()
    }

    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }
}

impl Adapter for TridonicAdapter {
    fn write_packet(&self, buf: &[u8]) -> Result<(), AdapterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::Closed);
        }

        trace!("write {:02x?}", &buf[..8.min(buf.len())]);
        self.dev.write(buf)?;
        Ok(())
    }

    fn read_packet(&self, buf: &mut [u8]) -> Result<usize, AdapterError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdapterError::Closed);
        }

        // A timeout is a zero-length read, not a fault
        let n = self.dev.read_timeout(buf, self.read_timeout_ms)?;
        Ok(n)
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

lazy_static::lazy_static! {
    // hidapi allows one live context per process
    static ref HID_API: Mutex<Option<HidApi>> = Mutex::new(None);
}

/// Run `f` against the process-wide HID context, creating or refreshing it
pub(crate) fn with_hid_api<T>(f: impl FnOnce(&HidApi) -> T) -> Result<T, AdapterError> {
    let mut guard = HID_API.lock().unwrap_or_else(|e| e.into_inner());

    match guard.as_mut() {
        Some(api) => api.refresh_devices()?,
        None => *guard = Some(HidApi::new()?),
    }

    // Unwrap is fine, populated just above
    Ok(f(guard.as_ref().unwrap()))
}

/// Adapter constructors keyed by (vendor, product)
pub(crate) type AdapterCtor = fn(&HidApi, &DeviceInfo) -> Result<Box<dyn Adapter>, AdapterError>;

pub(crate) const SUPPORTED_ADAPTERS: &[(u16, u16, AdapterCtor)] =
    &[(VENDOR_ID, PRODUCT_ID, open_tridonic)];

fn open_tridonic(api: &HidApi, info: &DeviceInfo) -> Result<Box<dyn Adapter>, AdapterError> {
    let serial = info.serial_number().unwrap_or("");
    Ok(Box::new(TridonicAdapter::open(api, serial)?))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::address::Address;
    use crate::command::{CommandCode, SpecialCommandCode};
    use crate::frame::QUIESCENT_START;

    #[test]
    fn encode_standard_command() {
        // Off to short address 3
        let frame = TxFrame::command(Address::short(3), CommandCode::Off as u8);
        let pkt = encode_packet(0x01, frame, Repeat::Once);

        assert_eq!(pkt[0], 0x12);
        assert_eq!(pkt[1], 0x01);
        assert_eq!(pkt[2], 0x00);
        assert_eq!(pkt[3], 0x03);
        assert_eq!(pkt[5], 0x00);
        assert_eq!(pkt[6], 0x07);
        assert_eq!(pkt[7], 0x00);
        assert!(pkt[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn encode_direct_arc_power() {
        let frame = TxFrame::direct_arc_power(Address::BROADCAST, 128);
        let pkt = encode_packet(0x10, frame, Repeat::Once);

        assert_eq!(pkt[3], 0x03);
        assert_eq!(pkt[6], 0xFF);
        assert_eq!(pkt[7], 0x80);
    }

    #[test]
    fn encode_repeat_twice() {
        let frame = TxFrame::special(SpecialCommandCode::Initialise, 0);
        let pkt = encode_packet(0x02, frame, Repeat::Twice);

        assert_eq!(pkt[2], 0x20);
        assert_eq!(pkt[6], 0xA5);
    }

    #[test]
    fn encode_quiescent() {
        // 12 01 20 06 00 ff fe 1d as captured from the vendor tool
        let pkt = encode_packet(0x01, TxFrame::Da24Config(QUIESCENT_START), Repeat::Twice);
        assert_eq!(&pkt[..8], &[0x12, 0x01, 0x20, 0x06, 0x00, 0xFF, 0xFE, 0x1D]);
    }

    #[test]
    fn decode_response() {
        let mut buf = [0u8; RX_PACKET_LEN];
        buf[0] = 0x12;
        buf[1] = 0x72;
        buf[5] = 0x7F;
        buf[8] = 0x2A;

        let pkt = decode_packet(&buf).unwrap();
        assert_eq!(pkt.source, MessageSource::SelfSent);
        assert_eq!(pkt.kind, RxKind::Response);
        assert_eq!(pkt.frame, [0x00, 0x00, 0x7F]);
        assert_eq!(pkt.sequence, 0x2A);
    }

    #[test]
    fn decode_rejects_junk() {
        let mut buf = [0u8; RX_PACKET_LEN];
        buf[0] = 0x11;
        buf[1] = 0x76;
        assert_eq!(decode_packet(&buf), Err(DecodeError::UnknownPacketType(0x76)));

        buf[0] = 0x99;
        assert_eq!(decode_packet(&buf), Err(DecodeError::UnknownSource(0x99)));

        assert_eq!(decode_packet(&[0x12; 4]), Err(DecodeError::ShortPacket(4)));
    }
}
