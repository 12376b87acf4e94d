//! Bus transceiver core.
//!
//! One transceiver owns one adapter, the pending-request table, the
//! gear/group model, and the reader thread pumping inbound packets onto
//! the dispatch task. All caller-visible state changes happen on the
//! dispatch task; the reader thread only decodes and posts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use log::{debug, error, trace, warn};
use tokio::sync::{mpsc, oneshot};

use crate::address::Address;
use crate::command::{CommandCode, SpecialCommandCode};
use crate::error::{AdapterError, DaliError};
use crate::frame::{Repeat, TxFrame, QUIESCENT_START, QUIESCENT_STOP};
use crate::gear::{BusModel, Gear, GearRef, Group, GroupRef};
use crate::message::{Message, MessageBody};
use crate::pending::PendingTable;
use crate::productdb::{ProductInfoSource, ProductRecord};
use crate::tridonic::{self, RX_PACKET_LEN};
use crate::{Adapter, Delta};

/// Timing knobs for bus procedures
#[derive(Clone, Debug, PartialEq)]
pub struct BusConfig {
    /// Settle time after `Randomise` before the search starts, in ms
    pub randomise_settle_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            randomise_settle_ms: 100,
        }
    }
}

type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Handle returned by [Transceiver::add_message_callback]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallbackId(u64);

/// A DALI bus attached through one adapter
pub struct Transceiver {
    inner: Arc<Inner>,
}

struct Inner {
    adapter: Arc<dyn Adapter>,
    config: BusConfig,

    /// The one cross-thread flag; everything else is serialised by locks
    /// or confined to the dispatch task
    open: AtomicBool,

    pending: Mutex<PendingTable>,
    callbacks: Mutex<CallbackSet>,
    model: Mutex<BusModel>,
    product_info: Mutex<Option<Arc<dyn ProductInfoSource>>>,
    reader: Mutex<Option<thread::JoinHandle<()>>>,
}

struct CallbackSet {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

impl Transceiver {
    pub fn new(adapter: impl Adapter + 'static) -> Self {
        Self::from_boxed(Box::new(adapter))
    }

    pub fn with_config(adapter: impl Adapter + 'static, config: BusConfig) -> Self {
        Self::build(Arc::from(Box::new(adapter) as Box<dyn Adapter>), config)
    }

    pub(crate) fn from_boxed(adapter: Box<dyn Adapter>) -> Self {
        Self::build(Arc::from(adapter), BusConfig::default())
    }

    fn build(adapter: Arc<dyn Adapter>, config: BusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                adapter,
                config,
                open: AtomicBool::new(false),
                pending: Mutex::new(PendingTable::new()),
                callbacks: Mutex::new(CallbackSet {
                    next_id: 0,
                    entries: Vec::new(),
                }),
                model: Mutex::new(BusModel::new()),
                product_info: Mutex::new(None),
                reader: Mutex::new(None),
            }),
        }
    }

    pub fn serial(&self) -> &str {
        self.inner.adapter.serial()
    }

    pub fn unique_id(&self) -> String {
        format!("dali-usb-{}", self.serial())
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    pub(crate) fn settle_ms(&self) -> u64 {
        self.inner.config.randomise_settle_ms
    }

    /// Plug in a metadata source consulted by gear scans
    pub fn set_product_info_source(&self, source: Arc<dyn ProductInfoSource>) {
        *lock(&self.inner.product_info) = Some(source);
    }

    pub(crate) fn product_info(&self, gtin: u64) -> Option<ProductRecord> {
        lock(&self.inner.product_info)
            .as_ref()
            .and_then(|db| db.fetch(gtin))
    }

    /// Start the reader thread and dispatch task. Must be called from
    /// within a tokio runtime; messages and completions are delivered on
    /// it. Opening an already open transceiver is a no-op
    pub fn open(&self) -> Result<(), DaliError> {
        if self.inner.open.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(dispatch_loop(self.inner.clone(), rx));

        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name(format!("dali-reader-{}", self.serial()))
            .spawn(move || read_loop(inner, tx))
            .map_err(|e| AdapterError::Io(e.to_string()))?;

        *lock(&self.inner.reader) = Some(handle);

        debug!("Opened {}", self.unique_id());
        Ok(())
    }

    /// Stop the reader, close the adapter, and reject anything pending.
    /// Safe to call twice; also performed on drop
    pub fn close(&self) {
        self.inner.shutdown();
        lock(&self.inner.reader).take();
    }

    /// Submit one frame and hand back its completion. The pending slot is
    /// registered before the bytes reach the adapter, and the write path
    /// is serialised under the same lock, so frames go out in submission
    /// order
    pub(crate) async fn send_frame(
        &self,
        frame: TxFrame,
        repeat: Repeat,
    ) -> Result<Option<u8>, DaliError> {
        let rx = {
            if !self.is_open() {
                return Err(DaliError::NotOpen);
            }

            let mut pending = lock(&self.inner.pending);
            let seq = pending.next_seq();
            let (tx, rx) = oneshot::channel();
            pending.insert(seq, tx);

            trace!("Transmit seq {} {:?} ({:?})", seq, frame, repeat);

            let pkt = tridonic::encode_packet(seq, frame, repeat);
            if let Err(e) = self.inner.adapter.write_packet(&pkt) {
                pending.remove(seq);
                return Err(e.into());
            }

            rx
        };

        match rx.await {
            Ok(reply) => reply,
            // Sender dropped without resolving; only possible when the
            // slot was reaped after the driver went away
            Err(_) => Err(DaliError::Closed),
        }
    }

    /// Send a standard command. Resolves with the backward frame for
    /// queries, or none when no gear answered
    pub async fn send_cmd(
        &self,
        address: Address,
        cmd: CommandCode,
        repeat: Repeat,
    ) -> Result<Option<u8>, DaliError> {
        self.send_opcode(address, cmd as u8, repeat).await
    }

    /// Parameterised command families (`AddToGroup|n`, `GoToScene|n`, ...)
    /// are sent as a raw opcode byte
    pub(crate) async fn send_opcode(
        &self,
        address: Address,
        opcode: u8,
        repeat: Repeat,
    ) -> Result<Option<u8>, DaliError> {
        self.send_frame(TxFrame::command(address, opcode), repeat).await
    }

    pub async fn send_special_cmd(
        &self,
        code: SpecialCommandCode,
        operand: u8,
        repeat: Repeat,
    ) -> Result<Option<u8>, DaliError> {
        self.send_frame(TxFrame::special(code, operand), repeat).await
    }

    pub async fn send_direct_arc_power(
        &self,
        address: Address,
        level: u8,
    ) -> Result<Option<u8>, DaliError> {
        self.send_frame(TxFrame::direct_arc_power(address, level), Repeat::Once)
            .await
    }

    pub async fn broadcast(
        &self,
        cmd: CommandCode,
        repeat: Repeat,
    ) -> Result<Option<u8>, DaliError> {
        self.send_cmd(Address::BROADCAST, cmd, repeat).await
    }

    pub(crate) async fn broadcast_opcode(
        &self,
        opcode: u8,
        repeat: Repeat,
    ) -> Result<Option<u8>, DaliError> {
        self.send_opcode(Address::BROADCAST, opcode, repeat).await
    }

    /// Suppress background application traffic during commissioning
    pub async fn start_quiescent(&self) -> Result<(), DaliError> {
        self.send_frame(TxFrame::Da24Config(QUIESCENT_START), Repeat::Twice)
            .await
            .map(|_| ())
    }

    pub async fn stop_quiescent(&self) -> Result<(), DaliError> {
        self.send_frame(TxFrame::Da24Config(QUIESCENT_STOP), Repeat::Twice)
            .await
            .map(|_| ())
    }

    /// Observe every message seen on the bus, own traffic and other
    /// masters' alike. Callbacks run on the dispatch task
    pub fn add_message_callback(
        &self,
        callback: impl Fn(&Message) + Send + Sync + 'static,
    ) -> CallbackId {
        let mut set = lock(&self.inner.callbacks);
        let id = set.next_id;
        set.next_id += 1;
        set.entries.push((id, Arc::new(callback)));
        CallbackId(id)
    }

    pub fn remove_message_callback(&self, id: CallbackId) {
        lock(&self.inner.callbacks).entries.retain(|(i, _)| *i != id.0);
    }

    pub(crate) fn with_model<T>(&self, f: impl FnOnce(&mut BusModel) -> T) -> T {
        f(&mut lock(&self.inner.model))
    }

    /// Handle to one of the 64 gear slots
    pub fn gear(&self, short_address: u8) -> GearRef {
        assert!(short_address <= 63, "short address out of bounds");
        GearRef {
            bus: self,
            short: short_address,
        }
    }

    /// Handle to one of the 16 group slots
    pub fn group(&self, number: u8) -> GroupRef {
        assert!(number <= 15, "group number out of bounds");
        GroupRef { bus: self, number }
    }

    pub fn gears(&self) -> Vec<Gear> {
        self.with_model(|m| m.gears.clone())
    }

    pub fn groups(&self) -> Vec<Group> {
        self.with_model(|m| m.groups.clone())
    }

    pub fn present_gear(&self) -> Vec<Gear> {
        self.with_model(|m| m.gears.iter().filter(|g| g.present()).cloned().collect())
    }

    pub fn present_groups(&self) -> Vec<Group> {
        self.with_model(|m| m.groups.iter().filter(|g| g.has_gear()).cloned().collect())
    }

    /// Interrogate every short address and rebuild the group projection
    pub async fn scan_for_gear(&self) -> Result<Vec<Gear>, DaliError> {
        for short in 0..64 {
            debug!("Scanning A{}", short);
            self.gear(short).fetch_deviceinfo().await?;
        }

        Ok(self.with_model(|m| {
            m.rebuild_groups();
            m.gears.clone()
        }))
    }

    /// Gear whose state a message may have changed: arc power frames and
    /// side-effect commands only, matched through the address
    pub fn affected_gear(&self, msg: &Message) -> Vec<Gear> {
        let address = match msg.body {
            MessageBody::DirectArcPower { address, .. } => Some(address),
            MessageBody::AddressedCommand { address, command } if command.has_side_effects() => {
                Some(address)
            }
            _ => None,
        };

        match address {
            Some(addr) => self.with_model(|m| {
                m.gears
                    .iter()
                    .filter(|g| g.present() && addr.matches_gear(g))
                    .cloned()
                    .collect()
            }),
            None => Vec::new(),
        }
    }

    /// Groups incidentally touched when the given gear change
    pub fn affected_groups(&self, affected: &[Gear]) -> Vec<Group> {
        let mask = affected.iter().fold(0u16, |acc, g| acc | g.groups);

        self.with_model(|m| {
            m.groups
                .iter()
                .filter(|g| mask & (1 << g.number) != 0)
                .cloned()
                .collect()
        })
    }
}

impl Drop for Transceiver {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl core::fmt::Debug for Transceiver {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{}", self.unique_id())
    }
}

impl Inner {
    fn handle_message(&self, msg: &Message) {
        lock(&self.pending).handle(msg);

        let callbacks: Vec<Callback> = lock(&self.callbacks)
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in callbacks {
            cb(msg);
        }
    }

    fn shutdown(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }

        self.adapter.close();
        lock(&self.pending).reject_all(DaliError::Closed);
        debug!("Closed dali-usb-{}", self.adapter.serial());
    }
}

/// Mutex poisoning only happens when a holder panicked; the protected
/// state stays usable for shutdown paths
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Dedicated reader thread: blocking adapter reads, decode, post. Never
/// touches shared state beyond the stop flag and the channel
fn read_loop(inner: Arc<Inner>, tx: mpsc::UnboundedSender<Message>) {
    let mut buf = [0u8; RX_PACKET_LEN];

    while inner.open.load(Ordering::Acquire) {
        match inner.adapter.read_packet(&mut buf) {
            // Timeout or empty read, try again
            Ok(0) => continue,
            Ok(n) => match tridonic::decode_packet(&buf[..n]) {
                Ok(pkt) => {
                    let msg = Message::from_packet(&pkt);
                    trace!("Received {}", msg);
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
                // Undecodable traffic is dropped, never fatal
                Err(e) => warn!("Could not process packet: {}", e),
            },
            Err(AdapterError::Closed) => break,
            Err(e) => {
                error!("Adapter read failed: {}", e);
                inner.shutdown();
                break;
            }
        }
    }

    debug!("Reader finished");
}

/// Dispatch task: the single place where pending requests resolve and
/// observers run
async fn dispatch_loop(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(msg) = rx.recv().await {
        inner.handle_message(&msg);
    }
}

lazy_static::lazy_static! {
    static ref TRANSCEIVERS: Mutex<Vec<Arc<Transceiver>>> = Mutex::new(Vec::new());
}

/// Scan USB for supported adapters, returning the delta against the
/// process-wide registry. Adapters seen before are neither re-opened nor
/// reported again; adapters that vanished come back in `removed`
pub fn scan_for_transceivers() -> Result<Delta<Arc<Transceiver>>, DaliError> {
    debug!("Scanning for transceivers");

    let mut known = TRANSCEIVERS.lock().unwrap_or_else(|e| e.into_inner());

    let mut added: Vec<Arc<Transceiver>> = Vec::new();
    let mut removed: Vec<Arc<Transceiver>> = known.clone();

    tridonic::with_hid_api(|api| {
        for device in api.device_list() {
            let ctor = tridonic::SUPPORTED_ADAPTERS
                .iter()
                .find(|(v, p, _)| *v == device.vendor_id() && *p == device.product_id());
            let ctor = match ctor {
                Some((_, _, ctor)) => ctor,
                None => continue,
            };

            let serial = device.serial_number().unwrap_or("");
            if let Some(pos) = removed.iter().position(|t| t.serial() == serial) {
                // Still attached, not part of the delta
                removed.remove(pos);
                continue;
            }

            match ctor(api, device) {
                Ok(adapter) => added.push(Arc::new(Transceiver::from_boxed(adapter))),
                Err(e) => warn!("Failed to open adapter {}: {}", serial, e),
            }
        }
    })?;

    known.retain(|t| !removed.iter().any(|r| Arc::ptr_eq(r, t)));
    known.extend(added.iter().cloned());

    Ok(Delta { added, removed })
}
