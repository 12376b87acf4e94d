//! DALI (IEC 62386) lighting bus driver for USB HID adapters.
//!
//! A [bus::Transceiver] frames and sends DALI commands through an
//! [Adapter], correlates the asynchronous responses back to each send by
//! sequence number, commissions unaddressed gear, and models the 64 gear
//! and 16 group slots of the attached bus.

pub mod address;

pub mod command;

pub mod frame;

pub mod message;

pub mod error;

pub mod tridonic;

pub mod bus;

mod commission;

mod pending;

pub mod gear;

pub mod productdb;

pub mod prelude;

#[cfg(any(test, feature = "mocks"))]
pub mod mock;

use error::AdapterError;

/// Adapter interface combines the capabilities of a byte-packet DALI USB
/// device: packet write, blocking packet read, identity and teardown
pub trait Adapter: Send + Sync {
    /// Write one outbound packet. The write endpoint is exclusive;
    /// callers serialise
    fn write_packet(&self, buf: &[u8]) -> Result<(), AdapterError>;

    /// Read one inbound packet into `buf` and return the byte count.
    /// Zero means nothing arrived before the device timeout
    fn read_packet(&self, buf: &mut [u8]) -> Result<usize, AdapterError>;

    /// Stable device identity
    fn serial(&self) -> &str;

    /// Release the device; later reads and writes fail
    fn close(&self);
}

/// What appeared and disappeared between two scans
#[derive(Clone, Debug)]
pub struct Delta<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
}

impl<T> Delta<T> {
    pub fn new() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// Merge another delta. Duplicates are not resolved
    pub fn extend(&mut self, other: Delta<T>) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
    }
}

impl<T> Default for Delta<T> {
    fn default() -> Self {
        Self::new()
    }
}
