

pub use crate::{Adapter, Delta};

pub use crate::address::Address;

pub use crate::error::{AdapterError, DaliError, DecodeError};

pub use crate::bus::{scan_for_transceivers, BusConfig, CallbackId, Transceiver};
pub use crate::command::{CommandCode, SpecialCommandCode};
pub use crate::frame::{Repeat, TxFrame};

pub use crate::gear::{Fade, Gear, GearRef, GearStatus, GearType, Group, GroupRef};
pub use crate::message::{Message, MessageBody, MessageSource};
pub use crate::productdb::{ProductInfoSource, ProductRecord};

pub use crate::tridonic::TridonicAdapter;
