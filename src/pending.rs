//! Request/response correlation.
//!
//! Responses come back tagged with the sequence number of the frame that
//! provoked them; this table hands each sender a slot that resolves when
//! the matching inbound message arrives.

use log::warn;
use tokio::sync::oneshot;

use crate::error::DaliError;
use crate::message::{Message, MessageBody};

/// What a completed request resolves to. `None` means no gear answered,
/// which is a valid outcome for queries
pub type Reply = Result<Option<u8>, DaliError>;

pub(crate) struct PendingTable {
    next_sequence: u8,
    slots: Vec<Option<oneshot::Sender<Reply>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            slots: (0..256).map(|_| None).collect(),
        }
    }

    /// Allocate the next sequence number, wrapping 1..=255. Zero is
    /// reserved for traffic originated by other bus masters
    pub fn next_seq(&mut self) -> u8 {
        let seq = self.next_sequence;
        self.next_sequence = if seq == 255 { 1 } else { seq + 1 };
        seq
    }

    /// Register a pending request. This must happen before the frame bytes
    /// reach the adapter, so the response cannot race the registration
    pub fn insert(&mut self, seq: u8, tx: oneshot::Sender<Reply>) {
        if self.slots[seq as usize].replace(tx).is_some() {
            // 255 sends have passed without this one resolving, the old
            // occupant can only be a cancelled await
            warn!("Sequence {} reallocated while pending", seq);
        }
    }

    /// Feed an inbound message through the correlation rules. Numeric
    /// responses and NAKs resolve, an attributed framing error rejects,
    /// anything else (command echoes, tx-complete) leaves the slot pending
    pub fn handle(&mut self, msg: &Message) {
        if msg.sequence == 0 {
            return;
        }

        let reply = match msg.body {
            MessageBody::NumericResponse(value) => Ok(Some(value)),
            MessageBody::Nak => Ok(None),
            MessageBody::FramingError => Err(DaliError::Framing),
            _ => return,
        };

        self.resolve(msg.sequence, reply);
    }

    fn resolve(&mut self, seq: u8, reply: Reply) {
        if let Some(tx) = self.slots[seq as usize].take() {
            // Fails only when the caller dropped its await; a late reply
            // against a cancelled slot is discarded silently
            let _ = tx.send(reply);
        }
    }

    /// Drop a registration whose frame never reached the adapter
    pub fn remove(&mut self, seq: u8) {
        self.slots[seq as usize] = None;
    }

    /// Reject every outstanding request, used when the driver closes
    pub fn reject_all(&mut self, err: DaliError) {
        for slot in self.slots.iter_mut() {
            if let Some(tx) = slot.take() {
                let _ = tx.send(Err(err.clone()));
            }
        }
    }

    #[cfg(test)]
    pub fn outstanding(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}
