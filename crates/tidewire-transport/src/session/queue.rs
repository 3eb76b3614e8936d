//! # Packet Queue
//!
//! Per-session store of sent-but-unacknowledged packets, kept in append
//! order. Acknowledgments are cumulative: `ack(n)` prunes every packet at or
//! before `n` in wrapping sequence order.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::session::seq::{seq_distance, seq_le, SEQ_QUARTER};

// ─── Packet ──────────────────────────────────────────────────────────────────

/// A sequence-numbered payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence: u16,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence: u16, payload: Bytes) -> Self {
        Packet { sequence, payload }
    }
}

// ─── PacketQueue ─────────────────────────────────────────────────────────────

/// Retransmission-candidate queue keyed by 16-bit wrapping sequence.
///
/// Holds at most one packet per sequence value. Every operation takes the
/// queue's own lock, so a queue can be shared between the pump thread and
/// whatever layer decides to resend.
#[derive(Debug, Default)]
pub struct PacketQueue {
    packets: Mutex<VecDeque<Packet>>,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Packet>> {
        self.packets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a packet. Refused if a packet with the same sequence is queued.
    pub fn add_packet(&self, packet: Packet) -> Result<(), SessionError> {
        let mut packets = self.lock();
        if packets.iter().any(|p| p.sequence == packet.sequence) {
            return Err(SessionError::DuplicateSequence(packet.sequence));
        }
        packets.push_back(packet);
        Ok(())
    }

    /// Acknowledge `sequence`: drop every packet at or before it.
    ///
    /// Returns whether a packet with exactly `sequence` was present.
    pub fn ack(&self, sequence: u16) -> bool {
        let mut packets = self.lock();
        let mut found = false;
        let mut widest = 0u16;
        let before = packets.len();

        packets.retain(|p| {
            if seq_le(p.sequence, sequence) {
                found |= p.sequence == sequence;
                widest = widest.max(seq_distance(p.sequence, sequence));
                false
            } else {
                true
            }
        });

        let pruned = before - packets.len();
        if widest >= SEQ_QUARTER {
            warn!(
                ack = sequence,
                window = widest,
                "ack spans more than a quarter of the sequence space"
            );
        }
        if pruned > 0 {
            debug!(ack = sequence, pruned, remaining = packets.len(), "packets acknowledged");
        }
        found
    }

    /// Linear scan for the packet carrying `sequence`.
    pub fn get_packet(&self, sequence: u16) -> Option<Packet> {
        self.lock().iter().find(|p| p.sequence == sequence).cloned()
    }

    /// Oldest unacknowledged packet.
    pub fn front(&self) -> Option<Packet> {
        self.lock().front().cloned()
    }

    /// Snapshot of queued packets in append order.
    pub fn pending(&self) -> Vec<Packet> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop everything, returning the discarded count.
    pub fn clear(&self) -> usize {
        let mut packets = self.lock();
        let n = packets.len();
        packets.clear();
        n
    }
}
