//! Property-based tests for cumulative acknowledgment and frame decoding.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use tidewire_transport::session::seq::{seq_le, SEQ_MAX_DIFF};
use tidewire_transport::session::{Packet, PacketQueue};
use tidewire_transport::wire::Frame;

proptest! {
    /// `ack(b)` removes the packets at or below `b`, plus those more than
    /// 32767 above it (wrapped), and keeps the rest in append order.
    #[test]
    fn ack_prunes_exactly_the_serial_prefix(
        seqs in prop::collection::btree_set(any::<u16>(), 0..64),
        ack in any::<u16>(),
    ) {
        let queue = PacketQueue::new();
        for &s in &seqs {
            queue.add_packet(Packet::new(s, Bytes::new())).unwrap();
        }

        let found = queue.ack(ack);
        prop_assert_eq!(found, seqs.contains(&ack));

        let expected: Vec<u16> = seqs
            .iter()
            .copied()
            .filter(|&s| s > ack && s - ack <= 32767)
            .collect();
        let remaining: Vec<u16> = queue.pending().iter().map(|p| p.sequence).collect();
        prop_assert_eq!(remaining, expected);
    }

    #[test]
    fn ack_is_idempotent(seqs in prop::collection::btree_set(any::<u16>(), 0..32), ack in any::<u16>()) {
        let queue = PacketQueue::new();
        for &s in &seqs {
            queue.add_packet(Packet::new(s, Bytes::new())).unwrap();
        }
        queue.ack(ack);
        let after_first = queue.len();
        prop_assert!(!queue.ack(ack));
        prop_assert_eq!(queue.len(), after_first);
    }

    /// Stepping forward by up to half the space never goes "backwards",
    /// wrapped or not.
    #[test]
    fn advancing_sequence_is_never_behind(a in any::<u16>(), d in 0u16..=SEQ_MAX_DIFF) {
        prop_assert!(seq_le(a, a.wrapping_add(d)));
    }

    /// Without wraparound inside the window, order is strict.
    #[test]
    fn unwrapped_window_is_antisymmetric(a in 0u16..=32768, d in 1u16..=SEQ_MAX_DIFF) {
        let b = a + d.min(u16::MAX - a);
        prop_assume!(b != a);
        prop_assert!(seq_le(a, b));
        prop_assert!(!seq_le(b, a));
    }

    /// Arbitrary input either yields frames, waits for more bytes, or errors;
    /// a partial frame is never consumed.
    #[test]
    fn decode_never_consumes_partial_frames(input in prop::collection::vec(any::<u8>(), 0..64)) {
        let mut buf = BytesMut::from(&input[..]);
        loop {
            let before = buf.len();
            match Frame::decode(&mut buf) {
                Ok(Some(frame)) => prop_assert_eq!(before - buf.len(), frame.encoded_len()),
                Ok(None) => {
                    prop_assert_eq!(buf.len(), before);
                    break;
                }
                Err(_) => break,
            }
        }
    }

    /// A stream of frames split at arbitrary points decodes to the same frames.
    #[test]
    fn streamed_frames_survive_arbitrary_splits(
        acks in prop::collection::vec(any::<u16>(), 1..8),
        cut in 1usize..16,
    ) {
        let frames: Vec<Frame> = acks
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                if i % 2 == 0 {
                    Frame::Ack { sequence: s }
                } else {
                    Frame::Data(Packet::new(s, Bytes::from(vec![i as u8; i])))
                }
            })
            .collect();
        let mut wire = BytesMut::new();
        for f in &frames {
            f.encode(&mut wire).unwrap();
        }

        let mut pending = BytesMut::new();
        let mut decoded = Vec::new();
        for chunk in wire.chunks(cut) {
            pending.extend_from_slice(chunk);
            while let Some(frame) = Frame::decode(&mut pending).unwrap() {
                decoded.push(frame);
            }
        }
        prop_assert!(pending.is_empty());
        prop_assert_eq!(decoded, frames);
    }
}
