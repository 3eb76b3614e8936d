//! # Tidewire Wire Format
//!
//! Minimal framing for sequence-numbered packets over a byte stream.
//!
//! ## Frame (5-byte header + payload)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Kind      |        Sequence (16)          |  Length (hi)  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Length (lo)  |            Payload ...                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Kind `0` carries a data packet, kind `1` acknowledges every packet up to and
//! including `Sequence` and has no payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::session::Packet;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Header size: 1 (kind) + 2 (sequence) + 2 (length).
pub const HEADER_SIZE: usize = 5;

/// Maximum payload in a single frame (64 KiB - 1).
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

const KIND_DATA: u8 = 0;
const KIND_ACK: u8 = 1;

// ─── Frame ───────────────────────────────────────────────────────────────────

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Sequenced application payload.
    Data(Packet),
    /// Cumulative acknowledgment up to `sequence`.
    Ack { sequence: u16 },
}

impl Frame {
    /// Bytes this frame occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        match self {
            Frame::Data(packet) => HEADER_SIZE + packet.payload.len(),
            Frame::Ack { .. } => HEADER_SIZE,
        }
    }

    /// Append the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        match self {
            Frame::Data(packet) => {
                let len = packet.payload.len();
                if len > MAX_PAYLOAD_LEN {
                    return Err(WireError::PayloadTooLarge(len));
                }
                buf.reserve(HEADER_SIZE + len);
                buf.put_u8(KIND_DATA);
                buf.put_u16(packet.sequence);
                buf.put_u16(len as u16);
                buf.put_slice(&packet.payload);
            }
            Frame::Ack { sequence } => {
                buf.reserve(HEADER_SIZE);
                buf.put_u8(KIND_ACK);
                buf.put_u16(*sequence);
                buf.put_u16(0);
            }
        }
        Ok(())
    }

    /// Encode into a standalone buffer.
    pub fn to_bytes(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when it holds only part of
    /// a frame. On error the offending header is left in place; the stream is
    /// unrecoverable at that point.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let kind = buf[0];
        let sequence = u16::from_be_bytes([buf[1], buf[2]]);
        let len = u16::from_be_bytes([buf[3], buf[4]]);

        match kind {
            KIND_DATA => {
                let total = HEADER_SIZE + len as usize;
                if buf.len() < total {
                    return Ok(None);
                }
                buf.advance(HEADER_SIZE);
                let payload = buf.split_to(len as usize).freeze();
                Ok(Some(Frame::Data(Packet::new(sequence, payload))))
            }
            KIND_ACK => {
                if len != 0 {
                    return Err(WireError::AckWithBody(len));
                }
                buf.advance(HEADER_SIZE);
                Ok(Some(Frame::Ack { sequence }))
            }
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_layout() {
        let frame = Frame::Data(Packet::new(0x1234, Bytes::from_static(b"hi")));
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(&bytes[..], &[0x00, 0x12, 0x34, 0x00, 0x02, b'h', b'i']);
        assert_eq!(frame.encoded_len(), bytes.len());
    }

    #[test]
    fn ack_frame_layout() {
        let bytes = Frame::Ack { sequence: 0xFFFF }.to_bytes().unwrap();
        assert_eq!(&bytes[..], &[0x01, 0xFF, 0xFF, 0x00, 0x00]);
    }

    #[test]
    fn partial_frame_waits() {
        let full = Frame::Data(Packet::new(7, Bytes::from_static(b"payload")))
            .to_bytes()
            .unwrap();

        let mut buf = BytesMut::from(&full[..3]);
        assert_eq!(Frame::decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 3, "partial header must not be consumed");

        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        assert_eq!(Frame::decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), full.len() - 1);
    }

    #[test]
    fn back_to_back_frames() {
        let mut buf = BytesMut::new();
        Frame::Data(Packet::new(1, Bytes::from_static(b"a")))
            .encode(&mut buf)
            .unwrap();
        Frame::Ack { sequence: 1 }.encode(&mut buf).unwrap();
        buf.extend_from_slice(&[0x00, 0x00]); // start of a third frame

        let first = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, Frame::Data(Packet::new(1, Bytes::from_static(b"a"))));
        let second = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(second, Frame::Ack { sequence: 1 });
        assert_eq!(Frame::decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn unknown_kind_rejected() {
        let mut buf = BytesMut::from(&[0x09, 0, 0, 0, 0][..]);
        assert_eq!(Frame::decode(&mut buf), Err(WireError::UnknownKind(0x09)));
    }

    #[test]
    fn ack_with_body_rejected() {
        let mut buf = BytesMut::from(&[0x01, 0, 5, 0, 3, 1, 2, 3][..]);
        assert_eq!(Frame::decode(&mut buf), Err(WireError::AckWithBody(3)));
    }

    #[test]
    fn oversized_payload_rejected() {
        let payload = Bytes::from(vec![0u8; MAX_PAYLOAD_LEN + 1]);
        let frame = Frame::Data(Packet::new(0, payload));
        let mut buf = BytesMut::new();
        assert_eq!(
            frame.encode(&mut buf),
            Err(WireError::PayloadTooLarge(MAX_PAYLOAD_LEN + 1))
        );
        assert!(buf.is_empty());
    }
}
