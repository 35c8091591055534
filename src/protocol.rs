//! Framing codec for the length-prefixed wire format.
//!
//! Every frame starts with a fixed 8-byte little-endian header:
//!
//! ```text
//! offset 0..3 : payload length (u32)
//! offset 4..7 : message kind   (u32)
//! offset 8..  : payload (length bytes)
//! ```
//!
//! The codec only ever looks at the header. Reading the payload is left to
//! the caller, who knows the length once the header has been decoded and
//! checked against the configured maximum.

use crate::error::{Error, Result};
use crate::message::Message;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Number of payload bytes following the header.
    pub length: u32,
    /// Message kind used for routing.
    pub kind: u32,
}

/// Stateless frame encoder/decoder.
///
/// Only carries the maximum packet size, so it is `Copy` and shared by every
/// connection without synchronization.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataPack {
    /// Largest accepted payload length (0 = unlimited).
    max_packet_size: u32,
}

impl DataPack {
    pub fn new(max_packet_size: u32) -> Self {
        Self { max_packet_size }
    }

    pub fn header_len(&self) -> usize {
        HEADER_LEN
    }

    pub fn max_packet_size(&self) -> u32 {
        self.max_packet_size
    }

    /// Serialize `payload` into a complete frame tagged with `kind`.
    pub fn encode(&self, kind: u32, payload: &[u8]) -> Result<Bytes> {
        let length =
            u32::try_from(payload.len()).map_err(|_| Error::PayloadTooLarge(payload.len()))?;

        let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
        frame.put_u32_le(length);
        frame.put_u32_le(kind);
        frame.put_slice(payload);
        Ok(frame.freeze())
    }

    pub fn encode_message(&self, message: &Message) -> Result<Bytes> {
        self.encode(message.kind(), message.payload())
    }

    /// Decode a frame header.
    ///
    /// Fails if the declared length exceeds the configured maximum, before
    /// the caller allocates or reads anything for the payload.
    pub fn decode(&self, header: &[u8]) -> Result<Header> {
        if header.len() < HEADER_LEN {
            return Err(Error::ShortHeader {
                expected: HEADER_LEN,
                actual: header.len(),
            });
        }

        let mut buf = &header[..HEADER_LEN];
        let length = buf.get_u32_le();
        let kind = buf.get_u32_le();

        if self.max_packet_size > 0 && length > self.max_packet_size {
            return Err(Error::PacketTooLarge {
                length,
                max: self.max_packet_size,
            });
        }

        Ok(Header { length, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let pack = DataPack::new(0);
        let frame = pack.encode(0x0102_0304, b"abc").unwrap();

        assert_eq!(frame.len(), HEADER_LEN + 3);
        assert_eq!(&frame[..4], &[3, 0, 0, 0]);
        assert_eq!(&frame[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&frame[8..], b"abc");
    }

    #[test]
    fn test_round_trip() {
        let pack = DataPack::new(1024);
        let frame = pack.encode(7, b"hello world").unwrap();

        let header = pack.decode(&frame[..HEADER_LEN]).unwrap();
        assert_eq!(header, Header { length: 11, kind: 7 });

        let payload = &frame[HEADER_LEN..HEADER_LEN + header.length as usize];
        assert_eq!(payload, b"hello world");
    }

    #[test]
    fn test_empty_payload() {
        let pack = DataPack::default();
        let frame = pack.encode(3, &[]).unwrap();
        assert_eq!(frame.len(), HEADER_LEN);

        let header = pack.decode(&frame).unwrap();
        assert_eq!(header.length, 0);
        assert_eq!(header.kind, 3);
    }

    #[test]
    fn test_short_header() {
        let pack = DataPack::default();
        match pack.decode(&[1, 0, 0]) {
            Err(Error::ShortHeader { expected, actual }) => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let pack = DataPack::new(1024);
        let mut header = Vec::new();
        header.extend_from_slice(&5_000_000u32.to_le_bytes());
        header.extend_from_slice(&1u32.to_le_bytes());

        match pack.decode(&header) {
            Err(Error::PacketTooLarge { length, max }) => {
                assert_eq!(length, 5_000_000);
                assert_eq!(max, 1024);
            }
            other => panic!("unexpected: {:?}", other),
        }

        // Exactly at the limit is fine
        let at_limit = pack.encode(1, &vec![0u8; 1024]).unwrap();
        assert!(pack.decode(&at_limit[..HEADER_LEN]).is_ok());
    }

    #[test]
    fn test_zero_max_is_unlimited() {
        let pack = DataPack::new(0);
        let mut header = Vec::new();
        header.extend_from_slice(&u32::MAX.to_le_bytes());
        header.extend_from_slice(&9u32.to_le_bytes());

        let decoded = pack.decode(&header).unwrap();
        assert_eq!(decoded.length, u32::MAX);
        assert_eq!(decoded.kind, 9);
    }

    #[test]
    fn test_encode_message() {
        let pack = DataPack::default();
        let message = Message::new(2, Bytes::from_static(b"ping")).unwrap();
        let frame = pack.encode_message(&message).unwrap();
        assert_eq!(frame, pack.encode(2, b"ping").unwrap());
    }
}
