//! XBee API frame codec (API mode 1, no escaping).
//!
//! ```text
//! 0x7E | len_hi len_lo | frame data (len bytes) | checksum
//! checksum = 0xFF - (sum(frame data) & 0xFF)
//! ```
//!
//! Only receive packets carry sensor payloads:
//!
//! | type | layout after the type byte                  |
//! |------|---------------------------------------------|
//! | 0x90 | src64(8) src16(2) options(1) data           |
//! | 0x80 | src64(8) rssi(1) options(1) data            |
//!
//! Other frame types (modem status, TX status, AT responses) are skipped.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Frame start delimiter.
pub const START_DELIMITER: u8 = 0x7E;
/// ZigBee receive packet.
pub const FRAME_RX_PACKET: u8 = 0x90;
/// Legacy 64-bit address receive packet.
pub const FRAME_RX_64: u8 = 0x80;

/// Largest frame data length accepted. Radios deliver at most a few hundred
/// bytes, so anything longer is a corrupt length field.
pub const MAX_FRAME_LEN: usize = 0x200;

const HEADER_LEN: usize = 3;

/// A payload received from a radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioFrame {
    /// 64-bit source address.
    pub source: u64,
    /// Application payload.
    pub payload: Bytes,
}

impl RadioFrame {
    /// Source address as 16 upper-case hex digits, the registry's mac format.
    pub fn source_hex(&self) -> String {
        format!("{:016X}", self.source)
    }
}

fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0xFF - sum
}

/// Tokio codec for XBee API frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct XBeeCodec;

impl XBeeCodec {
    fn parse(data: &[u8]) -> Option<RadioFrame> {
        let (header_len, min_len) = match data.first()? {
            &FRAME_RX_PACKET => (1 + 8 + 2 + 1, 12),
            &FRAME_RX_64 => (1 + 8 + 1 + 1, 11),
            other => {
                tracing::trace!(frame_type = format!("0x{other:02X}"), "Skipping frame");
                return None;
            }
        };
        if data.len() < min_len {
            tracing::debug!(len = data.len(), "Receive frame too short");
            return None;
        }

        let mut source = [0u8; 8];
        source.copy_from_slice(&data[1..9]);

        Some(RadioFrame {
            source: u64::from_be_bytes(source),
            payload: Bytes::copy_from_slice(&data[header_len..]),
        })
    }
}

impl Decoder for XBeeCodec {
    type Item = RadioFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Discard anything before the next delimiter.
            match src.iter().position(|b| *b == START_DELIMITER) {
                Some(0) => {}
                Some(skip) => {
                    tracing::debug!(bytes = skip, "Discarding bytes before frame delimiter");
                    src.advance(skip);
                }
                None => {
                    src.clear();
                    return Ok(None);
                }
            }

            if src.len() < HEADER_LEN {
                return Ok(None);
            }

            let len = usize::from(u16::from_be_bytes([src[1], src[2]]));
            if len > MAX_FRAME_LEN {
                tracing::warn!(len, "Implausible frame length, resynchronizing");
                src.advance(1);
                continue;
            }
            let total = HEADER_LEN + len + 1;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            let data = &src[HEADER_LEN..HEADER_LEN + len];
            let expected = checksum(data);
            let actual = src[total - 1];
            if expected != actual {
                tracing::warn!(
                    expected = format!("0x{expected:02X}"),
                    actual = format!("0x{actual:02X}"),
                    "Bad frame checksum, resynchronizing"
                );
                // Step past this delimiter; the real frame may start inside.
                src.advance(1);
                continue;
            }

            let frame = src.split_to(total);
            if let Some(frame) = Self::parse(&frame[HEADER_LEN..HEADER_LEN + len]) {
                return Ok(Some(frame));
            }
        }
    }
}

impl Encoder<RadioFrame> for XBeeCodec {
    type Error = io::Error;

    /// Encode as a 0x90 receive packet, as a coordinator would emit it.
    fn encode(&mut self, item: RadioFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = 1 + 8 + 2 + 1 + item.payload.len();
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "payload too large"));
        }
        let len = len as u16;

        let mut data = BytesMut::with_capacity(usize::from(len));
        data.put_u8(FRAME_RX_PACKET);
        data.put_u64(item.source);
        data.put_u16(0xFFFE);
        data.put_u8(0x01);
        data.put_slice(&item.payload);

        dst.reserve(HEADER_LEN + data.len() + 1);
        dst.put_u8(START_DELIMITER);
        dst.put_u16(len);
        dst.put_slice(&data);
        dst.put_u8(checksum(&data));
        Ok(())
    }
}
