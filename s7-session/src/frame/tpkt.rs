//! TPKT envelope (RFC 1006)
//!
//! ```text
//! +---------+----------+----------------+---------------
//! | version | reserved | length (BE u16)| COTP TPDU ...
//! |  0x03   |   0x00   | incl. header   |
//! +---------+----------+----------------+---------------
//! ```

use crate::error::{S7Error, S7Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const TPKT_HEADER_LENGTH: usize = 4;
pub const TPKT_VERSION: u8 = 0x03;

/// Smallest valid frame: header plus the 3-byte COTP data TPDU header
pub const TPKT_MIN_FRAME_LENGTH: usize = TPKT_HEADER_LENGTH + 3;

/// TPKT frame codec
///
/// Decoding yields the COTP TPDU carried by exactly one frame and leaves any
/// following bytes in the buffer. A partial frame yields `Ok(None)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TpktCodec;

impl TpktCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for TpktCodec {
    type Item = BytesMut;
    type Error = S7Error;

    fn decode(&mut self, src: &mut BytesMut) -> S7Result<Option<BytesMut>> {
        if src.len() < TPKT_HEADER_LENGTH {
            return Ok(None);
        }
        if src[0] != TPKT_VERSION || src[1] != 0x00 {
            return Err(S7Error::FrameInvalid(format!(
                "Invalid TPKT header {:02X} {:02X}",
                src[0], src[1]
            )));
        }
        let length = u16::from_be_bytes([src[2], src[3]]) as usize;
        if length < TPKT_MIN_FRAME_LENGTH {
            return Err(S7Error::FrameInvalid(format!(
                "TPKT length {} shorter than minimum {}",
                length, TPKT_MIN_FRAME_LENGTH
            )));
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }
        let mut frame = src.split_to(length);
        let _ = frame.split_to(TPKT_HEADER_LENGTH);
        Ok(Some(frame))
    }
}

impl Encoder<Bytes> for TpktCodec {
    type Error = S7Error;

    fn encode(&mut self, tpdu: Bytes, dst: &mut BytesMut) -> S7Result<()> {
        let total = tpdu.len() + TPKT_HEADER_LENGTH;
        let length = u16::try_from(total).map_err(|_| {
            S7Error::InvalidData(format!("Frame of {} bytes exceeds the TPKT limit", total))
        })?;
        dst.reserve(total);
        dst.put_u8(TPKT_VERSION);
        dst.put_u8(0x00);
        dst.put_u16(length);
        dst.put_slice(&tpdu);
        Ok(())
    }
}
