//! Wrapper framing handler
//!
//! Prefixes every TPKT frame with an 8-byte header for gateways that tunnel
//! ISO-on-TCP through a port-addressed wrapper.

use crate::error::{S7Error, S7Result};
use crate::handler::UpperProtocolHandler;
use bytes::{BufMut, Bytes, BytesMut};

/// Wrapper header length
pub const WRAPPER_HEADER_LENGTH: usize = 8;

const WRAPPER_VERSION: u16 = 0x0001;

/// Wrapper header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapperHeader {
    source_port: u16,
    destination_port: u16,
    length: u16,
}

impl WrapperHeader {
    pub fn new(source_port: u16, destination_port: u16, length: u16) -> Self {
        Self {
            source_port,
            destination_port,
            length,
        }
    }

    /// Encode header to bytes (big-endian)
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u16(WRAPPER_VERSION);
        dst.put_u16(self.source_port);
        dst.put_u16(self.destination_port);
        dst.put_u16(self.length);
    }

    /// Decode header from bytes
    pub fn decode(data: &[u8]) -> S7Result<Self> {
        if data.len() < WRAPPER_HEADER_LENGTH {
            return Err(S7Error::FrameInvalid(format!(
                "Wrapper header too short: expected {}, got {}",
                WRAPPER_HEADER_LENGTH,
                data.len()
            )));
        }
        let version = u16::from_be_bytes([data[0], data[1]]);
        if version != WRAPPER_VERSION {
            return Err(S7Error::FrameInvalid(format!(
                "Wrapper header version was {}, only version 1 is supported",
                version
            )));
        }
        Ok(Self {
            source_port: u16::from_be_bytes([data[2], data[3]]),
            destination_port: u16::from_be_bytes([data[4], data[5]]),
            length: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    pub fn source_port(&self) -> u16 {
        self.source_port
    }

    pub fn destination_port(&self) -> u16 {
        self.destination_port
    }

    /// Get payload length
    pub fn payload_length(&self) -> u16 {
        self.length
    }
}

/// Upper protocol handler adding and stripping wrapper headers
#[derive(Debug, Clone)]
pub struct WrapperHandler {
    source_port: u16,
    destination_port: u16,
}

impl WrapperHandler {
    pub fn new(source_port: u16, destination_port: u16) -> Self {
        Self {
            source_port,
            destination_port,
        }
    }
}

impl UpperProtocolHandler for WrapperHandler {
    fn add_frame(&mut self, frame: Bytes) -> S7Result<Bytes> {
        let length = u16::try_from(frame.len()).map_err(|_| {
            S7Error::InvalidData(format!("Frame of {} bytes too long for wrapper", frame.len()))
        })?;
        let mut dst = BytesMut::with_capacity(WRAPPER_HEADER_LENGTH + frame.len());
        WrapperHeader::new(self.source_port, self.destination_port, length).encode(&mut dst);
        dst.put_slice(&frame);
        Ok(dst.freeze())
    }

    fn remove_frame(&mut self, src: &mut BytesMut) -> S7Result<Option<BytesMut>> {
        if src.len() < WRAPPER_HEADER_LENGTH {
            return Ok(None);
        }
        let header = WrapperHeader::decode(&src[..WRAPPER_HEADER_LENGTH])?;
        // Replies travel the other way
        if header.destination_port() != self.source_port {
            log::warn!(
                "Wrapper frame addressed to port {}, expected {}",
                header.destination_port(),
                self.source_port
            );
        }
        let total = WRAPPER_HEADER_LENGTH + header.payload_length() as usize;
        if src.len() < total {
            return Ok(None);
        }
        let mut frame = src.split_to(total);
        Ok(Some(frame.split_off(WRAPPER_HEADER_LENGTH)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapper_header_encode_decode() {
        let mut buf = BytesMut::new();
        WrapperHeader::new(0x0010, 0x0001, 100).encode(&mut buf);
        assert_eq!(buf.len(), WRAPPER_HEADER_LENGTH);
        assert_eq!(&buf[..2], &[0x00, 0x01]);

        let decoded = WrapperHeader::decode(&buf).unwrap();
        assert_eq!(decoded.source_port(), 0x0010);
        assert_eq!(decoded.destination_port(), 0x0001);
        assert_eq!(decoded.payload_length(), 100);
    }

    #[test]
    fn test_handler_frames_and_unframes() {
        let mut client = WrapperHandler::new(0x10, 0x01);
        let mut server = WrapperHandler::new(0x01, 0x10);

        let wrapped = client.add_frame(Bytes::from_static(&[0xAA, 0xBB, 0xCC])).unwrap();
        assert_eq!(wrapped.len(), WRAPPER_HEADER_LENGTH + 3);

        let mut src = BytesMut::from(&wrapped[..5]);
        assert!(server.remove_frame(&mut src).unwrap().is_none());
        src.extend_from_slice(&wrapped[5..]);
        src.extend_from_slice(&wrapped[..2]);
        assert_eq!(&server.remove_frame(&mut src).unwrap().unwrap()[..], &[0xAA, 0xBB, 0xCC]);
        assert_eq!(src.len(), 2);
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut handler = WrapperHandler::new(1, 2);
        let mut src = BytesMut::from(&[0x00, 0x02, 0, 1, 0, 2, 0, 0][..]);
        assert!(handler.remove_frame(&mut src).is_err());
    }
}
