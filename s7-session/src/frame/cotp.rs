//! COTP (ISO 8073 class 0) TPDUs
//!
//! Only the TPDUs used on an ISO-on-TCP connection are modelled: connection
//! request/confirm, disconnect request/confirm, error and data.

use crate::error::{S7Error, S7Result};
use bytes::{BufMut, Bytes, BytesMut};
use s7_core::Tsap;

const TPDU_CR: u8 = 0xE0;
const TPDU_CC: u8 = 0xD0;
const TPDU_DR: u8 = 0x80;
const TPDU_DC: u8 = 0xC0;
const TPDU_ER: u8 = 0x70;
const TPDU_DT: u8 = 0xF0;

const PARAM_TPDU_SIZE: u8 = 0xC0;
const PARAM_CALLING_TSAP: u8 = 0xC1;
const PARAM_CALLED_TSAP: u8 = 0xC2;

const EOT_FLAG: u8 = 0x80;

/// TPDU size code for 1024 byte TPDUs (2^10)
pub const TPDU_SIZE_1024: u8 = 0x0A;

/// Header length of a data TPDU (LI, type, EOT/number)
pub const DT_HEADER_LENGTH: usize = 3;

/// Fixed part and parameters of a CR or CC TPDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CotpConnection {
    pub dst_ref: u16,
    pub src_ref: u16,
    pub class: u8,
    /// TPDU size code, the size is `1 << code`
    pub tpdu_size: Option<u8>,
    pub calling_tsap: Option<Tsap>,
    pub called_tsap: Option<Tsap>,
}

impl CotpConnection {
    /// Connection request parameters of a client
    pub fn request(src_ref: u16, calling: Tsap, called: Tsap) -> Self {
        Self {
            dst_ref: 0,
            src_ref,
            class: 0,
            tpdu_size: Some(TPDU_SIZE_1024),
            calling_tsap: Some(calling),
            called_tsap: Some(called),
        }
    }

    /// Negotiated TPDU size in bytes, if announced
    pub fn tpdu_size_bytes(&self) -> Option<usize> {
        self.tpdu_size
            .filter(|code| (7..=13).contains(code))
            .map(|code| 1usize << code)
    }

    fn encode(&self, kind: u8, dst: &mut BytesMut) {
        let mut params = BytesMut::with_capacity(11);
        if let Some(size) = self.tpdu_size {
            params.put_slice(&[PARAM_TPDU_SIZE, 0x01, size]);
        }
        if let Some(tsap) = self.calling_tsap {
            params.put_slice(&[PARAM_CALLING_TSAP, 0x02]);
            params.put_slice(&tsap.to_be_bytes());
        }
        if let Some(tsap) = self.called_tsap {
            params.put_slice(&[PARAM_CALLED_TSAP, 0x02]);
            params.put_slice(&tsap.to_be_bytes());
        }
        // LI counts everything after itself
        dst.put_u8((6 + params.len()) as u8);
        dst.put_u8(kind);
        dst.put_u16(self.dst_ref);
        dst.put_u16(self.src_ref);
        dst.put_u8(self.class << 4);
        dst.put_slice(&params);
    }

    fn decode(header: &[u8]) -> S7Result<Self> {
        if header.len() < 7 {
            return Err(S7Error::FrameInvalid(format!(
                "COTP connection TPDU too short: {} bytes",
                header.len()
            )));
        }
        let mut connection = Self {
            dst_ref: u16::from_be_bytes([header[2], header[3]]),
            src_ref: u16::from_be_bytes([header[4], header[5]]),
            class: header[6] >> 4,
            tpdu_size: None,
            calling_tsap: None,
            called_tsap: None,
        };

        let mut params = &header[7..];
        while !params.is_empty() {
            if params.len() < 2 || params.len() < 2 + params[1] as usize {
                return Err(S7Error::FrameInvalid(
                    "Truncated COTP parameter".to_string(),
                ));
            }
            let (code, len) = (params[0], params[1] as usize);
            let value = &params[2..2 + len];
            match (code, len) {
                (PARAM_TPDU_SIZE, 1) => connection.tpdu_size = Some(value[0]),
                (PARAM_CALLING_TSAP, 2) => {
                    connection.calling_tsap = Some(Tsap(u16::from_be_bytes([value[0], value[1]])))
                }
                (PARAM_CALLED_TSAP, 2) => {
                    connection.called_tsap = Some(Tsap(u16::from_be_bytes([value[0], value[1]])))
                }
                _ => log::trace!("Skipping COTP parameter 0x{:02X} ({} bytes)", code, len),
            }
            params = &params[2 + len..];
        }
        Ok(connection)
    }
}

/// A COTP TPDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CotpPdu {
    ConnectionRequest(CotpConnection),
    ConnectionConfirm(CotpConnection),
    DisconnectRequest { dst_ref: u16, src_ref: u16, reason: u8 },
    DisconnectConfirm { dst_ref: u16, src_ref: u16 },
    Error { dst_ref: u16, cause: u8 },
    /// Data TPDU; `eot` marks the last segment of a user PDU
    Data { eot: bool, payload: Bytes },
}

impl CotpPdu {
    /// Data TPDU carrying a complete user PDU
    pub fn data(payload: Bytes) -> Self {
        CotpPdu::Data { eot: true, payload }
    }

    /// Encode the TPDU (without TPKT header)
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(32);
        match self {
            CotpPdu::ConnectionRequest(c) => c.encode(TPDU_CR, &mut dst),
            CotpPdu::ConnectionConfirm(c) => c.encode(TPDU_CC, &mut dst),
            CotpPdu::DisconnectRequest { dst_ref, src_ref, reason } => {
                dst.put_u8(6);
                dst.put_u8(TPDU_DR);
                dst.put_u16(*dst_ref);
                dst.put_u16(*src_ref);
                dst.put_u8(*reason);
            }
            CotpPdu::DisconnectConfirm { dst_ref, src_ref } => {
                dst.put_u8(5);
                dst.put_u8(TPDU_DC);
                dst.put_u16(*dst_ref);
                dst.put_u16(*src_ref);
            }
            CotpPdu::Error { dst_ref, cause } => {
                dst.put_u8(4);
                dst.put_u8(TPDU_ER);
                dst.put_u16(*dst_ref);
                dst.put_u8(*cause);
            }
            CotpPdu::Data { eot, payload } => {
                dst.reserve(DT_HEADER_LENGTH + payload.len());
                dst.put_u8(2);
                dst.put_u8(TPDU_DT);
                dst.put_u8(if *eot { EOT_FLAG } else { 0x00 });
                dst.put_slice(payload);
            }
        }
        dst.freeze()
    }

    /// Decode one TPDU as extracted by the TPKT codec
    pub fn decode(tpdu: BytesMut) -> S7Result<Self> {
        if tpdu.len() < 2 {
            return Err(S7Error::FrameInvalid(format!(
                "COTP TPDU too short: {} bytes",
                tpdu.len()
            )));
        }
        let header_len = tpdu[0] as usize + 1;
        if header_len > tpdu.len() {
            return Err(S7Error::FrameInvalid(format!(
                "COTP length indicator {} exceeds TPDU of {} bytes",
                tpdu[0],
                tpdu.len()
            )));
        }
        if tpdu[1] & 0xF0 == TPDU_DT {
            if header_len < DT_HEADER_LENGTH {
                return Err(S7Error::FrameInvalid("Truncated COTP data header".to_string()));
            }
            let eot = tpdu[2] & EOT_FLAG != 0;
            let mut tpdu = tpdu;
            let payload = tpdu.split_off(header_len).freeze();
            return Ok(CotpPdu::Data { eot, payload });
        }

        let header = &tpdu[..header_len];
        let be16 = |at: usize| -> S7Result<u16> {
            header
                .get(at..at + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .ok_or_else(|| S7Error::FrameInvalid("Truncated COTP header".to_string()))
        };

        match tpdu[1] & 0xF0 {
            TPDU_CR => Ok(CotpPdu::ConnectionRequest(CotpConnection::decode(header)?)),
            TPDU_CC => Ok(CotpPdu::ConnectionConfirm(CotpConnection::decode(header)?)),
            TPDU_DR => Ok(CotpPdu::DisconnectRequest {
                dst_ref: be16(2)?,
                src_ref: be16(4)?,
                reason: header.get(6).copied().unwrap_or(0),
            }),
            TPDU_DC => Ok(CotpPdu::DisconnectConfirm {
                dst_ref: be16(2)?,
                src_ref: be16(4)?,
            }),
            TPDU_ER => Ok(CotpPdu::Error {
                dst_ref: be16(2)?,
                cause: header.get(4).copied().unwrap_or(0),
            }),
            other => Err(S7Error::FrameInvalid(format!(
                "Unsupported COTP TPDU type 0x{:02X}",
                other
            ))),
        }
    }
}
