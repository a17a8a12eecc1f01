//! Userdata services: CPU clock, block information and system status list
//!
//! Request parameter (8 bytes):
//!
//! ```text
//! 00 01 12 | 04 | 11 | 0x40 | group | subfunction | sequence
//! ```
//!
//! Response parameter (12 bytes):
//!
//! ```text
//! 00 01 12 | 08 | 12 | 0x80 | group | subfunction | sequence | data unit ref | last unit | error (u16)
//! ```
//!
//! Both directions carry a data block of return code, transport tag, length
//! and payload.

use crate::pdu::Pdu;
use bytes::{BufMut, Bytes, BytesMut};
use s7_core::area::DataTransport;
use s7_core::datatypes::plc_date_time::to_bcd;
use s7_core::{BlockType, PlcDateTime, PlcStatus, ReturnCode, S7Error, S7Result};

const PARAMETER_HEAD: [u8; 3] = [0x00, 0x01, 0x12];
const REQUEST_PARAMETER_LENGTH: u8 = 0x04;
const RESPONSE_PARAMETER_LENGTH: u8 = 0x08;
const METHOD_REQUEST: u8 = 0x11;
const METHOD_RESPONSE: u8 = 0x12;
const TYPE_REQUEST: u8 = 0x40;
const TYPE_RESPONSE: u8 = 0x80;

/// Return code of a data block carrying no data
const NO_DATA: u8 = 0x0A;

/// SZL id of the CPU operating state list
pub const SZL_CPU_STATUS: u16 = 0x0424;

/// Function group of a userdata request
pub mod group {
    pub const BLOCK: u8 = 0x03;
    pub const SZL: u8 = 0x04;
    pub const TIME: u8 = 0x07;
}

/// Subfunction within a function group
pub mod subfunction {
    pub const BLOCK_INFO: u8 = 0x03;
    pub const READ_SZL: u8 = 0x01;
    pub const READ_CLOCK: u8 = 0x01;
    pub const SET_CLOCK: u8 = 0x02;
}

/// A userdata request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDataRequest {
    pub group: u8,
    pub subfunction: u8,
    pub sequence_number: u8,
    /// Data block payload; `None` sends an empty "no data" block
    pub payload: Option<Bytes>,
}

impl UserDataRequest {
    pub fn new(group: u8, subfunction: u8, payload: Option<Bytes>) -> Self {
        Self {
            group,
            subfunction,
            sequence_number: 0,
            payload,
        }
    }

    pub fn read_clock() -> Self {
        Self::new(group::TIME, subfunction::READ_CLOCK, None)
    }

    pub fn set_clock(time: &PlcDateTime) -> Self {
        let mut payload = BytesMut::with_capacity(2 + PlcDateTime::LENGTH);
        payload.put_u8(0x00);
        payload.put_u8(to_bcd((time.year() / 100) as u8));
        payload.put_slice(&time.encode());
        Self::new(group::TIME, subfunction::SET_CLOCK, Some(payload.freeze()))
    }

    /// Block information for `block_type` number `number`
    ///
    /// # Errors
    ///
    /// Returns `S7Error::InvalidData` if the number has more than five digits.
    pub fn block_info(block_type: BlockType, number: u32) -> S7Result<Self> {
        if number > 99_999 {
            return Err(S7Error::InvalidData(format!(
                "Block number {} out of range",
                number
            )));
        }
        let mut payload = BytesMut::with_capacity(8);
        payload.put_u8(0x30);
        payload.put_u8(block_type.ascii_code());
        payload.put_slice(format!("{:05}", number).as_bytes());
        payload.put_u8(b'A');
        Ok(Self::new(group::BLOCK, subfunction::BLOCK_INFO, Some(payload.freeze())))
    }

    pub fn read_szl(id: u16, index: u16) -> Self {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u16(id);
        payload.put_u16(index);
        Self::new(group::SZL, subfunction::READ_SZL, Some(payload.freeze()))
    }

    pub fn parameter(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(8);
        dst.put_slice(&PARAMETER_HEAD);
        dst.put_u8(REQUEST_PARAMETER_LENGTH);
        dst.put_u8(METHOD_REQUEST);
        dst.put_u8(TYPE_REQUEST | self.group);
        dst.put_u8(self.subfunction);
        dst.put_u8(self.sequence_number);
        dst.freeze()
    }

    pub fn data(&self) -> Bytes {
        let mut dst = BytesMut::new();
        match &self.payload {
            Some(payload) => {
                dst.put_u8(ReturnCode::Success.as_u8());
                dst.put_u8(DataTransport::OctetString.code());
                dst.put_u16(payload.len() as u16);
                dst.put_slice(payload);
            }
            None => dst.put_slice(&[NO_DATA, 0x00, 0x00, 0x00]),
        }
        dst.freeze()
    }

    pub fn request(&self, sequence: u16) -> Pdu {
        Pdu::UserData {
            sequence,
            parameter: self.parameter(),
            data: self.data(),
        }
    }

    /// Parse the parameter and data block of a request
    pub fn decode(parameter: &[u8], data: &Bytes) -> S7Result<Self> {
        if parameter.len() < 8
            || parameter[..3] != PARAMETER_HEAD
            || parameter[4] != METHOD_REQUEST
            || parameter[5] & 0xF0 != TYPE_REQUEST
        {
            return Err(S7Error::Protocol(format!(
                "Malformed userdata request parameter: {:02X?}",
                parameter
            )));
        }
        let (code, payload) = decode_data(data)?;
        Ok(Self {
            group: parameter[5] & 0x0F,
            subfunction: parameter[6],
            sequence_number: parameter[7],
            payload: (code != NO_DATA).then_some(payload),
        })
    }
}

/// A userdata response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDataResponse {
    pub group: u8,
    pub subfunction: u8,
    pub sequence_number: u8,
    pub return_code: ReturnCode,
    pub payload: Bytes,
}

impl UserDataResponse {
    /// Successful response carrying `payload`
    pub fn new(group: u8, subfunction: u8, payload: Bytes) -> Self {
        Self {
            group,
            subfunction,
            sequence_number: 0,
            return_code: ReturnCode::Success,
            payload,
        }
    }

    pub fn into_pdu(self, sequence: u16) -> Pdu {
        let mut parameter = BytesMut::with_capacity(12);
        parameter.put_slice(&PARAMETER_HEAD);
        parameter.put_u8(RESPONSE_PARAMETER_LENGTH);
        parameter.put_u8(METHOD_RESPONSE);
        parameter.put_u8(TYPE_RESPONSE | self.group);
        parameter.put_u8(self.subfunction);
        parameter.put_u8(self.sequence_number);
        parameter.put_slice(&[0x00, 0x00, 0x00, 0x00]);

        let mut data = BytesMut::new();
        data.put_u8(self.return_code.as_u8());
        data.put_u8(DataTransport::OctetString.code());
        data.put_u16(self.payload.len() as u16);
        data.put_slice(&self.payload);
        Pdu::UserData {
            sequence,
            parameter: parameter.freeze(),
            data: data.freeze(),
        }
    }

    /// Decode a userdata reply to a request of `group`/`subfunction`
    ///
    /// # Errors
    ///
    /// `S7Error::Remote` when the parameter carries an error code,
    /// `S7Error::Item` when the data block return code is not success,
    /// `S7Error::Protocol` for a malformed or mismatched reply.
    pub fn decode(reply: Pdu, group: u8, subfunction: u8) -> S7Result<Self> {
        let (parameter, data) = reply.into_user_data()?;
        if parameter.len() < 12
            || parameter[..3] != PARAMETER_HEAD
            || parameter[4] != METHOD_RESPONSE
            || parameter[5] != TYPE_RESPONSE | group
            || parameter[6] != subfunction
        {
            return Err(S7Error::Protocol(format!(
                "Unexpected userdata response parameter: {:02X?}",
                parameter
            )));
        }
        let error = u16::from_be_bytes([parameter[10], parameter[11]]);
        if error != 0 {
            return Err(S7Error::Remote {
                class: (error >> 8) as u8,
                code: error as u8,
            });
        }
        let (code, payload) = decode_data(&data)?;
        let return_code = ReturnCode::from_u8(code);
        if !return_code.is_success() {
            return Err(S7Error::Item(return_code));
        }
        Ok(Self {
            group,
            subfunction,
            sequence_number: parameter[7],
            return_code,
            payload,
        })
    }

    /// CPU clock from a read clock response
    pub fn clock(&self) -> S7Result<PlcDateTime> {
        let bytes = self.payload.get(2..2 + PlcDateTime::LENGTH).ok_or_else(|| {
            S7Error::Protocol(format!("Clock payload of {} bytes too short", self.payload.len()))
        })?;
        PlcDateTime::decode(bytes)
    }

    /// Operating state from an SZL 0x0424 response
    pub fn cpu_status(&self) -> S7Result<PlcStatus> {
        let id = self
            .payload
            .get(..2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| S7Error::Protocol("Empty SZL payload".to_string()))?;
        if id != SZL_CPU_STATUS {
            return Err(S7Error::Protocol(format!(
                "Expected SZL 0x{:04X}, got 0x{:04X}",
                SZL_CPU_STATUS, id
            )));
        }
        let status = self.payload.get(8 + 3).ok_or_else(|| {
            S7Error::Protocol(format!("SZL payload of {} bytes too short", self.payload.len()))
        })?;
        Ok(PlcStatus::from_status_byte(*status))
    }
}

fn decode_data(data: &Bytes) -> S7Result<(u8, Bytes)> {
    if data.len() < 4 {
        return Err(S7Error::Protocol(format!(
            "Userdata block of {} bytes too short",
            data.len()
        )));
    }
    let transport = DataTransport::from_code(data[1]).ok_or_else(|| {
        S7Error::Protocol(format!("Unknown data transport tag 0x{:02X}", data[1]))
    })?;
    let len = transport.byte_length(u16::from_be_bytes([data[2], data[3]]) as usize);
    if 4 + len > data.len() {
        return Err(S7Error::Protocol(format!(
            "Userdata block declares {} bytes, {} present",
            len,
            data.len() - 4
        )));
    }
    Ok((data[0], data.slice(4..4 + len)))
}
