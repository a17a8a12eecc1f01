//! Block information returned by the block info userdata service

use bytes::{BufMut, BytesMut};
use chrono::{Days, NaiveDate, NaiveDateTime, TimeDelta};
use s7_core::datatypes::BlockLanguage;
use s7_core::{BlockType, S7Error, S7Result};

/// Length of the block info payload up to and including the checksum
pub const BLOCK_INFO_MIN_LENGTH: usize = 70;

/// Length of the complete block info payload
pub const BLOCK_INFO_LENGTH: usize = 78;

/// Metadata of one program block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub block_type: BlockType,
    pub block_number: u16,
    pub language: BlockLanguage,
    pub flags: u8,
    /// Size in load memory
    pub load_size: u32,
    pub security: u32,
    /// Last code modification
    pub code_timestamp: NaiveDateTime,
    /// Last interface modification
    pub interface_timestamp: NaiveDateTime,
    pub sbb_length: u16,
    pub add_length: u16,
    pub local_data_length: u16,
    pub mc7_size: u16,
    pub author: String,
    pub family: String,
    pub header: String,
    /// Major and minor version
    pub version: (u8, u8),
    pub checksum: u16,
}

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1984, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Timestamp stored as milliseconds since midnight and days since 1984-01-01
fn decode_timestamp(millis: u32, days: u16) -> S7Result<NaiveDateTime> {
    epoch()
        .checked_add_days(Days::new(days as u64))
        .and_then(|t| t.checked_add_signed(TimeDelta::milliseconds(millis as i64)))
        .ok_or_else(|| S7Error::Protocol(format!("Invalid block timestamp {}d {}ms", days, millis)))
}

fn encode_timestamp(timestamp: &NaiveDateTime) -> S7Result<(u32, u16)> {
    let since = timestamp.signed_duration_since(epoch());
    let days = u16::try_from(since.num_days())
        .map_err(|_| S7Error::InvalidData(format!("Timestamp {} out of range", timestamp)))?;
    let millis = (since - TimeDelta::days(days as i64)).num_milliseconds() as u32;
    Ok((millis, days))
}

fn ascii(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\0', ' '])
        .to_string()
}

fn put_ascii(dst: &mut BytesMut, text: &str) {
    let mut field = [0u8; 8];
    for (slot, byte) in field.iter_mut().zip(text.bytes()) {
        *slot = byte;
    }
    dst.put_slice(&field);
}

fn be16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn be32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl BlockInfo {
    /// Decode the payload of a block info response
    ///
    /// # Errors
    ///
    /// Returns `S7Error::Protocol` if the payload is too short or names an
    /// unknown block type.
    pub fn decode(payload: &[u8]) -> S7Result<Self> {
        if payload.len() < BLOCK_INFO_MIN_LENGTH {
            return Err(S7Error::Protocol(format!(
                "Block info of {} bytes too short",
                payload.len()
            )));
        }
        let block_type = BlockType::from_sub_block_code(payload[11]).ok_or_else(|| {
            S7Error::Protocol(format!("Unknown sub block type 0x{:02X}", payload[11]))
        })?;
        Ok(Self {
            block_type,
            block_number: be16(payload, 12),
            language: BlockLanguage::from_code(payload[10]),
            flags: payload[9],
            load_size: be32(payload, 14),
            security: be32(payload, 18),
            code_timestamp: decode_timestamp(be32(payload, 22), be16(payload, 26))?,
            interface_timestamp: decode_timestamp(be32(payload, 28), be16(payload, 32))?,
            sbb_length: be16(payload, 34),
            add_length: be16(payload, 36),
            local_data_length: be16(payload, 38),
            mc7_size: be16(payload, 40),
            author: ascii(&payload[42..50]),
            family: ascii(&payload[50..58]),
            header: ascii(&payload[58..66]),
            version: (payload[66] >> 4, payload[66] & 0x0F),
            checksum: be16(payload, 68),
        })
    }

    pub fn encode(&self) -> S7Result<Vec<u8>> {
        let (code_ms, code_days) = encode_timestamp(&self.code_timestamp)?;
        let (intf_ms, intf_days) = encode_timestamp(&self.interface_timestamp)?;
        let language = match self.language {
            BlockLanguage::Stl => 0x01,
            BlockLanguage::Ladder => 0x02,
            BlockLanguage::Fbd => 0x03,
            BlockLanguage::Scl => 0x04,
            BlockLanguage::Db => 0x05,
            BlockLanguage::Graph => 0x06,
            BlockLanguage::Sdb => 0x07,
            BlockLanguage::Unknown(code) => code,
        };

        let mut dst = BytesMut::with_capacity(BLOCK_INFO_LENGTH);
        dst.put_u8(0x00);
        dst.put_u8(self.block_type.ascii_code());
        dst.put_slice(&[0x00, 0x4A, 0x00, 0x00, 0x00, 0x70, 0x70]);
        dst.put_u8(self.flags);
        dst.put_u8(language);
        dst.put_u8(self.block_type.sub_block_code());
        dst.put_u16(self.block_number);
        dst.put_u32(self.load_size);
        dst.put_u32(self.security);
        dst.put_u32(code_ms);
        dst.put_u16(code_days);
        dst.put_u32(intf_ms);
        dst.put_u16(intf_days);
        dst.put_u16(self.sbb_length);
        dst.put_u16(self.add_length);
        dst.put_u16(self.local_data_length);
        dst.put_u16(self.mc7_size);
        put_ascii(&mut dst, &self.author);
        put_ascii(&mut dst, &self.family);
        put_ascii(&mut dst, &self.header);
        dst.put_u8((self.version.0 << 4) | (self.version.1 & 0x0F));
        dst.put_u8(0x00);
        dst.put_u16(self.checksum);
        dst.put_slice(&[0u8; 8]);
        Ok(dst.to_vec())
    }
}
