//! Variable items: S7ANY item specifications and data items
//!
//! Read requests carry one 12-byte item specification per item:
//!
//! ```text
//! 0x12 0x0A 0x10 | transport size | count (u16) | db (u16) | area | address (u24)
//! ```
//!
//! Write requests add one data item per specification to the data block, and
//! read acknowledgements carry one data item per requested specification:
//!
//! ```text
//! return code | transport tag | length (u16) | data | pad to even (not after the last)
//! ```

use crate::pdu::function;
use bytes::{BufMut, Bytes, BytesMut};
use s7_core::area::DataTransport;
use s7_core::{AddressingDescriptor, Area, DataType, ReturnCode, S7Error, S7Result};

pub const ITEM_SPEC_LENGTH: usize = 12;

/// Header of a data item: return code, transport tag, length
pub const DATA_ITEM_HEADER_LENGTH: usize = 4;

const SPEC_TYPE: u8 = 0x12;
const SPEC_LENGTH_FIELD: u8 = 0x0A;
const SYNTAX_ID_S7ANY: u8 = 0x10;

/// Items per request are limited by the one-byte item count
pub const MAX_ITEMS_PER_REQUEST: usize = u8::MAX as usize;

/// Serialize one S7ANY item specification
pub fn encode_item_spec(descriptor: &AddressingDescriptor, dst: &mut BytesMut) -> S7Result<()> {
    let count = u16::try_from(descriptor.count()).map_err(|_| {
        S7Error::InvalidData(format!(
            "Element count {} does not fit one item",
            descriptor.count()
        ))
    })?;
    let address = descriptor.wire_address();
    dst.put_u8(SPEC_TYPE);
    dst.put_u8(SPEC_LENGTH_FIELD);
    dst.put_u8(SYNTAX_ID_S7ANY);
    dst.put_u8(descriptor.data_type().transport_size());
    dst.put_u16(count);
    dst.put_u16(descriptor.block_number());
    dst.put_u8(descriptor.area().code());
    dst.put_u8((address >> 16) as u8);
    dst.put_u8((address >> 8) as u8);
    dst.put_u8(address as u8);
    Ok(())
}

/// Parse one S7ANY item specification
pub fn decode_item_spec(bytes: &[u8]) -> S7Result<AddressingDescriptor> {
    if bytes.len() < ITEM_SPEC_LENGTH
        || bytes[0] != SPEC_TYPE
        || bytes[1] != SPEC_LENGTH_FIELD
        || bytes[2] != SYNTAX_ID_S7ANY
    {
        return Err(S7Error::Protocol(format!(
            "Malformed item specification: {:02X?}",
            bytes
        )));
    }
    let data_type = DataType::from_transport_size(bytes[3]).ok_or_else(|| {
        S7Error::Protocol(format!("Unknown transport size 0x{:02X}", bytes[3]))
    })?;
    let count = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
    let block_number = u16::from_be_bytes([bytes[6], bytes[7]]);
    let area = Area::from_code(bytes[8])
        .ok_or_else(|| S7Error::Protocol(format!("Unknown area 0x{:02X}", bytes[8])))?;
    let address = u32::from_be_bytes([0, bytes[9], bytes[10], bytes[11]]);
    AddressingDescriptor::from_wire(area, block_number, address, data_type, count)
}

fn item_count(count: usize) -> S7Result<u8> {
    if count == 0 {
        return Err(S7Error::InvalidData("A request needs at least one item".to_string()));
    }
    u8::try_from(count)
        .map_err(|_| S7Error::InvalidData(format!("{} items exceed one request", count)))
}

/// Parameter block of a read variable job
pub fn read_var_parameter<'a, I>(descriptors: I) -> S7Result<Bytes>
where
    I: ExactSizeIterator<Item = &'a AddressingDescriptor>,
{
    let count = item_count(descriptors.len())?;
    let mut dst = BytesMut::with_capacity(2 + count as usize * ITEM_SPEC_LENGTH);
    dst.put_u8(function::READ_VAR);
    dst.put_u8(count);
    for descriptor in descriptors {
        encode_item_spec(descriptor, &mut dst)?;
    }
    Ok(dst.freeze())
}

/// Parameter and data block of a write variable job
///
/// # Errors
///
/// Returns `S7Error::InvalidData` if a payload length differs from the
/// descriptor's element count times element width.
pub fn write_var_request(items: &[(AddressingDescriptor, &[u8])]) -> S7Result<(Bytes, Bytes)> {
    let count = item_count(items.len())?;
    let mut parameter = BytesMut::with_capacity(2 + items.len() * ITEM_SPEC_LENGTH);
    parameter.put_u8(function::WRITE_VAR);
    parameter.put_u8(count);
    let mut data = BytesMut::new();
    for (index, (descriptor, payload)) in items.iter().enumerate() {
        if payload.len() != descriptor.byte_length() {
            return Err(S7Error::InvalidData(format!(
                "Payload of {} bytes does not match {} ({} bytes)",
                payload.len(),
                descriptor,
                descriptor.byte_length()
            )));
        }
        encode_item_spec(descriptor, &mut parameter)?;
        let item = DataItem {
            return_code: ReturnCode::Reserved,
            transport: descriptor.data_type().data_transport(),
            data: Bytes::copy_from_slice(payload),
        };
        item.encode(&mut data, index + 1 == items.len())?;
    }
    Ok((parameter.freeze(), data.freeze()))
}

/// Decode the item specifications of a read variable job
pub fn decode_read_var_parameter(parameter: &[u8]) -> S7Result<Vec<AddressingDescriptor>> {
    decode_item_specs(parameter, function::READ_VAR)
}

/// Decode a write variable job into descriptors and payloads
pub fn decode_write_var_request(
    parameter: &[u8],
    data: &Bytes,
) -> S7Result<Vec<(AddressingDescriptor, Bytes)>> {
    let descriptors = decode_item_specs(parameter, function::WRITE_VAR)?;
    let items = decode_data_items(data, descriptors.len())?;
    Ok(descriptors
        .into_iter()
        .zip(items)
        .map(|(descriptor, item)| (descriptor, item.data))
        .collect())
}

fn decode_item_specs(parameter: &[u8], expected_function: u8) -> S7Result<Vec<AddressingDescriptor>> {
    if parameter.len() < 2 || parameter[0] != expected_function {
        return Err(S7Error::Protocol(format!(
            "Expected function 0x{:02X}, got {:02X?}",
            expected_function, parameter
        )));
    }
    let count = parameter[1] as usize;
    if parameter.len() != 2 + count * ITEM_SPEC_LENGTH {
        return Err(S7Error::Protocol(format!(
            "Parameter of {} bytes does not hold {} item specifications",
            parameter.len(),
            count
        )));
    }
    parameter[2..]
        .chunks_exact(ITEM_SPEC_LENGTH)
        .map(decode_item_spec)
        .collect()
}

/// One data item in a read acknowledgement or write job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    pub return_code: ReturnCode,
    pub transport: DataTransport,
    pub data: Bytes,
}

impl DataItem {
    pub fn success(transport: DataTransport, data: Bytes) -> Self {
        Self {
            return_code: ReturnCode::Success,
            transport,
            data,
        }
    }

    /// An item carrying only an error code and no data
    pub fn error(return_code: ReturnCode) -> Self {
        Self {
            return_code,
            transport: DataTransport::Null,
            data: Bytes::new(),
        }
    }

    /// Size on the wire including the pad byte of a non-final odd item
    pub fn encoded_len(&self, last: bool) -> usize {
        let pad = usize::from(!last && self.data.len() % 2 == 1);
        DATA_ITEM_HEADER_LENGTH + self.data.len() + pad
    }

    pub fn encode(&self, dst: &mut BytesMut, last: bool) -> S7Result<()> {
        let length = u16::try_from(self.transport.length_field(self.data.len())).map_err(|_| {
            S7Error::InvalidData(format!("Data item of {} bytes too long", self.data.len()))
        })?;
        dst.put_u8(self.return_code.as_u8());
        dst.put_u8(self.transport.code());
        dst.put_u16(length);
        dst.put_slice(&self.data);
        if !last && self.data.len() % 2 == 1 {
            dst.put_u8(0x00);
        }
        Ok(())
    }

    /// Decode the item at `*pos`, advancing past it and its pad byte
    pub fn decode(bytes: &Bytes, pos: &mut usize, last: bool) -> S7Result<Self> {
        let header = bytes.get(*pos..*pos + DATA_ITEM_HEADER_LENGTH).ok_or_else(|| {
            S7Error::Protocol(format!("Data item header truncated at offset {}", *pos))
        })?;
        let return_code = ReturnCode::from_u8(header[0]);
        let transport = DataTransport::from_code(header[1]).ok_or_else(|| {
            S7Error::Protocol(format!("Unknown data transport tag 0x{:02X}", header[1]))
        })?;
        let length_field = u16::from_be_bytes([header[2], header[3]]) as usize;
        let start = *pos + DATA_ITEM_HEADER_LENGTH;
        let len = transport.byte_length(length_field);
        if start + len > bytes.len() {
            return Err(S7Error::Protocol(format!(
                "Data item declares {} bytes, {} remain",
                len,
                bytes.len() - start
            )));
        }
        let data = bytes.slice(start..start + len);
        *pos = start + len;
        if !last && len % 2 == 1 {
            *pos += 1;
        }
        Ok(Self {
            return_code,
            transport,
            data,
        })
    }
}

fn decode_data_items(data: &Bytes, count: usize) -> S7Result<Vec<DataItem>> {
    let mut pos = 0;
    let mut items = Vec::with_capacity(count);
    for index in 0..count {
        items.push(DataItem::decode(data, &mut pos, index + 1 == count)?);
    }
    if pos != data.len() {
        return Err(S7Error::Protocol(format!(
            "{} trailing bytes after {} data items",
            data.len() - pos,
            count
        )));
    }
    Ok(items)
}

/// Acknowledgement blocks of a read variable job
pub fn encode_read_response(items: &[DataItem]) -> S7Result<(Bytes, Bytes)> {
    let count = item_count(items.len())?;
    let mut data = BytesMut::new();
    for (index, item) in items.iter().enumerate() {
        item.encode(&mut data, index + 1 == items.len())?;
    }
    Ok((
        Bytes::copy_from_slice(&[function::READ_VAR, count]),
        data.freeze(),
    ))
}

/// Decode the acknowledgement of a read variable job with `expected` items
pub fn decode_read_response(parameter: &[u8], data: &Bytes, expected: usize) -> S7Result<Vec<DataItem>> {
    check_response_parameter(parameter, function::READ_VAR, expected)?;
    decode_data_items(data, expected)
}

/// Acknowledgement blocks of a write variable job
pub fn encode_write_response(codes: &[ReturnCode]) -> S7Result<(Bytes, Bytes)> {
    let count = item_count(codes.len())?;
    let data: Vec<u8> = codes.iter().map(ReturnCode::as_u8).collect();
    Ok((
        Bytes::copy_from_slice(&[function::WRITE_VAR, count]),
        Bytes::from(data),
    ))
}

/// Decode the acknowledgement of a write variable job with `expected` items
pub fn decode_write_response(parameter: &[u8], data: &[u8], expected: usize) -> S7Result<Vec<ReturnCode>> {
    check_response_parameter(parameter, function::WRITE_VAR, expected)?;
    if data.len() != expected {
        return Err(S7Error::Protocol(format!(
            "Write acknowledgement carries {} return codes, expected {}",
            data.len(),
            expected
        )));
    }
    Ok(data.iter().map(|code| ReturnCode::from_u8(*code)).collect())
}

fn check_response_parameter(parameter: &[u8], expected_function: u8, expected: usize) -> S7Result<()> {
    match parameter {
        [function, count] if *function == expected_function && *count as usize == expected => Ok(()),
        _ => Err(S7Error::Protocol(format!(
            "Acknowledgement parameter {:02X?} does not match function 0x{:02X} with {} items",
            parameter, expected_function, expected
        ))),
    }
}
