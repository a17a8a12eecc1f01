//! Memory areas, element data types and data transport sizes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Memory area of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Area {
    /// Direct peripheral access (0x80)
    Peripheral,
    /// Process inputs, "I"/"E" (0x81)
    Inputs,
    /// Process outputs, "Q"/"A" (0x82)
    Outputs,
    /// Flags (merker), "M" (0x83)
    Flags,
    /// Data block, "DB" (0x84)
    DataBlock,
    /// Instance data block, "DI" (0x85)
    InstanceDataBlock,
    /// Local data, "L" (0x86)
    Local,
    /// S7 counters (0x1C)
    Counter,
    /// S7 timers (0x1D)
    Timer,
}

impl Area {
    /// Area code used in the S7ANY item
    pub fn code(&self) -> u8 {
        match self {
            Area::Peripheral => 0x80,
            Area::Inputs => 0x81,
            Area::Outputs => 0x82,
            Area::Flags => 0x83,
            Area::DataBlock => 0x84,
            Area::InstanceDataBlock => 0x85,
            Area::Local => 0x86,
            Area::Counter => 0x1C,
            Area::Timer => 0x1D,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x80 => Some(Area::Peripheral),
            0x81 => Some(Area::Inputs),
            0x82 => Some(Area::Outputs),
            0x83 => Some(Area::Flags),
            0x84 => Some(Area::DataBlock),
            0x85 => Some(Area::InstanceDataBlock),
            0x86 => Some(Area::Local),
            0x1C => Some(Area::Counter),
            0x1D => Some(Area::Timer),
            _ => None,
        }
    }

    /// Whether items in this area carry a block number
    pub fn requires_block_number(&self) -> bool {
        matches!(self, Area::DataBlock | Area::InstanceDataBlock)
    }

    /// Whether the item address is an element index rather than a bit address
    pub fn is_element_addressed(&self) -> bool {
        matches!(self, Area::Counter | Area::Timer)
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Area::Peripheral => "P",
            Area::Inputs => "I",
            Area::Outputs => "Q",
            Area::Flags => "M",
            Area::DataBlock => "DB",
            Area::InstanceDataBlock => "DI",
            Area::Local => "L",
            Area::Counter => "C",
            Area::Timer => "T",
        };
        f.write_str(text)
    }
}

/// Element data type of an addressed item
///
/// Each type has a fixed wire width; the element count of a descriptor is
/// expressed in units of this width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bit,
    Byte,
    Char,
    Word,
    Int,
    DWord,
    DInt,
    Real,
    Counter,
    Timer,
}

impl DataType {
    /// Transport size code used in the S7ANY item
    pub fn transport_size(&self) -> u8 {
        match self {
            DataType::Bit => 0x01,
            DataType::Byte => 0x02,
            DataType::Char => 0x03,
            DataType::Word => 0x04,
            DataType::Int => 0x05,
            DataType::DWord => 0x06,
            DataType::DInt => 0x07,
            DataType::Real => 0x08,
            DataType::Counter => 0x1C,
            DataType::Timer => 0x1D,
        }
    }

    pub fn from_transport_size(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(DataType::Bit),
            0x02 => Some(DataType::Byte),
            0x03 => Some(DataType::Char),
            0x04 => Some(DataType::Word),
            0x05 => Some(DataType::Int),
            0x06 => Some(DataType::DWord),
            0x07 => Some(DataType::DInt),
            0x08 => Some(DataType::Real),
            0x1C => Some(DataType::Counter),
            0x1D => Some(DataType::Timer),
            _ => None,
        }
    }

    /// Width of one element on the wire, in bytes
    pub fn width(&self) -> usize {
        match self {
            DataType::Bit | DataType::Byte | DataType::Char => 1,
            DataType::Word | DataType::Int | DataType::Counter | DataType::Timer => 2,
            DataType::DWord | DataType::DInt | DataType::Real => 4,
        }
    }

    /// Transport tag used in front of write data for this type
    pub fn data_transport(&self) -> DataTransport {
        match self {
            DataType::Bit => DataTransport::Bit,
            DataType::Counter | DataType::Timer => DataTransport::OctetString,
            _ => DataTransport::Byte,
        }
    }
}

/// Transport tag in the header of a data item (read results and write data)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataTransport {
    /// Used by error items
    Null,
    /// Single bit, length in bits
    Bit,
    /// Byte/word/dword, length in bits
    Byte,
    /// Integer, length in bits
    Integer,
    /// Double integer, length in bytes
    DInteger,
    /// Real, length in bytes
    Real,
    /// Octet string, length in bytes
    OctetString,
}

impl DataTransport {
    pub fn code(&self) -> u8 {
        match self {
            DataTransport::Null => 0x00,
            DataTransport::Bit => 0x03,
            DataTransport::Byte => 0x04,
            DataTransport::Integer => 0x05,
            DataTransport::DInteger => 0x06,
            DataTransport::Real => 0x07,
            DataTransport::OctetString => 0x09,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(DataTransport::Null),
            0x03 => Some(DataTransport::Bit),
            0x04 => Some(DataTransport::Byte),
            0x05 => Some(DataTransport::Integer),
            0x06 => Some(DataTransport::DInteger),
            0x07 => Some(DataTransport::Real),
            0x09 => Some(DataTransport::OctetString),
            _ => None,
        }
    }

    /// Value of the length field for `byte_len` bytes of data
    pub fn length_field(&self, byte_len: usize) -> usize {
        match self {
            DataTransport::Byte | DataTransport::Integer => byte_len * 8,
            // a bit item carries one byte holding one bit
            DataTransport::Bit => byte_len,
            _ => byte_len,
        }
    }

    /// Number of data bytes that follow a header carrying `length_field`
    pub fn byte_length(&self, length_field: usize) -> usize {
        match self {
            DataTransport::Byte | DataTransport::Integer => length_field.div_ceil(8),
            DataTransport::Bit => length_field.div_ceil(8),
            _ => length_field,
        }
    }
}
