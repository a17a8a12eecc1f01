//! Addressing descriptors for variable access
//!
//! A descriptor names a contiguous run of elements in one memory area. It is
//! validated when it is built, so anything that reaches the wire is already
//! known to be representable in an S7ANY item.

use crate::area::{Area, DataType};
use crate::error::{S7Error, S7Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Largest bit address representable in the 3-byte S7ANY address field
pub const MAX_BIT_ADDRESS: u32 = 0x00FF_FFFF;

/// Largest byte offset whose bits are all addressable
pub const MAX_BYTE_OFFSET: u32 = MAX_BIT_ADDRESS >> 3;

static DB_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(DB|DI)(\d+)\.(?:DB|DI)([XBWD])(\d+)(?:\.([0-7]))?(?:,(\d+))?$")
        .unwrap_or_else(|e| panic!("invalid data block tag pattern: {e}"))
});

static AREA_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(P?[IEQA]|[ML])([XBWD]?)(\d+)(?:\.([0-7]))?(?:,(\d+))?$")
        .unwrap_or_else(|e| panic!("invalid area tag pattern: {e}"))
});

static COUNTER_TIMER_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)([CZT])(\d+)(?:,(\d+))?$")
        .unwrap_or_else(|e| panic!("invalid counter/timer tag pattern: {e}"))
});

/// Addressing descriptor: area, block number, offset, element count and type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressingDescriptor {
    area: Area,
    block_number: u16,
    byte_offset: u32,
    bit_offset: u8,
    count: usize,
    data_type: DataType,
}

impl AddressingDescriptor {
    /// Create a descriptor for `count` elements of `data_type`
    ///
    /// # Arguments
    ///
    /// * `area` - Memory area
    /// * `block_number` - Data block number, ignored for areas without blocks
    /// * `byte_offset` - Start offset in bytes (element index for counters/timers)
    /// * `data_type` - Element data type
    /// * `count` - Number of elements
    ///
    /// # Errors
    ///
    /// Returns `S7Error::InvalidData` if the descriptor is not representable.
    pub fn new(
        area: Area,
        block_number: u16,
        byte_offset: u32,
        data_type: DataType,
        count: usize,
    ) -> S7Result<Self> {
        let descriptor = Self {
            area,
            block_number: if area.requires_block_number() { block_number } else { 0 },
            byte_offset,
            bit_offset: 0,
            count,
            data_type,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Create a descriptor for a single bit at `byte_offset.bit_offset`
    pub fn bit(area: Area, block_number: u16, byte_offset: u32, bit_offset: u8) -> S7Result<Self> {
        Self::bits(area, block_number, byte_offset, bit_offset, 1)
    }

    /// Create a descriptor for `count` consecutive bits from `byte_offset.bit_offset`
    ///
    /// Runs may cross byte boundaries. Reads yield one byte (0 or 1) per bit
    /// and writes take one byte per bit.
    pub fn bits(
        area: Area,
        block_number: u16,
        byte_offset: u32,
        bit_offset: u8,
        count: usize,
    ) -> S7Result<Self> {
        let descriptor = Self {
            area,
            block_number: if area.requires_block_number() { block_number } else { 0 },
            byte_offset,
            bit_offset,
            count,
            data_type: DataType::Bit,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Create a descriptor for `length` raw bytes
    pub fn bytes(area: Area, block_number: u16, byte_offset: u32, length: usize) -> S7Result<Self> {
        Self::new(area, block_number, byte_offset, DataType::Byte, length)
    }

    /// Create a descriptor from a length in bytes rather than an element count
    ///
    /// # Errors
    ///
    /// Returns `S7Error::InvalidData` if `byte_length` is not a multiple of the
    /// element width.
    pub fn with_byte_length(
        area: Area,
        block_number: u16,
        byte_offset: u32,
        data_type: DataType,
        byte_length: usize,
    ) -> S7Result<Self> {
        let width = data_type.width();
        if byte_length % width != 0 {
            return Err(S7Error::InvalidData(format!(
                "Length {} is not a multiple of the {:?} width {}",
                byte_length, data_type, width
            )));
        }
        Self::new(area, block_number, byte_offset, data_type, byte_length / width)
    }

    /// Check every invariant of the descriptor
    pub fn validate(&self) -> S7Result<()> {
        if self.count == 0 {
            return Err(S7Error::InvalidData("Element count must not be zero".to_string()));
        }
        if self.area.requires_block_number() && self.block_number == 0 {
            return Err(S7Error::InvalidData(format!(
                "Area {} requires a block number greater than zero",
                self.area
            )));
        }
        match self.data_type {
            DataType::Bit => {
                if self.bit_offset > 7 {
                    return Err(S7Error::InvalidData(format!(
                        "Bit offset {} out of range 0..=7",
                        self.bit_offset
                    )));
                }
            }
            _ if self.bit_offset != 0 => {
                return Err(S7Error::InvalidData(format!(
                    "Bit offset is only valid for bit items, got {:?}",
                    self.data_type
                )));
            }
            _ => {}
        }

        let counter_type = matches!(self.data_type, DataType::Counter | DataType::Timer);
        let type_matches_area = match self.area {
            Area::Counter => self.data_type == DataType::Counter,
            Area::Timer => self.data_type == DataType::Timer,
            _ => !counter_type,
        };
        if !type_matches_area {
            return Err(S7Error::InvalidData(format!(
                "Data type {:?} cannot address area {}",
                self.data_type, self.area
            )));
        }

        let length = self.checked_byte_length().ok_or_else(|| {
            S7Error::InvalidData(format!(
                "{} elements of {:?} overflow the data length",
                self.count, self.data_type
            ))
        })?;
        if self.area.is_element_addressed() {
            let last = (self.byte_offset as u64).saturating_add(self.count as u64 - 1);
            if last > MAX_BIT_ADDRESS as u64 {
                return Err(S7Error::InvalidData(format!(
                    "Element range {}..={} exceeds the address space",
                    self.byte_offset, last
                )));
            }
        } else if self.data_type == DataType::Bit {
            let first = ((self.byte_offset as u64) << 3) | self.bit_offset as u64;
            let last = first.saturating_add(self.count as u64 - 1);
            if last > MAX_BIT_ADDRESS as u64 {
                return Err(S7Error::InvalidData(format!(
                    "Bit range {}..={} exceeds the address space",
                    first, last
                )));
            }
        } else {
            let last = (self.byte_offset as u64).saturating_add(length as u64 - 1);
            if last > MAX_BYTE_OFFSET as u64 {
                return Err(S7Error::InvalidData(format!(
                    "Byte range {}..={} exceeds the address space",
                    self.byte_offset, last
                )));
            }
        }
        Ok(())
    }

    /// Derive a descriptor covering `count` elements starting `element_offset`
    /// elements after the start of this one
    ///
    /// Bit descriptors are sliced bit by bit, carrying into the next byte.
    pub fn slice(&self, element_offset: usize, count: usize) -> S7Result<Self> {
        let overflow = || S7Error::InvalidData("Fragment offset overflow".to_string());
        let fragment = if self.data_type == DataType::Bit && !self.area.is_element_addressed() {
            let address = u32::try_from(element_offset)
                .ok()
                .and_then(|delta| self.wire_address().checked_add(delta))
                .ok_or_else(overflow)?;
            Self {
                byte_offset: address >> 3,
                bit_offset: (address & 0x07) as u8,
                count,
                ..*self
            }
        } else {
            let step = if self.area.is_element_addressed() { 1 } else { self.data_type.width() };
            let offset = element_offset
                .checked_mul(step)
                .and_then(|delta| u32::try_from(delta).ok())
                .and_then(|delta| self.byte_offset.checked_add(delta))
                .ok_or_else(overflow)?;
            Self {
                byte_offset: offset,
                count,
                ..*self
            }
        };
        fragment.validate()?;
        Ok(fragment)
    }

    pub fn area(&self) -> Area {
        self.area
    }

    pub fn block_number(&self) -> u16 {
        self.block_number
    }

    pub fn byte_offset(&self) -> u32 {
        self.byte_offset
    }

    pub fn bit_offset(&self) -> u8 {
        self.bit_offset
    }

    /// Number of elements
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Total data length in bytes
    ///
    /// Bits transfer one byte per bit. Validated descriptors never saturate.
    pub fn byte_length(&self) -> usize {
        self.count.saturating_mul(self.data_type.width())
    }

    fn checked_byte_length(&self) -> Option<usize> {
        self.count.checked_mul(self.data_type.width())
    }

    /// Value of the 3-byte address field
    ///
    /// Counters and timers are addressed by element index, all other areas by
    /// `byte_offset * 8 + bit_offset`.
    pub fn wire_address(&self) -> u32 {
        if self.area.is_element_addressed() {
            self.byte_offset
        } else {
            (self.byte_offset << 3) | self.bit_offset as u32
        }
    }

    /// Rebuild a descriptor from the fields of an S7ANY item
    pub fn from_wire(
        area: Area,
        block_number: u16,
        address: u32,
        data_type: DataType,
        count: usize,
    ) -> S7Result<Self> {
        let (byte_offset, bit_offset) = if area.is_element_addressed() {
            (address, 0)
        } else if data_type == DataType::Bit {
            (address >> 3, (address & 0x07) as u8)
        } else {
            (address >> 3, 0)
        };
        let descriptor = Self {
            area,
            block_number: if area.requires_block_number() { block_number } else { 0 },
            byte_offset,
            bit_offset,
            count,
            data_type,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

fn size_letter_type(letter: &str) -> DataType {
    match letter.to_ascii_uppercase().as_str() {
        "X" | "" => DataType::Bit,
        "W" => DataType::Word,
        "D" => DataType::DWord,
        _ => DataType::Byte,
    }
}

fn parse_number<T: FromStr>(text: &str, what: &str) -> S7Result<T> {
    text.parse::<T>()
        .map_err(|_| S7Error::InvalidData(format!("Invalid {}: {}", what, text)))
}

fn build_from_tag(
    area: Area,
    block_number: u16,
    letter: &str,
    offset: &str,
    bit: Option<&str>,
    count: Option<&str>,
) -> S7Result<AddressingDescriptor> {
    let data_type = size_letter_type(letter);
    let byte_offset = parse_number::<u32>(offset, "offset")?;
    let count = count.map(|c| parse_number::<usize>(c, "count")).transpose()?;
    match (data_type, bit) {
        (DataType::Bit, Some(bit)) => AddressingDescriptor::bits(
            area,
            block_number,
            byte_offset,
            parse_number(bit, "bit")?,
            count.unwrap_or(1),
        ),
        (DataType::Bit, None) => Err(S7Error::InvalidData(
            "Bit tags need a bit offset".to_string(),
        )),
        (_, Some(_)) => Err(S7Error::InvalidData(
            "Only bit tags take a bit offset".to_string(),
        )),
        (data_type, None) => {
            AddressingDescriptor::new(area, block_number, byte_offset, data_type, count.unwrap_or(1))
        }
    }
}

impl FromStr for AddressingDescriptor {
    type Err = S7Error;

    /// Parse the conventional tag syntax
    ///
    /// Supported forms:
    /// - `DB10.DBX16.0`, `DB10.DBB2`, `DB10.DBW4`, `DB10.DBD8`
    /// - `I0.0`, `IB1`, `QW2`, `MD4`, `M10.7`, `LB0`, `PIW256`
    /// - `C5`, `Z5`, `T3`
    ///
    /// A trailing `,N` gives an element count, e.g. `DB1.DBB0,100`, or a
    /// run of consecutive bits, e.g. `DB1.DBX0.3,8`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        if let Some(caps) = DB_TAG.captures(tag) {
            let area = if caps[1].eq_ignore_ascii_case("DI") {
                Area::InstanceDataBlock
            } else {
                Area::DataBlock
            };
            let block_number = parse_number::<u16>(&caps[2], "block number")?;
            return build_from_tag(
                area,
                block_number,
                &caps[3],
                &caps[4],
                caps.get(5).map(|m| m.as_str()),
                caps.get(6).map(|m| m.as_str()),
            );
        }
        if let Some(caps) = AREA_TAG.captures(tag) {
            let area = match caps[1].to_ascii_uppercase().as_str() {
                "I" | "E" => Area::Inputs,
                "Q" | "A" => Area::Outputs,
                "M" => Area::Flags,
                "L" => Area::Local,
                _ => Area::Peripheral,
            };
            return build_from_tag(
                area,
                0,
                &caps[2],
                &caps[3],
                caps.get(4).map(|m| m.as_str()),
                caps.get(5).map(|m| m.as_str()),
            );
        }
        if let Some(caps) = COUNTER_TIMER_TAG.captures(tag) {
            let (area, data_type) = if caps[1].eq_ignore_ascii_case("T") {
                (Area::Timer, DataType::Timer)
            } else {
                (Area::Counter, DataType::Counter)
            };
            let index = parse_number::<u32>(&caps[2], "index")?;
            let count = caps
                .get(3)
                .map(|m| parse_number::<usize>(m.as_str(), "count"))
                .transpose()?
                .unwrap_or(1);
            return AddressingDescriptor::new(area, 0, index, data_type, count);
        }
        Err(S7Error::InvalidData(format!("Invalid address tag: {}", s)))
    }
}

impl fmt::Display for AddressingDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.area.requires_block_number() {
            write!(f, "{}{}.", self.area, self.block_number)?;
        } else {
            write!(f, "{}", self.area)?;
        }
        match self.data_type {
            DataType::Bit if self.count == 1 => write!(f, "X{}.{}", self.byte_offset, self.bit_offset),
            DataType::Bit => write!(f, "X{}.{},{}", self.byte_offset, self.bit_offset, self.count),
            data_type => write!(f, "{:?}{},{}", data_type, self.byte_offset, self.count),
        }
    }
}
