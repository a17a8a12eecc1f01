//! Per-item return codes carried in read/write acknowledgements

use serde::{Deserialize, Serialize};
use std::fmt;

/// Return code of a single data item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnCode {
    /// Reserved (0x00), sent by some peers in place of an error
    Reserved,
    /// Hardware fault (0x01)
    HardwareFault,
    /// Accessing the object not allowed (0x03)
    AccessDenied,
    /// Invalid address (0x05)
    AddressOutOfRange,
    /// Data type not supported (0x06)
    DataTypeNotSupported,
    /// Data type inconsistent (0x07)
    DataTypeInconsistent,
    /// Object does not exist (0x0A)
    ObjectDoesNotExist,
    /// Object not available (0x0B)
    ObjectNotAvailable,
    /// Success (0xFF)
    Success,
    /// Any other code
    Unknown(u8),
}

impl ReturnCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0x00 => ReturnCode::Reserved,
            0x01 => ReturnCode::HardwareFault,
            0x03 => ReturnCode::AccessDenied,
            0x05 => ReturnCode::AddressOutOfRange,
            0x06 => ReturnCode::DataTypeNotSupported,
            0x07 => ReturnCode::DataTypeInconsistent,
            0x0A => ReturnCode::ObjectDoesNotExist,
            0x0B => ReturnCode::ObjectNotAvailable,
            0xFF => ReturnCode::Success,
            other => ReturnCode::Unknown(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ReturnCode::Reserved => 0x00,
            ReturnCode::HardwareFault => 0x01,
            ReturnCode::AccessDenied => 0x03,
            ReturnCode::AddressOutOfRange => 0x05,
            ReturnCode::DataTypeNotSupported => 0x06,
            ReturnCode::DataTypeInconsistent => 0x07,
            ReturnCode::ObjectDoesNotExist => 0x0A,
            ReturnCode::ObjectNotAvailable => 0x0B,
            ReturnCode::Success => 0xFF,
            ReturnCode::Unknown(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReturnCode::Success)
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReturnCode::Reserved => "reserved",
            ReturnCode::HardwareFault => "hardware fault",
            ReturnCode::AccessDenied => "access denied",
            ReturnCode::AddressOutOfRange => "address out of range",
            ReturnCode::DataTypeNotSupported => "data type not supported",
            ReturnCode::DataTypeInconsistent => "data type inconsistent",
            ReturnCode::ObjectDoesNotExist => "object does not exist",
            ReturnCode::ObjectNotAvailable => "object not available",
            ReturnCode::Success => "success",
            ReturnCode::Unknown(code) => return write!(f, "unknown return code 0x{:02X}", code),
        };
        f.write_str(text)
    }
}
