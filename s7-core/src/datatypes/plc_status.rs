//! CPU operating state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating state reported by the CPU status list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlcStatus {
    Unknown,
    Run,
    Stop,
}

impl PlcStatus {
    /// Map the status byte of SZL 0x0424
    pub fn from_status_byte(byte: u8) -> Self {
        match byte {
            0x08 => PlcStatus::Run,
            0x04 => PlcStatus::Stop,
            _ => PlcStatus::Unknown,
        }
    }
}

impl fmt::Display for PlcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PlcStatus::Unknown => "Unknown",
            PlcStatus::Run => "Run",
            PlcStatus::Stop => "Stop",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_byte() {
        assert_eq!(PlcStatus::from_status_byte(0x08), PlcStatus::Run);
        assert_eq!(PlcStatus::from_status_byte(0x04), PlcStatus::Stop);
        assert_eq!(PlcStatus::from_status_byte(0x00), PlcStatus::Unknown);
    }
}
