//! Transport service access points

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection resource type, the high byte of the remote TSAP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionType {
    /// Programming device
    #[default]
    Pg,
    /// Operator panel
    Op,
    /// Basic S7 connection
    Basic,
}

impl ConnectionType {
    pub fn code(&self) -> u8 {
        match self {
            ConnectionType::Pg => 0x01,
            ConnectionType::Op => 0x02,
            ConnectionType::Basic => 0x03,
        }
    }
}

/// A TSAP as carried in the COTP connection request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tsap(pub u16);

impl Tsap {
    /// Default calling TSAP of a client
    pub const LOCAL_DEFAULT: Tsap = Tsap(0x0100);

    /// Called TSAP addressing the CPU in `rack`/`slot`
    pub fn remote(connection_type: ConnectionType, rack: u8, slot: u8) -> Self {
        let station = (rack as u16) * 0x20 + slot as u16;
        Tsap(((connection_type.code() as u16) << 8) | (station & 0xFF))
    }

    pub fn to_be_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Tsap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}.{:02X}", self.0 >> 8, self.0 & 0xFF)
    }
}
