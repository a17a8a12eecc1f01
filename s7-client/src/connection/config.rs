//! Connection configuration

use s7_application::setup::{MAX_PDU_SIZE, MIN_PDU_SIZE};
use s7_core::{ConnectionType, S7Error, S7Result, Tsap};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Framing layer placed between the byte stream and TPKT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpperProtocol {
    /// Plain ISO-on-TCP
    #[default]
    None,
    /// 8-byte wrapper header in front of every frame
    Wrapper {
        source_port: u16,
        destination_port: u16,
    },
}

/// Settings of one connection
///
/// Missing fields take their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// `host` or `host:port`; the ISO-on-TCP port 102 is used if omitted
    pub address: String,
    pub rack: u8,
    pub slot: u8,
    pub connection_type: ConnectionType,
    /// Overrides the default calling TSAP
    pub local_tsap: Option<Tsap>,
    /// Overrides the called TSAP derived from rack and slot
    pub remote_tsap: Option<Tsap>,
    /// PDU size requested during setup communication
    pub pdu_size: u16,
    /// Upper bound on jobs in flight, further limited by the peer
    pub max_parallel_jobs: u16,
    /// Issue the requests of a split operation concurrently
    pub parallel: bool,
    /// Deadline for the complete handshake
    pub connect_timeout: Duration,
    /// Deadline for each request
    pub request_timeout: Duration,
    pub upper_protocol: UpperProtocol,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            rack: 0,
            slot: 2,
            connection_type: ConnectionType::Pg,
            local_tsap: None,
            remote_tsap: None,
            pdu_size: MAX_PDU_SIZE,
            max_parallel_jobs: 8,
            parallel: false,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            upper_protocol: UpperProtocol::None,
        }
    }
}

impl ConnectionConfig {
    pub fn local_tsap(&self) -> Tsap {
        self.local_tsap.unwrap_or(Tsap::LOCAL_DEFAULT)
    }

    pub fn remote_tsap(&self) -> Tsap {
        self.remote_tsap
            .unwrap_or_else(|| Tsap::remote(self.connection_type, self.rack, self.slot))
    }

    /// Check the settings before connecting
    ///
    /// # Errors
    ///
    /// Returns `S7Error::InvalidData` naming the first invalid field.
    pub fn validate(&self) -> S7Result<()> {
        if !(MIN_PDU_SIZE..=MAX_PDU_SIZE).contains(&self.pdu_size) {
            return Err(S7Error::InvalidData(format!(
                "PDU size must be within [{}, {}], got {}",
                MIN_PDU_SIZE, MAX_PDU_SIZE, self.pdu_size
            )));
        }
        if self.max_parallel_jobs == 0 {
            return Err(S7Error::InvalidData(
                "At least one parallel job is required".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(S7Error::InvalidData("Timeouts must not be zero".to_string()));
        }
        if self.rack > 7 || self.slot > 31 {
            return Err(S7Error::InvalidData(format!(
                "Rack {} / slot {} out of range",
                self.rack, self.slot
            )));
        }
        Ok(())
    }
}
