//! Connection builder for the S7 client
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use s7_client::connection::ConnectionBuilder;
//! use s7_core::ConnectionType;
//! use std::time::Duration;
//!
//! # fn demo() -> s7_core::S7Result<()> {
//! let conn = ConnectionBuilder::new()
//!     .tcp("192.168.0.10")
//!     .rack_slot(0, 1)
//!     .connection_type(ConnectionType::Op)
//!     .pdu_size(480)
//!     .request_timeout(Duration::from_secs(2))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use super::config::{ConnectionConfig, UpperProtocol};
use super::S7Connection;
use s7_core::{ConnectionType, S7Error, S7Result, Tsap};
use s7_transport::TransportLayer;
use std::time::Duration;

/// Connection builder for creating S7 connections
///
/// # Configuration Flow
/// 1. Create builder with `ConnectionBuilder::new()`
/// 2. Configure the target (`tcp()`), or supply a transport later
/// 3. Configure addressing (`rack_slot()` or explicit `tsaps()`)
/// 4. Tune PDU size, parallelism and deadlines
/// 5. Build with `build()` or `build_with_transport()`
#[derive(Debug, Clone, Default)]
pub struct ConnectionBuilder {
    config: ConnectionConfig,
}

impl ConnectionBuilder {
    /// Create a new connection builder with default settings
    ///
    /// # Default Settings
    /// - Rack 0, slot 2, PG connection
    /// - PDU size: 960 bytes
    /// - Parallel jobs: 8, requests issued sequentially
    /// - Connect timeout 10 s, request timeout 5 s
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn from_config(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Configure the TCP target, `host` or `host:port`
    pub fn tcp(mut self, address: &str) -> Self {
        self.config.address = address.to_string();
        self
    }

    /// Configure rack and slot of the CPU
    pub fn rack_slot(mut self, rack: u8, slot: u8) -> Self {
        self.config.rack = rack;
        self.config.slot = slot;
        self
    }

    pub fn connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.config.connection_type = connection_type;
        self
    }

    /// Use explicit TSAPs instead of the ones derived from rack and slot
    pub fn tsaps(mut self, local: Tsap, remote: Tsap) -> Self {
        self.config.local_tsap = Some(local);
        self.config.remote_tsap = Some(remote);
        self
    }

    /// PDU size requested during setup; the controller may grant less
    pub fn pdu_size(mut self, size: u16) -> Self {
        self.config.pdu_size = size;
        self
    }

    pub fn max_parallel_jobs(mut self, jobs: u16) -> Self {
        self.config.max_parallel_jobs = jobs;
        self
    }

    /// Issue the requests of a split read or write concurrently
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.config.parallel = enabled;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Put the 8-byte wrapper header in front of every frame
    pub fn wrapper(mut self, source_port: u16, destination_port: u16) -> Self {
        self.config.upper_protocol = UpperProtocol::Wrapper {
            source_port,
            destination_port,
        };
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Build a TCP connection
    ///
    /// # Errors
    /// Returns error if no address was configured or a setting is invalid
    pub fn build(self) -> S7Result<S7Connection> {
        if self.config.address.is_empty() {
            return Err(S7Error::InvalidData(
                "TCP address must be configured".to_string(),
            ));
        }
        S7Connection::from_config(self.config)
    }

    /// Build a connection over a caller supplied transport
    ///
    /// # Errors
    /// Returns error if a setting is invalid
    pub fn build_with_transport(self, transport: Box<dyn TransportLayer>) -> S7Result<S7Connection> {
        self.config.validate()?;
        Ok(S7Connection::with_transport(self.config, transport))
    }
}
