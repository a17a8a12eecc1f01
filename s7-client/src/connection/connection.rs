//! Connection trait for S7 client operations
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use s7_client::connection::{Connection, ConnectionBuilder};
//! use s7_core::AddressingDescriptor;
//!
//! # async fn demo() -> s7_core::S7Result<()> {
//! let conn = ConnectionBuilder::new().tcp("192.168.0.10").rack_slot(0, 2).build()?;
//! conn.connect().await?;
//!
//! let tag: AddressingDescriptor = "DB1.DBW4".parse()?;
//! let values = conn.read(&[tag]).await?;
//!
//! conn.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use s7_core::{AddressingDescriptor, S7Result};

/// Variable access on an S7 connection
///
/// Both operations keep the caller's item order in their results. The outer
/// result fails only when the request as a whole failed (transport, protocol,
/// timeout or an error acknowledgement); item level errors are reported per
/// item and leave the connection usable.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Establish the connection: transport, COTP and setup communication
    ///
    /// # Errors
    /// `S7Error::ConnectInProgress` if another connect is already running
    async fn connect(&self) -> S7Result<()>;

    /// Close the connection; calling it again is a no-op
    async fn disconnect(&self) -> S7Result<()>;

    /// Check if requests can be issued
    fn is_ready(&self) -> bool;

    /// Read the data addressed by each descriptor
    async fn read(&self, descriptors: &[AddressingDescriptor]) -> S7Result<Vec<S7Result<Bytes>>>;

    /// Write one payload per descriptor
    ///
    /// # Errors
    /// `S7Error::InvalidData` if a payload length differs from the
    /// descriptor's length; nothing is sent in that case
    async fn write(&self, items: &[(AddressingDescriptor, Bytes)]) -> S7Result<Vec<S7Result<()>>>;
}
