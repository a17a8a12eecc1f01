//! Stream accessor trait for the transport layer

use crate::error::{S7Error, S7Result};
use async_trait::async_trait;
use std::time::Duration;

/// Stream accessor interface to a byte stream connected to a controller
///
/// `read` must be cancel safe: dropping a pending `read` future must not lose
/// bytes. The session driver relies on this when it races reads against
/// outgoing requests.
#[async_trait]
pub trait StreamAccessor: Send + Sync {
    /// Set the I/O timeout
    ///
    /// # Arguments
    ///
    /// * `timeout` - The timeout duration. None means infinite timeout.
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> S7Result<()>;

    /// Read data from the stream
    ///
    /// # Returns
    ///
    /// Number of bytes read, or 0 at end of stream
    async fn read(&mut self, buf: &mut [u8]) -> S7Result<usize>;

    /// Write data to the stream
    ///
    /// # Returns
    ///
    /// Number of bytes written
    async fn write(&mut self, buf: &[u8]) -> S7Result<usize>;

    /// Write all data to the stream
    async fn write_all(&mut self, buf: &[u8]) -> S7Result<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..]).await?;
            if n == 0 {
                return Err(S7Error::io(
                    std::io::ErrorKind::WriteZero,
                    "Failed to write all data",
                ));
            }
            written += n;
        }
        Ok(())
    }

    /// Flush any buffered data
    async fn flush(&mut self) -> S7Result<()>;

    /// Check if the stream is closed
    fn is_closed(&self) -> bool;

    /// Close the stream
    async fn close(&mut self) -> S7Result<()>;
}

/// Transport layer trait that extends StreamAccessor
#[async_trait]
pub trait TransportLayer: StreamAccessor + std::fmt::Debug {
    /// Open the physical connection
    async fn open(&mut self) -> S7Result<()>;
}
