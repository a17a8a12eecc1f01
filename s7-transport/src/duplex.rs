//! In-memory transport over a tokio duplex pipe
//!
//! Used to run a session against an in-process peer without sockets.

use crate::error::{S7Error, S7Result};
use crate::stream::{StreamAccessor, TransportLayer};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Transport over one end of a [`tokio::io::duplex`] pipe
///
/// The pipe is connected from the start; `open` only succeeds once, since a
/// closed pipe cannot be re-established.
#[derive(Debug)]
pub struct DuplexTransport {
    stream: Option<DuplexStream>,
    opened: bool,
}

impl DuplexTransport {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream: Some(stream),
            opened: false,
        }
    }

    /// Create a transport and the peer end of its pipe
    pub fn pair(max_buf_size: usize) -> (Self, DuplexStream) {
        let (local, remote) = tokio::io::duplex(max_buf_size);
        (Self::new(local), remote)
    }

    fn stream_mut(&mut self) -> S7Result<&mut DuplexStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| S7Error::io(std::io::ErrorKind::NotConnected, "Duplex pipe closed"))
    }
}

#[async_trait]
impl TransportLayer for DuplexTransport {
    async fn open(&mut self) -> S7Result<()> {
        if self.stream.is_none() {
            return Err(S7Error::io(
                std::io::ErrorKind::NotConnected,
                "Duplex pipe cannot be reopened",
            ));
        }
        if self.opened {
            return Err(S7Error::io(
                std::io::ErrorKind::InvalidInput,
                "Connection has already been opened",
            ));
        }
        self.opened = true;
        Ok(())
    }
}

#[async_trait]
impl StreamAccessor for DuplexTransport {
    async fn set_timeout(&mut self, _timeout: Option<Duration>) -> S7Result<()> {
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> S7Result<usize> {
        Ok(self.stream_mut()?.read(buf).await?)
    }

    async fn write(&mut self, buf: &[u8]) -> S7Result<usize> {
        Ok(self.stream_mut()?.write(buf).await?)
    }

    async fn flush(&mut self) -> S7Result<()> {
        Ok(self.stream_mut()?.flush().await?)
    }

    fn is_closed(&self) -> bool {
        !self.opened || self.stream.is_none()
    }

    async fn close(&mut self) -> S7Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.opened = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_roundtrip() {
        let (mut transport, mut peer) = DuplexTransport::pair(64);
        assert!(transport.is_closed());
        transport.open().await.unwrap();
        transport.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        transport.close().await.unwrap();
        assert!(transport.open().await.is_err());
    }
}
