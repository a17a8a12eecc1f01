//! TCP transport implementation

use crate::error::{S7Error, S7Result};
use crate::stream::{StreamAccessor, TransportLayer};
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Well-known ISO-on-TCP port
pub const ISO_TCP_PORT: u16 = 102;

/// Wrapper for TcpStream that implements Debug
struct DebugTcpStream(TcpStream);

impl fmt::Debug for DebugTcpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let peer = self.0.peer_addr().ok();
        f.debug_struct("TcpStream").field("peer", &peer).finish()
    }
}

/// TCP transport layer settings
#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub address: SocketAddr,
    /// Applied to connection establishment and writes
    pub timeout: Option<Duration>,
    pub nodelay: bool,
}

impl TcpSettings {
    /// Create new TCP settings
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            timeout: Some(Duration::from_secs(10)),
            nodelay: true,
        }
    }

    /// Create TCP settings with timeout
    pub fn with_timeout(address: SocketAddr, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::new(address)
        }
    }
}

/// TCP transport layer implementation
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<DebugTcpStream>,
    settings: TcpSettings,
    closed: bool,
}

impl TcpTransport {
    /// Create a new TCP transport layer
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            stream: None,
            settings,
            closed: true,
        }
    }

    /// Create TCP transport from an address string
    ///
    /// A bare host gets the ISO-on-TCP port appended.
    pub fn from_address(address: &str) -> S7Result<Self> {
        let addr: SocketAddr = match address.parse() {
            Ok(addr) => addr,
            Err(_) => format!("{}:{}", address, ISO_TCP_PORT)
                .parse()
                .map_err(|e| S7Error::InvalidData(format!("Invalid TCP address: {}", e)))?,
        };
        Ok(Self::new(TcpSettings::new(addr)))
    }

    pub fn settings(&self) -> &TcpSettings {
        &self.settings
    }

    fn stream_mut(&mut self) -> S7Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .map(|s| &mut s.0)
            .ok_or_else(|| S7Error::io(std::io::ErrorKind::NotConnected, "TCP stream not connected"))
    }
}

#[async_trait]
impl TransportLayer for TcpTransport {
    async fn open(&mut self) -> S7Result<()> {
        if !self.closed {
            return Err(S7Error::io(
                std::io::ErrorKind::InvalidInput,
                "Connection has already been opened",
            ));
        }

        let stream = match self.settings.timeout {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(self.settings.address))
                .await
                .map_err(|_| S7Error::Timeout)??,
            None => TcpStream::connect(self.settings.address).await?,
        };
        stream.set_nodelay(self.settings.nodelay)?;
        log::debug!("TCP connected to {}", self.settings.address);

        self.stream = Some(DebugTcpStream(stream));
        self.closed = false;
        Ok(())
    }
}

#[async_trait]
impl StreamAccessor for TcpTransport {
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> S7Result<()> {
        self.settings.timeout = timeout;
        Ok(())
    }

    // No read timeout: reads wait for the peer and deadlines are enforced per
    // request above this layer. `TcpStream::read` is cancel safe.
    async fn read(&mut self, buf: &mut [u8]) -> S7Result<usize> {
        let result = self.stream_mut()?.read(buf).await;
        match result {
            Ok(0) => {
                self.closed = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                self.closed = true;
                Err(e.into())
            }
        }
    }

    async fn write(&mut self, buf: &[u8]) -> S7Result<usize> {
        let timeout = self.settings.timeout;
        let stream = self.stream_mut()?;
        match timeout {
            Some(timeout) => Ok(tokio::time::timeout(timeout, stream.write(buf))
                .await
                .map_err(|_| S7Error::Timeout)??),
            None => Ok(stream.write(buf).await?),
        }
    }

    async fn flush(&mut self) -> S7Result<()> {
        Ok(self.stream_mut()?.flush().await?)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> S7Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.0.shutdown().await;
        }
        self.closed = true;
        Ok(())
    }
}
