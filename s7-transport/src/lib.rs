//! Transport layer module for the S7 protocol
//!
//! This crate provides the byte-stream transports the session layer runs on:
//! TCP (ISO-on-TCP, port 102) and an in-memory duplex stream.

pub mod duplex;
pub mod error;
pub mod stream;
pub mod tcp;

pub use duplex::DuplexTransport;
pub use error::{S7Error, S7Result};
pub use stream::{StreamAccessor, TransportLayer};
pub use tcp::{TcpSettings, TcpTransport, ISO_TCP_PORT};
