//! Session layer module for the S7 protocol
//!
//! This crate provides ISO-on-TCP framing (TPKT, RFC 1006) and the COTP
//! transport protocol class 0, the pluggable upper protocol handler that sits
//! between the byte stream and TPKT, and the `Link` that combines them into a
//! transport for S7 PDUs. It also carries the connection state machine and
//! session statistics shared with the client.

pub mod error;
pub mod frame;
pub mod handler;
pub mod link;
pub mod state;
pub mod statistics;
pub mod wrapper;

pub use error::{S7Error, S7Result};
pub use frame::cotp::{CotpConnection, CotpPdu};
pub use frame::tpkt::{TpktCodec, TPKT_HEADER_LENGTH};
pub use handler::{NullUpperProtocolHandler, UpperProtocolHandler};
pub use link::Link;
pub use state::ConnectionState;
pub use statistics::SessionStatistics;
pub use wrapper::{WrapperHandler, WrapperHeader, WRAPPER_HEADER_LENGTH};
