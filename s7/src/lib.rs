//! s7_rs - Rust implementation of the S7 communication protocol
//!
//! This library talks to S7 controllers over ISO-on-TCP (RFC 1006, COTP
//! class 0) on port 102.
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `s7-core`: Core types, error handling, addressing and date/time values
//! - `s7-transport`: Transport layer (TCP, in-memory duplex)
//! - `s7-session`: Session layer (TPKT, COTP, wrapper framing, link)
//! - `s7-application`: Application layer (S7 PDUs, items, splitting, services)
//! - `s7-client`: Client implementation
//!
//! # Implementation Status
//!
//! ## ✅ 已完成
//! - TPKT/COTP 帧编解码
//! - S7 PDU 编解码与 PDU 大小协商
//! - 变量读写（位、字节、字、双字、计数器、定时器）
//! - 超出 PDU 的请求自动拆分与重组
//! - 并发请求（序号匹配、超时、取消）
//! - PLC 启停、时钟读写、运行状态、块信息
//!
//! ## 📋 待实现
//! - 自动重连
//!
//! # Usage
//!
//! ```no_run
//! use s7::client::{Connection, ConnectionBuilder};
//!
//! # async fn demo() -> s7::S7Result<()> {
//! let conn = ConnectionBuilder::new().tcp("192.168.0.10").rack_slot(0, 2).build()?;
//! conn.connect().await?;
//! let values = conn.read(&["DB1.DBD0".parse()?]).await?;
//! conn.disconnect().await?;
//! # Ok(())
//! # }
//! ```

// Re-export core types
pub use s7_core::{
    AddressingDescriptor, Area, BlockType, ConnectionType, DataType, ErrorCategory, PlcDateTime,
    PlcStatus, ReturnCode, S7Error, S7Result, Tsap,
};

// Re-export client API
pub mod client {
    pub use s7_client::*;
}

// Re-export protocol layers
pub mod application {
    pub use s7_application::*;
}

pub mod session {
    pub use s7_session::*;
}

pub mod transport {
    pub use s7_transport::*;
}
