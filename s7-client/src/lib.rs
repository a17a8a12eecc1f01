//! S7 client implementation
//!
//! This crate connects to S7 controllers over ISO-on-TCP: it runs the COTP
//! and setup communication handshake, correlates concurrent requests with
//! their replies, splits reads and writes that exceed the negotiated PDU size
//! and exposes the PLC control, clock, status and block info services.
//!
//! # TODO
//!
//! ## 连接管理
//! - [x] 连接构建器（Builder）模式实现
//! - [x] COTP 连接与 PDU 协商
//! - [x] 连接状态管理与状态订阅
//! - [x] 阻塞式封装
//! - [ ] 自动重连机制
//!
//! ## 客户端功能
//! - [x] 变量读写（自动拆分与重组）
//! - [x] 并发请求与序号匹配
//! - [x] PLC 启停、时钟、状态、块信息

pub mod connection;
pub mod dispatcher;
mod driver;
pub mod state;

#[cfg(test)]
mod testing;

pub use connection::{
    BlockingConnection, Connection, ConnectionBuilder, ConnectionConfig, S7Connection,
    UpperProtocol,
};
pub use s7_session::{ConnectionState, SessionStatistics};
