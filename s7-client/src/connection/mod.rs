//! Connection management module

pub mod blocking;
pub mod builder;
pub mod config;
pub mod connection;
pub mod s7_connection;

pub use blocking::BlockingConnection;
pub use builder::ConnectionBuilder;
pub use config::{ConnectionConfig, UpperProtocol};
pub use connection::Connection;
pub use s7_connection::S7Connection;
