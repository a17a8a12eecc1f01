//! Core types and utilities for the S7 protocol
//!
//! This crate provides the error type, memory areas, element data types,
//! return codes, addressing descriptors and PLC date/time values shared by
//! every layer of the S7 implementation.

pub mod address;
pub mod area;
pub mod datatypes;
pub mod error;
pub mod return_code;
pub mod tsap;

pub use address::AddressingDescriptor;
pub use area::{Area, DataType};
pub use datatypes::{BlockType, PlcDateTime, PlcStatus};
pub use error::{ErrorCategory, S7Error, S7Result};
pub use return_code::ReturnCode;
pub use tsap::{ConnectionType, Tsap};
