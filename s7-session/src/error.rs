//! Session errors are the crate-wide S7 errors

pub use s7_core::error::{S7Error, S7Result};
