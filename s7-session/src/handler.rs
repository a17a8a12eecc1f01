//! Upper protocol handler: optional framing between the byte stream and TPKT
//!
//! Every connection owns exactly one handler, injected when the connection is
//! built. Outgoing TPKT frames pass through [`UpperProtocolHandler::add_frame`]
//! before they reach the transport; incoming bytes pass through
//! [`UpperProtocolHandler::remove_frame`] before the TPKT codec sees them.

use crate::error::S7Result;
use bytes::{Bytes, BytesMut};
use std::fmt;

/// Framing layer below COTP
pub trait UpperProtocolHandler: Send + Sync + fmt::Debug {
    /// Called after the transport is opened
    fn connect(&mut self) -> S7Result<()> {
        Ok(())
    }

    /// Wrap one outgoing TPKT frame
    fn add_frame(&mut self, frame: Bytes) -> S7Result<Bytes>;

    /// Unwrap incoming bytes
    ///
    /// Consumes what it can from `src` and returns the unwrapped bytes, or
    /// `Ok(None)` when more input is needed.
    fn remove_frame(&mut self, src: &mut BytesMut) -> S7Result<Option<BytesMut>>;

    /// Called before the transport is closed
    fn shutdown(&mut self) {}
}

/// Identity handler: bytes pass through unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct NullUpperProtocolHandler;

impl NullUpperProtocolHandler {
    pub fn new() -> Self {
        Self
    }
}

impl UpperProtocolHandler for NullUpperProtocolHandler {
    fn add_frame(&mut self, frame: Bytes) -> S7Result<Bytes> {
        Ok(frame)
    }

    fn remove_frame(&mut self, src: &mut BytesMut) -> S7Result<Option<BytesMut>> {
        if src.is_empty() {
            Ok(None)
        } else {
            Ok(Some(src.split()))
        }
    }
}
