//! Connection state machine

use crate::error::{S7Error, S7Result};
use std::fmt;

/// Connection state
///
/// # State Transitions
/// ```text
/// Disconnected -> CotpConnecting       (connect requested)
/// CotpConnecting -> CotpConnected      (COTP CC received)
/// CotpConnected -> NegotiatingPduSize  (setup communication sent)
/// NegotiatingPduSize -> Ready          (setup communication acknowledged)
/// Ready -> Disconnecting               (disconnect requested)
/// Disconnecting -> Disconnected
/// any state -> Disconnected            (transport or protocol failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport connection (initial state)
    #[default]
    Disconnected,
    /// Transport open, COTP connection request sent
    CotpConnecting,
    /// COTP connection confirmed
    CotpConnected,
    /// S7 setup communication in progress
    NegotiatingPduSize,
    /// PDU size negotiated; requests may be issued
    Ready,
    /// Orderly teardown in progress
    Disconnecting,
}

impl ConnectionState {
    /// Check if the connection is ready for requests
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    /// Check if a handshake is running
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::CotpConnecting
                | ConnectionState::CotpConnected
                | ConnectionState::NegotiatingPduSize
        )
    }

    /// Validate state transition
    ///
    /// # Errors
    ///
    /// Returns `S7Error::Protocol` for a transition the lifecycle does not allow.
    pub fn validate_transition(&self, new_state: ConnectionState) -> S7Result<()> {
        use ConnectionState::*;
        let valid = match (*self, new_state) {
            (_, Disconnected) => true,
            (Disconnected, CotpConnecting) => true,
            (CotpConnecting, CotpConnected) => true,
            (CotpConnected, NegotiatingPduSize) => true,
            (NegotiatingPduSize, Ready) => true,
            (Ready, Disconnecting) => true,
            _ => false,
        };

        if valid {
            Ok(())
        } else {
            Err(S7Error::Protocol(format!(
                "Invalid state transition: {} -> {}",
                self, new_state
            )))
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::CotpConnecting => "CotpConnecting",
            ConnectionState::CotpConnected => "CotpConnected",
            ConnectionState::NegotiatingPduSize => "NegotiatingPduSize",
            ConnectionState::Ready => "Ready",
            ConnectionState::Disconnecting => "Disconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
