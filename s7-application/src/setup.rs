//! Setup communication (PDU size and parallel job negotiation)

use crate::pdu::{function, Pdu};
use bytes::{BufMut, Bytes, BytesMut};
use s7_core::{S7Error, S7Result};

/// Largest PDU size the protocol allows
pub const MAX_PDU_SIZE: u16 = 960;

/// Smallest PDU size a peer may negotiate and still carry one data item
pub const MIN_PDU_SIZE: u16 = 64;

const PARAMETER_LENGTH: usize = 8;

/// Parameter block of setup communication, request and reply alike
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupCommunication {
    /// Parallel jobs the caller may have outstanding
    pub max_amq_calling: u16,
    /// Parallel jobs the callee accepts
    pub max_amq_called: u16,
    pub pdu_length: u16,
}

impl SetupCommunication {
    pub fn new(max_amq: u16, pdu_length: u16) -> Self {
        Self {
            max_amq_calling: max_amq,
            max_amq_called: max_amq,
            pdu_length,
        }
    }

    pub fn encode_parameter(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(PARAMETER_LENGTH);
        dst.put_u8(function::SETUP_COMMUNICATION);
        dst.put_u8(0x00);
        dst.put_u16(self.max_amq_calling);
        dst.put_u16(self.max_amq_called);
        dst.put_u16(self.pdu_length);
        dst.freeze()
    }

    pub fn decode_parameter(parameter: &[u8]) -> S7Result<Self> {
        if parameter.len() < PARAMETER_LENGTH || parameter[0] != function::SETUP_COMMUNICATION {
            return Err(S7Error::Protocol(format!(
                "Malformed setup communication parameter: {:02X?}",
                parameter
            )));
        }
        Ok(Self {
            max_amq_calling: u16::from_be_bytes([parameter[2], parameter[3]]),
            max_amq_called: u16::from_be_bytes([parameter[4], parameter[5]]),
            pdu_length: u16::from_be_bytes([parameter[6], parameter[7]]),
        })
    }

    pub fn request(&self, sequence: u16) -> Pdu {
        Pdu::job(sequence, self.encode_parameter(), Bytes::new())
    }

    /// Parse the reply and settle the negotiated values
    ///
    /// The PDU size is the smaller of requested and offered; a peer offering
    /// less than [`MIN_PDU_SIZE`] fails the handshake.
    pub fn negotiate(&self, reply: Pdu) -> S7Result<SetupCommunication> {
        let (parameter, _) = reply.into_ack()?;
        let offered = Self::decode_parameter(&parameter)?;
        let pdu_length = offered.pdu_length.min(self.pdu_length);
        if pdu_length < MIN_PDU_SIZE {
            return Err(S7Error::Protocol(format!(
                "Peer negotiated an unusable PDU size of {}",
                offered.pdu_length
            )));
        }
        Ok(SetupCommunication {
            max_amq_calling: offered.max_amq_calling.clamp(1, self.max_amq_calling.max(1)),
            max_amq_called: offered.max_amq_called.max(1),
            pdu_length,
        })
    }
}
