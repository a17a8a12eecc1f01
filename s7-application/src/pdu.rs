//! S7 PDU envelope
//!
//! ```text
//! 0      1        2..4      4..6      6..8        8..10      10    11
//! +------+--------+---------+---------+-----------+----------+-----+-----+
//! | 0x32 | ROSCTR | reserved| PDU ref | param len | data len |class|code |
//! +------+--------+---------+---------+-----------+----------+-----+-----+
//!                                          error fields: Ack/AckData only
//! ```
//!
//! The PDU reference is the sequence number used to correlate replies.

use bytes::{BufMut, Bytes, BytesMut};
use s7_core::{S7Error, S7Result};

pub const S7_PROTOCOL_ID: u8 = 0x32;

/// Header length of Job and UserData PDUs
pub const JOB_HEADER_LENGTH: usize = 10;

/// Header length of Ack and AckData PDUs
pub const ACK_HEADER_LENGTH: usize = 12;

/// Function codes in the first parameter byte
pub mod function {
    pub const CPU_SERVICE: u8 = 0x00;
    pub const READ_VAR: u8 = 0x04;
    pub const WRITE_VAR: u8 = 0x05;
    pub const PLC_CONTROL: u8 = 0x28;
    pub const PLC_STOP: u8 = 0x29;
    pub const SETUP_COMMUNICATION: u8 = 0xF0;
}

/// ROSCTR field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Job,
    Ack,
    AckData,
    UserData,
}

impl MessageType {
    pub fn code(&self) -> u8 {
        match self {
            MessageType::Job => 0x01,
            MessageType::Ack => 0x02,
            MessageType::AckData => 0x03,
            MessageType::UserData => 0x07,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(MessageType::Job),
            0x02 => Some(MessageType::Ack),
            0x03 => Some(MessageType::AckData),
            0x07 => Some(MessageType::UserData),
            _ => None,
        }
    }

    pub fn header_length(&self) -> usize {
        match self {
            MessageType::Ack | MessageType::AckData => ACK_HEADER_LENGTH,
            MessageType::Job | MessageType::UserData => JOB_HEADER_LENGTH,
        }
    }
}

/// A decoded S7 PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    Job {
        sequence: u16,
        parameter: Bytes,
        data: Bytes,
    },
    /// Acknowledgement without error
    Ack {
        sequence: u16,
        parameter: Bytes,
        data: Bytes,
    },
    /// Acknowledgement with data, without error
    AckData {
        sequence: u16,
        parameter: Bytes,
        data: Bytes,
    },
    /// Ack or AckData carrying a non-zero error class or code
    AckError {
        sequence: u16,
        message_type: MessageType,
        error_class: u8,
        error_code: u8,
        parameter: Bytes,
        data: Bytes,
    },
    UserData {
        sequence: u16,
        parameter: Bytes,
        data: Bytes,
    },
}

impl Pdu {
    pub fn job(sequence: u16, parameter: Bytes, data: Bytes) -> Self {
        Pdu::Job { sequence, parameter, data }
    }

    /// Sequence number (PDU reference)
    pub fn sequence(&self) -> u16 {
        match self {
            Pdu::Job { sequence, .. }
            | Pdu::Ack { sequence, .. }
            | Pdu::AckData { sequence, .. }
            | Pdu::AckError { sequence, .. }
            | Pdu::UserData { sequence, .. } => *sequence,
        }
    }

    /// Return a copy carrying another sequence number
    pub fn with_sequence(mut self, new_sequence: u16) -> Self {
        match &mut self {
            Pdu::Job { sequence, .. }
            | Pdu::Ack { sequence, .. }
            | Pdu::AckData { sequence, .. }
            | Pdu::AckError { sequence, .. }
            | Pdu::UserData { sequence, .. } => *sequence = new_sequence,
        }
        self
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Pdu::Job { .. } => MessageType::Job,
            Pdu::Ack { .. } => MessageType::Ack,
            Pdu::AckData { .. } => MessageType::AckData,
            Pdu::AckError { message_type, .. } => *message_type,
            Pdu::UserData { .. } => MessageType::UserData,
        }
    }

    fn parts(&self) -> (&Bytes, &Bytes) {
        match self {
            Pdu::Job { parameter, data, .. }
            | Pdu::Ack { parameter, data, .. }
            | Pdu::AckData { parameter, data, .. }
            | Pdu::AckError { parameter, data, .. }
            | Pdu::UserData { parameter, data, .. } => (parameter, data),
        }
    }

    /// Serialized length in bytes
    pub fn encoded_len(&self) -> usize {
        let (parameter, data) = self.parts();
        self.message_type().header_length() + parameter.len() + data.len()
    }

    /// Serialize the PDU
    ///
    /// # Errors
    ///
    /// Returns `S7Error::InvalidData` if the parameter or data block does not
    /// fit the 16-bit length fields.
    pub fn encode(&self) -> S7Result<Bytes> {
        let (parameter, data) = self.parts();
        let message_type = self.message_type();
        let param_len = u16::try_from(parameter.len()).map_err(|_| {
            S7Error::InvalidData(format!("Parameter block of {} bytes too long", parameter.len()))
        })?;
        let data_len = u16::try_from(data.len()).map_err(|_| {
            S7Error::InvalidData(format!("Data block of {} bytes too long", data.len()))
        })?;

        let mut dst = BytesMut::with_capacity(self.encoded_len());
        dst.put_u8(S7_PROTOCOL_ID);
        dst.put_u8(message_type.code());
        dst.put_u16(0x0000);
        dst.put_u16(self.sequence());
        dst.put_u16(param_len);
        dst.put_u16(data_len);
        match self {
            Pdu::AckError { error_class, error_code, .. } => {
                dst.put_u8(*error_class);
                dst.put_u8(*error_code);
            }
            Pdu::Ack { .. } | Pdu::AckData { .. } => dst.put_u16(0x0000),
            Pdu::Job { .. } | Pdu::UserData { .. } => {}
        }
        dst.put_slice(parameter);
        dst.put_slice(data);
        Ok(dst.freeze())
    }

    /// Deserialize a PDU
    ///
    /// # Errors
    ///
    /// Returns `S7Error::Protocol` for a wrong protocol id, an unknown message
    /// type, or declared lengths that disagree with the bytes present.
    pub fn decode(bytes: Bytes) -> S7Result<Self> {
        if bytes.len() < JOB_HEADER_LENGTH {
            return Err(S7Error::Protocol(format!(
                "S7 PDU too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] != S7_PROTOCOL_ID {
            return Err(S7Error::Protocol(format!(
                "Invalid S7 protocol id 0x{:02X}",
                bytes[0]
            )));
        }
        let message_type = MessageType::from_code(bytes[1]).ok_or_else(|| {
            S7Error::Protocol(format!("Unknown S7 message type 0x{:02X}", bytes[1]))
        })?;
        let header_len = message_type.header_length();
        if bytes.len() < header_len {
            return Err(S7Error::Protocol(format!(
                "S7 {:?} header truncated: {} bytes",
                message_type,
                bytes.len()
            )));
        }
        let sequence = u16::from_be_bytes([bytes[4], bytes[5]]);
        let param_len = u16::from_be_bytes([bytes[6], bytes[7]]) as usize;
        let data_len = u16::from_be_bytes([bytes[8], bytes[9]]) as usize;
        if header_len + param_len + data_len != bytes.len() {
            return Err(S7Error::Protocol(format!(
                "S7 PDU declares {} + {} + {} bytes but carries {}",
                header_len,
                param_len,
                data_len,
                bytes.len()
            )));
        }
        let parameter = bytes.slice(header_len..header_len + param_len);
        let data = bytes.slice(header_len + param_len..);

        Ok(match message_type {
            MessageType::Job => Pdu::Job { sequence, parameter, data },
            MessageType::UserData => Pdu::UserData { sequence, parameter, data },
            MessageType::Ack | MessageType::AckData => {
                let (error_class, error_code) = (bytes[10], bytes[11]);
                if error_class != 0 || error_code != 0 {
                    Pdu::AckError {
                        sequence,
                        message_type,
                        error_class,
                        error_code,
                        parameter,
                        data,
                    }
                } else if message_type == MessageType::Ack {
                    Pdu::Ack { sequence, parameter, data }
                } else {
                    Pdu::AckData { sequence, parameter, data }
                }
            }
        })
    }

    /// Unpack a reply to a job
    ///
    /// # Errors
    ///
    /// `S7Error::Remote` for an error acknowledgement, `S7Error::Protocol` if
    /// the PDU is not an acknowledgement.
    pub fn into_ack(self) -> S7Result<(Bytes, Bytes)> {
        match self {
            Pdu::Ack { parameter, data, .. } | Pdu::AckData { parameter, data, .. } => {
                Ok((parameter, data))
            }
            Pdu::AckError { error_class, error_code, .. } => Err(S7Error::Remote {
                class: error_class,
                code: error_code,
            }),
            other => Err(S7Error::Protocol(format!(
                "Expected an acknowledgement, got {:?}",
                other.message_type()
            ))),
        }
    }

    /// Unpack a userdata reply
    pub fn into_user_data(self) -> S7Result<(Bytes, Bytes)> {
        match self {
            Pdu::UserData { parameter, data, .. } => Ok((parameter, data)),
            Pdu::AckError { error_class, error_code, .. } => Err(S7Error::Remote {
                class: error_class,
                code: error_code,
            }),
            other => Err(S7Error::Protocol(format!(
                "Expected a userdata reply, got {:?}",
                other.message_type()
            ))),
        }
    }
}
