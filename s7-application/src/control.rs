//! PLC control services: run state and memory management
//!
//! Stop uses function 0x29; every other service is a PI service call (0x28)
//! naming the program invocation and its argument block.

use crate::pdu::{function, Pdu};
use bytes::{BufMut, Bytes, BytesMut};
use s7_core::{S7Error, S7Result};

const PI_PROGRAM: &[u8] = b"P_PROGRAM";
const PI_COPY_RAM_TO_ROM: &[u8] = b"_MODU";
const PI_COMPRESS: &[u8] = b"_GARB";

/// Second parameter byte of a stop reply when the CPU was already stopped
const ALREADY_STOPPED: u8 = 0x07;

/// Second parameter byte of a start reply when the CPU was already running
const ALREADY_RUNNING: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlcControl {
    /// Warm restart
    HotStart,
    ColdStart,
    Stop,
    /// Copy RAM to ROM (retentive storage)
    CopyRamToRom,
    /// Compress the work memory
    Compress,
}

impl PlcControl {
    /// Function code in the first parameter byte
    pub fn function(&self) -> u8 {
        match self {
            PlcControl::Stop => function::PLC_STOP,
            _ => function::PLC_CONTROL,
        }
    }

    pub fn parameter(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(32);
        dst.put_u8(self.function());
        let (argument, service): (&[u8], &[u8]) = match self {
            PlcControl::Stop => {
                dst.put_slice(&[0x00, 0x00, 0x00, 0x00, 0x00]);
                put_name(&mut dst, PI_PROGRAM);
                return dst.freeze();
            }
            PlcControl::HotStart => (&[], PI_PROGRAM),
            PlcControl::ColdStart => (b"C ", PI_PROGRAM),
            PlcControl::CopyRamToRom => (b"EP", PI_COPY_RAM_TO_ROM),
            PlcControl::Compress => (&[], PI_COMPRESS),
        };

        dst.put_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFD]);
        dst.put_u16(argument.len() as u16);
        dst.put_slice(argument);
        put_name(&mut dst, service);
        dst.freeze()
    }

    pub fn request(&self, sequence: u16) -> Pdu {
        Pdu::job(sequence, self.parameter(), Bytes::new())
    }

    /// Check the acknowledgement of a control job
    ///
    /// An acknowledgement echoing the function code counts as success,
    /// including the replies for a CPU that was already in the requested
    /// state.
    ///
    /// # Errors
    ///
    /// `S7Error::Remote` for an error acknowledgement, `S7Error::Protocol`
    /// for a reply to a different function.
    pub fn check_response(&self, reply: Pdu) -> S7Result<()> {
        let (parameter, _) = reply.into_ack()?;
        match parameter.first() {
            Some(code) if *code == self.function() => {
                match (self, parameter.get(1).copied()) {
                    (PlcControl::Stop, Some(ALREADY_STOPPED)) => {
                        log::info!("PLC was already stopped");
                    }
                    (PlcControl::HotStart | PlcControl::ColdStart, Some(ALREADY_RUNNING)) => {
                        log::info!("PLC was already running");
                    }
                    _ => log::debug!("{:?} acknowledged", self),
                }
                Ok(())
            }
            _ => Err(S7Error::Protocol(format!(
                "{:?} answered with parameter {:02X?}",
                self, parameter
            ))),
        }
    }
}

fn put_name(dst: &mut BytesMut, name: &[u8]) {
    dst.put_u8(name.len() as u8);
    dst.put_slice(name);
}
