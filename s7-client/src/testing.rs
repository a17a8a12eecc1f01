//! In-process controller used by the client tests
//!
//! Speaks COTP and S7 over any byte stream: setup communication, variable
//! read/write against a sparse memory image, run state control and the
//! clock, block info and status userdata services. Knobs let tests mute
//! replies, reorder them or drop the connection.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use s7_application::item::{
    decode_read_var_parameter, decode_write_var_request, encode_read_response,
    encode_write_response,
};
use s7_application::pdu::function;
use s7_application::userdata::{group, subfunction};
use s7_application::{BlockInfo, DataItem, Pdu, SetupCommunication, UserDataRequest, UserDataResponse};
use s7_core::{AddressingDescriptor, Area, DataType, PlcDateTime, PlcStatus, ReturnCode, S7Error, S7Result, Tsap};
use s7_session::{CotpConnection, CotpPdu, TpktCodec};
use s7_transport::DuplexTransport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

/// Data block that does not exist on the fake controller
pub(crate) const MISSING_DB: u16 = 999;

/// Block number the fake reports as missing in block info requests
pub(crate) const MISSING_BLOCK: u16 = 404;

#[derive(Debug)]
pub(crate) struct FakePlc {
    /// PDU size offered during setup
    pub(crate) pdu_size: u16,
    pub(crate) max_amq: u16,
    memory: Mutex<HashMap<(Area, u16), Vec<u8>>>,
    status: Mutex<PlcStatus>,
    clock: Mutex<PlcDateTime>,
    /// Jobs are received but never answered
    pub(crate) mute: AtomicBool,
    /// Drop the connection after this many jobs, not counting setup
    pub(crate) close_after: Mutex<Option<usize>>,
    /// Collect this many replies and send them in reverse order
    pub(crate) batch_replies: AtomicUsize,
    pub(crate) jobs: AtomicUsize,
    pub(crate) max_request: AtomicUsize,
    pub(crate) max_reply: AtomicUsize,
    pub(crate) called_tsap: Mutex<Option<Tsap>>,
}

impl FakePlc {
    pub(crate) fn new(pdu_size: u16) -> Arc<Self> {
        Arc::new(Self {
            pdu_size,
            max_amq: 8,
            memory: Mutex::new(HashMap::new()),
            status: Mutex::new(PlcStatus::Run),
            clock: Mutex::new(PlcDateTime::new(2024, 3, 15, 8, 30, 0, 0).unwrap()),
            mute: AtomicBool::new(false),
            close_after: Mutex::new(None),
            batch_replies: AtomicUsize::new(0),
            jobs: AtomicUsize::new(0),
            max_request: AtomicUsize::new(0),
            max_reply: AtomicUsize::new(0),
            called_tsap: Mutex::new(None),
        })
    }

    /// Start serving one end of an in-memory pipe; returns the other end
    pub(crate) fn spawn_duplex(self: &Arc<Self>) -> DuplexTransport {
        let (transport, remote) = DuplexTransport::pair(64 * 1024);
        let plc = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = plc.serve(remote).await {
                log::debug!("Fake PLC stopped: {}", e);
            }
        });
        transport
    }

    pub(crate) fn fill(&self, area: Area, db: u16, offset: usize, bytes: &[u8]) {
        let mut memory = self.memory.lock().unwrap();
        let image = memory.entry((area, db)).or_default();
        if image.len() < offset + bytes.len() {
            image.resize(offset + bytes.len(), 0);
        }
        image[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub(crate) fn peek(&self, area: Area, db: u16, offset: usize, len: usize) -> Vec<u8> {
        let memory = self.memory.lock().unwrap();
        let image = memory.get(&(area, db)).cloned().unwrap_or_default();
        (offset..offset + len)
            .map(|i| image.get(i).copied().unwrap_or(0))
            .collect()
    }

    pub(crate) fn status(&self) -> PlcStatus {
        *self.status.lock().unwrap()
    }

    pub(crate) fn set_status(&self, status: PlcStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub(crate) fn clock(&self) -> PlcDateTime {
        *self.clock.lock().unwrap()
    }

    pub(crate) async fn serve<S>(self: Arc<Self>, stream: S) -> S7Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, TpktCodec::new());
        let mut held: Vec<Bytes> = Vec::new();
        while let Some(frame) = framed.next().await {
            let payload = match CotpPdu::decode(frame?)? {
                CotpPdu::ConnectionRequest(request) => {
                    *self.called_tsap.lock().unwrap() = request.called_tsap;
                    let confirm = CotpConnection {
                        dst_ref: request.src_ref,
                        src_ref: 0x0044,
                        ..request
                    };
                    framed.send(CotpPdu::ConnectionConfirm(confirm).encode()).await?;
                    continue;
                }
                CotpPdu::DisconnectRequest { .. } => break,
                CotpPdu::Data { payload, .. } => payload,
                other => {
                    return Err(S7Error::Protocol(format!("Fake PLC got {:?}", other)));
                }
            };

            self.max_request.fetch_max(payload.len(), Ordering::SeqCst);
            let request = Pdu::decode(payload)?;
            let is_setup = matches!(
                &request,
                Pdu::Job { parameter, .. } if parameter.first() == Some(&function::SETUP_COMMUNICATION)
            );
            if !is_setup {
                let jobs = self.jobs.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(limit) = *self.close_after.lock().unwrap() {
                    if jobs > limit {
                        return Ok(());
                    }
                }
                if self.mute.load(Ordering::SeqCst) {
                    continue;
                }
            }

            let reply = self.handle(request)?.encode()?;
            self.max_reply.fetch_max(reply.len(), Ordering::SeqCst);
            let batch = self.batch_replies.load(Ordering::SeqCst);
            if batch > 1 && !is_setup {
                held.push(reply);
                if held.len() < batch {
                    continue;
                }
                while let Some(reply) = held.pop() {
                    framed.send(CotpPdu::data(reply).encode()).await?;
                }
            } else {
                framed.send(CotpPdu::data(reply).encode()).await?;
            }
        }
        Ok(())
    }

    fn handle(&self, request: Pdu) -> S7Result<Pdu> {
        match request {
            Pdu::Job { sequence, parameter, data } => {
                let (parameter, data) = self.job(&parameter, &data)?;
                Ok(Pdu::AckData { sequence, parameter, data })
            }
            Pdu::UserData { sequence, parameter, data } => {
                let request = UserDataRequest::decode(&parameter, &data)?;
                let mut response = self.user_data(&request)?;
                response.sequence_number = request.sequence_number;
                Ok(response.into_pdu(sequence))
            }
            other => Err(S7Error::Protocol(format!("Fake PLC cannot answer {:?}", other))),
        }
    }

    fn job(&self, parameter: &Bytes, data: &Bytes) -> S7Result<(Bytes, Bytes)> {
        match parameter.first().copied() {
            Some(function::SETUP_COMMUNICATION) => {
                let requested = SetupCommunication::decode_parameter(parameter)?;
                let offered = SetupCommunication {
                    max_amq_calling: self.max_amq,
                    max_amq_called: self.max_amq,
                    pdu_length: requested.pdu_length.min(self.pdu_size),
                };
                Ok((offered.encode_parameter(), Bytes::new()))
            }
            Some(function::READ_VAR) => {
                let items: Vec<DataItem> = decode_read_var_parameter(parameter)?
                    .iter()
                    .map(|descriptor| self.read_item(descriptor))
                    .collect();
                encode_read_response(&items)
            }
            Some(function::WRITE_VAR) => {
                let codes: Vec<ReturnCode> = decode_write_var_request(parameter, data)?
                    .iter()
                    .map(|(descriptor, payload)| self.write_item(descriptor, payload))
                    .collect();
                encode_write_response(&codes)
            }
            Some(function::PLC_STOP) => {
                let mut status = self.status.lock().unwrap();
                let was_stopped = *status == PlcStatus::Stop;
                *status = PlcStatus::Stop;
                let reply: &[u8] = if was_stopped { &[0x29, 0x07] } else { &[0x29] };
                Ok((Bytes::copy_from_slice(reply), Bytes::new()))
            }
            Some(function::PLC_CONTROL) => {
                if parameter.ends_with(b"P_PROGRAM") {
                    let mut status = self.status.lock().unwrap();
                    let was_running = *status == PlcStatus::Run;
                    *status = PlcStatus::Run;
                    let reply: &[u8] = if was_running { &[0x28, 0x02] } else { &[0x28] };
                    return Ok((Bytes::copy_from_slice(reply), Bytes::new()));
                }
                Ok((Bytes::from_static(&[0x28]), Bytes::new()))
            }
            other => Err(S7Error::Protocol(format!("Fake PLC got function {:02X?}", other))),
        }
    }

    fn location(descriptor: &AddressingDescriptor) -> (Area, u16, usize) {
        let width = if descriptor.area().is_element_addressed() {
            descriptor.data_type().width()
        } else {
            1
        };
        (
            descriptor.area(),
            descriptor.block_number(),
            descriptor.byte_offset() as usize * width,
        )
    }

    fn read_item(&self, descriptor: &AddressingDescriptor) -> DataItem {
        let (area, db, offset) = Self::location(descriptor);
        if area == Area::DataBlock && db == MISSING_DB {
            return DataItem::error(ReturnCode::ObjectDoesNotExist);
        }
        let data = if descriptor.data_type() == DataType::Bit {
            let byte = self.peek(area, db, offset, 1)[0];
            vec![(byte >> descriptor.bit_offset()) & 0x01]
        } else {
            self.peek(area, db, offset, descriptor.byte_length())
        };
        DataItem::success(descriptor.data_type().data_transport(), Bytes::from(data))
    }

    fn write_item(&self, descriptor: &AddressingDescriptor, payload: &Bytes) -> ReturnCode {
        let (area, db, offset) = Self::location(descriptor);
        if area == Area::DataBlock && db == MISSING_DB {
            return ReturnCode::ObjectDoesNotExist;
        }
        if descriptor.data_type() == DataType::Bit {
            let mask = 1u8 << descriptor.bit_offset();
            let byte = self.peek(area, db, offset, 1)[0];
            let value = if payload.first().copied().unwrap_or(0) & 0x01 != 0 {
                byte | mask
            } else {
                byte & !mask
            };
            self.fill(area, db, offset, &[value]);
        } else {
            self.fill(area, db, offset, payload);
        }
        ReturnCode::Success
    }

    fn user_data(&self, request: &UserDataRequest) -> S7Result<UserDataResponse> {
        let payload = request.payload.clone().unwrap_or_default();
        let (group, subfunction) = (request.group, request.subfunction);
        let response = match (group, subfunction) {
            (group::TIME, subfunction::READ_CLOCK) => {
                let mut bytes = vec![0x00, 0x20];
                bytes.extend_from_slice(&self.clock().encode());
                UserDataResponse::new(group, subfunction, Bytes::from(bytes))
            }
            (group::TIME, subfunction::SET_CLOCK) => {
                let time = PlcDateTime::decode(payload.get(2..).unwrap_or_default())?;
                *self.clock.lock().unwrap() = time;
                UserDataResponse::new(group, subfunction, Bytes::new())
            }
            (group::BLOCK, subfunction::BLOCK_INFO) => {
                let number: u16 = std::str::from_utf8(payload.get(2..7).unwrap_or_default())
                    .ok()
                    .and_then(|digits| digits.parse().ok())
                    .unwrap_or(0);
                if number == MISSING_BLOCK {
                    let mut response = UserDataResponse::new(group, subfunction, Bytes::new());
                    response.return_code = ReturnCode::ObjectDoesNotExist;
                    response
                } else {
                    UserDataResponse::new(group, subfunction, Bytes::from(block_info_payload(number)?))
                }
            }
            (group::SZL, subfunction::READ_SZL) => {
                let mut bytes = vec![0u8; 8 + 28];
                bytes[..4].copy_from_slice(&payload[..4]);
                bytes[4..6].copy_from_slice(&28u16.to_be_bytes());
                bytes[6..8].copy_from_slice(&1u16.to_be_bytes());
                bytes[8 + 3] = match self.status() {
                    PlcStatus::Run => 0x08,
                    PlcStatus::Stop => 0x04,
                    PlcStatus::Unknown => 0x00,
                };
                UserDataResponse::new(group, subfunction, Bytes::from(bytes))
            }
            _ => {
                return Err(S7Error::Protocol(format!(
                    "Fake PLC got userdata {:02X}/{:02X}",
                    group, subfunction
                )));
            }
        };
        Ok(response)
    }
}

/// Block info payload of DB `number`
fn block_info_payload(number: u16) -> S7Result<Vec<u8>> {
    let mut p = vec![0u8; s7_application::block_info::BLOCK_INFO_LENGTH];
    p[1] = 0x41;
    p[9] = 0x01;
    p[10] = 0x05;
    p[11] = 0x0A;
    p[14..18].copy_from_slice(&120u32.to_be_bytes());
    p[26..28].copy_from_slice(&1u16.to_be_bytes());
    p[32..34].copy_from_slice(&1u16.to_be_bytes());
    p[40..42].copy_from_slice(&16u16.to_be_bytes());
    p[42..48].copy_from_slice(b"TESTER");
    p[66] = 0x01;
    let mut info = BlockInfo::decode(&p)?;
    info.block_number = number;
    info.encode()
}
