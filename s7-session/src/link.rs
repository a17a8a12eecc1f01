//! Link: transport, upper protocol handler and ISO-on-TCP framing combined
//!
//! A `Link` moves whole S7 PDUs. Outgoing payloads are wrapped in a COTP data
//! TPDU and a TPKT frame, then handed to the upper protocol handler and the
//! transport. Incoming bytes go the opposite way; data TPDUs without the EOT
//! flag are collected until the final segment arrives.

use crate::error::{S7Error, S7Result};
use crate::frame::cotp::{CotpConnection, CotpPdu};
use crate::frame::tpkt::TpktCodec;
use crate::handler::UpperProtocolHandler;
use bytes::{Bytes, BytesMut};
use s7_transport::TransportLayer;
use tokio_util::codec::{Decoder, Encoder};

const READ_CHUNK: usize = 4096;

/// Largest S7 header, allowed on top of the negotiated PDU size when
/// reassembling segments
const S7_HEADER_ALLOWANCE: usize = 12;

/// Framed connection to one controller
#[derive(Debug)]
pub struct Link {
    transport: Box<dyn TransportLayer>,
    handler: Box<dyn UpperProtocolHandler>,
    codec: TpktCodec,
    read_buf: Vec<u8>,
    /// Bytes read from the transport, before the handler
    raw: BytesMut,
    /// Bytes released by the handler, before the TPKT codec
    framed: BytesMut,
    /// Data TPDU segments of a PDU not yet complete
    segments: BytesMut,
    /// Upper bound of a reassembled PDU
    max_pdu: usize,
}

impl Link {
    pub fn new(transport: Box<dyn TransportLayer>, handler: Box<dyn UpperProtocolHandler>) -> Self {
        Self {
            transport,
            handler,
            codec: TpktCodec::new(),
            read_buf: vec![0u8; READ_CHUNK],
            raw: BytesMut::new(),
            framed: BytesMut::new(),
            segments: BytesMut::new(),
            max_pdu: u16::MAX as usize,
        }
    }

    /// Limit reassembled PDUs to the negotiated size
    pub fn set_max_pdu_size(&mut self, pdu_size: u16) {
        self.max_pdu = pdu_size as usize + S7_HEADER_ALLOWANCE;
    }

    /// Open the transport and notify the handler
    pub async fn open(&mut self) -> S7Result<()> {
        self.raw.clear();
        self.framed.clear();
        self.segments.clear();
        self.max_pdu = u16::MAX as usize;
        self.transport.open().await?;
        self.handler.connect()
    }

    /// Run the COTP connection handshake
    ///
    /// # Errors
    ///
    /// Returns `S7Error::Protocol` if the peer answers with anything other
    /// than a connection confirm.
    pub async fn connect_request(&mut self, request: CotpConnection) -> S7Result<CotpConnection> {
        self.send_tpdu(&CotpPdu::ConnectionRequest(request)).await?;
        match self.receive_tpdu().await? {
            CotpPdu::ConnectionConfirm(confirm) => Ok(confirm),
            CotpPdu::DisconnectRequest { reason, .. } => Err(S7Error::Protocol(format!(
                "COTP connection refused, reason 0x{:02X}",
                reason
            ))),
            other => Err(S7Error::Protocol(format!(
                "Expected COTP connection confirm, got {:?}",
                other
            ))),
        }
    }

    /// Send one TPDU
    pub async fn send_tpdu(&mut self, tpdu: &CotpPdu) -> S7Result<()> {
        let mut frame = BytesMut::new();
        self.codec.encode(tpdu.encode(), &mut frame)?;
        let wire = self.handler.add_frame(frame.freeze())?;
        log::trace!("-> {} bytes", wire.len());
        self.transport.write_all(&wire).await?;
        self.transport.flush().await
    }

    /// Send one S7 PDU
    pub async fn send_data(&mut self, payload: Bytes) -> S7Result<()> {
        self.send_tpdu(&CotpPdu::data(payload)).await
    }

    /// Receive the next TPDU
    ///
    /// Cancel safe: bytes read before the future is dropped stay buffered.
    pub async fn receive_tpdu(&mut self) -> S7Result<CotpPdu> {
        loop {
            if let Some(tpdu) = self.next_buffered()? {
                return CotpPdu::decode(tpdu);
            }
            self.fill().await?;
        }
    }

    /// Receive the next complete S7 PDU
    ///
    /// Cancel safe, like [`Link::receive_tpdu`].
    ///
    /// # Errors
    ///
    /// A disconnect request from the peer is reported as a transport error;
    /// any other non-data TPDU is a protocol error.
    pub async fn receive_data(&mut self) -> S7Result<Bytes> {
        loop {
            match self.receive_tpdu().await? {
                CotpPdu::Data { eot: true, payload } if self.segments.is_empty() => {
                    return Ok(payload);
                }
                CotpPdu::Data { eot, payload } => {
                    if self.segments.len() + payload.len() > self.max_pdu {
                        let total = self.segments.len() + payload.len();
                        self.segments.clear();
                        return Err(S7Error::FrameInvalid(format!(
                            "Segmented PDU of {} bytes exceeds the limit of {}",
                            total, self.max_pdu
                        )));
                    }
                    self.segments.extend_from_slice(&payload);
                    if eot {
                        return Ok(self.segments.split().freeze());
                    }
                }
                CotpPdu::DisconnectRequest { reason, .. } => {
                    return Err(S7Error::io(
                        std::io::ErrorKind::ConnectionAborted,
                        &format!("Peer sent COTP disconnect request, reason 0x{:02X}", reason),
                    ));
                }
                CotpPdu::Error { cause, .. } => {
                    return Err(S7Error::Protocol(format!(
                        "Peer rejected a TPDU, cause 0x{:02X}",
                        cause
                    )));
                }
                other => {
                    return Err(S7Error::Protocol(format!(
                        "Unexpected COTP TPDU on an established connection: {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// Shut the handler down and close the transport
    pub async fn close(&mut self) -> S7Result<()> {
        self.handler.shutdown();
        self.segments.clear();
        self.transport.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    fn next_buffered(&mut self) -> S7Result<Option<BytesMut>> {
        while let Some(chunk) = self.handler.remove_frame(&mut self.raw)? {
            self.framed.extend_from_slice(&chunk);
        }
        self.codec.decode(&mut self.framed)
    }

    async fn fill(&mut self) -> S7Result<()> {
        let n = self.transport.read(&mut self.read_buf).await?;
        if n == 0 {
            return Err(S7Error::io(
                std::io::ErrorKind::UnexpectedEof,
                "Connection closed by peer",
            ));
        }
        log::trace!("<- {} bytes", n);
        self.raw.extend_from_slice(&self.read_buf[..n]);
        Ok(())
    }
}
