//! S7 connection implementation
//!
//! # Connection Flow
//!
//! 1. **Transport Open**: open the TCP (or in-memory) stream
//! 2. **COTP Connect**: connection request/confirm carrying the TSAPs
//! 3. **Setup Communication**: negotiate PDU size and parallel jobs
//! 4. **Ready**: a driver task owns the link; requests are correlated by
//!    sequence number, so any number of callers may share the connection
//!
//! Requests larger than the negotiated PDU size are split by the request
//! planner and reassembled before they are returned.

use super::config::{ConnectionConfig, UpperProtocol};
use super::connection::Connection;
use crate::dispatcher::{Dispatcher, RequestKind};
use crate::driver::Driver;
use crate::state::StateCell;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use s7_application::item::{decode_read_response, decode_write_response, read_var_parameter, write_var_request};
use s7_application::userdata::SZL_CPU_STATUS;
use s7_application::{
    BlockInfo, DataItem, Fragment, Pdu, PlcControl, ReadAssembler, RequestPlan,
    SetupCommunication, UserDataRequest, UserDataResponse, WriteAssembler,
};
use s7_core::{AddressingDescriptor, BlockType, PlcDateTime, PlcStatus, ReturnCode, S7Error, S7Result};
use s7_session::{
    ConnectionState, CotpConnection, Link, NullUpperProtocolHandler, SessionStatistics,
    UpperProtocolHandler, WrapperHandler,
};
use s7_transport::{TcpTransport, TransportLayer};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Queued outbound PDUs per session
const OUTBOUND_QUEUE: usize = 64;

/// Source reference of our COTP connection request
const COTP_SOURCE_REFERENCE: u16 = 0x0001;

/// State of one established session
#[derive(Debug)]
struct Session {
    outbound: mpsc::Sender<Bytes>,
    dispatcher: Arc<Dispatcher>,
    pdu_size: u16,
    parallel_jobs: usize,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<Link>>>,
}

impl Session {
    /// Stop the driver and take the link back
    async fn shutdown(&self, cause: S7Error) -> Option<Link> {
        self.cancel.cancel();
        self.permits.close();
        self.dispatcher.fail_all(cause);
        let driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner).take();
        match driver?.await {
            Ok(link) => Some(link),
            Err(e) => {
                log::error!("Driver task ended abnormally: {}", e);
                None
            }
        }
    }
}

/// A client connection to one S7 controller
///
/// All operations take `&self`; the connection may be shared between tasks
/// (for example behind an `Arc`) and used concurrently.
#[derive(Debug)]
pub struct S7Connection {
    config: ConnectionConfig,
    state: Arc<StateCell>,
    /// Link while no driver task owns it
    link: tokio::sync::Mutex<Option<Link>>,
    session: RwLock<Option<Arc<Session>>>,
    statistics: Arc<Mutex<SessionStatistics>>,
}

impl S7Connection {
    /// Create a connection over an existing link
    pub fn new(config: ConnectionConfig, link: Link) -> Self {
        Self {
            config,
            state: Arc::new(StateCell::new()),
            link: tokio::sync::Mutex::new(Some(link)),
            session: RwLock::new(None),
            statistics: Arc::new(Mutex::new(SessionStatistics::new())),
        }
    }

    /// Create a TCP connection from `config`
    ///
    /// # Errors
    /// Returns error if the configuration or the address is invalid
    pub fn from_config(config: ConnectionConfig) -> S7Result<Self> {
        config.validate()?;
        let transport = TcpTransport::from_address(&config.address)?;
        Ok(Self::with_transport(config, Box::new(transport)))
    }

    /// Create a connection over any transport, framed as `config` says
    pub fn with_transport(config: ConnectionConfig, transport: Box<dyn TransportLayer>) -> Self {
        let handler: Box<dyn UpperProtocolHandler> = match config.upper_protocol {
            UpperProtocol::None => Box::new(NullUpperProtocolHandler::new()),
            UpperProtocol::Wrapper {
                source_port,
                destination_port,
            } => Box::new(WrapperHandler::new(source_port, destination_port)),
        };
        Self::new(config, Link::new(transport, handler))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Negotiated PDU size while connected
    pub fn pdu_size(&self) -> Option<u16> {
        self.ready_session().ok().map(|s| s.pdu_size)
    }

    /// Snapshot of the counters accumulated over the connection's lifetime
    pub fn statistics(&self) -> SessionStatistics {
        self.statistics.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn reset_statistics(&self) {
        self.statistics.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        self.session.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn ready_session(&self) -> S7Result<Arc<Session>> {
        if !self.state.get().is_ready() {
            return Err(S7Error::NotConnected);
        }
        self.current_session().ok_or(S7Error::NotConnected)
    }

    fn take_session(&self) -> Option<Arc<Session>> {
        self.session.write().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Run the handshake on the idle link
    async fn establish(&self) -> S7Result<SetupCommunication> {
        let mut slot = self.link.lock().await;
        if let Some(previous) = self.take_session() {
            if let Some(link) = previous.shutdown(S7Error::NotConnected).await {
                *slot = Some(link);
            }
        }
        let link = slot
            .as_mut()
            .ok_or_else(|| S7Error::io(std::io::ErrorKind::NotConnected, "Link unavailable"))?;

        let handshake = async {
            if !link.is_closed() {
                link.close().await?;
            }
            link.open().await?;

            let request = CotpConnection::request(
                COTP_SOURCE_REFERENCE,
                self.config.local_tsap(),
                self.config.remote_tsap(),
            );
            let confirm = link.connect_request(request).await?;
            log::debug!(
                "COTP connected, TPDU size {:?}",
                confirm.tpdu_size_bytes()
            );
            self.state.transition(ConnectionState::CotpConnected)?;

            self.state.transition(ConnectionState::NegotiatingPduSize)?;
            let setup = SetupCommunication::new(self.config.max_parallel_jobs, self.config.pdu_size);
            link.send_data(setup.request(0).encode()?).await?;
            let reply = Pdu::decode(link.receive_data().await?)?;
            let negotiated = setup.negotiate(reply)?;
            link.set_max_pdu_size(negotiated.pdu_length);
            Ok::<_, S7Error>(negotiated)
        };
        let result = match tokio::time::timeout(self.config.connect_timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(S7Error::Timeout),
        };

        match result {
            Ok(negotiated) => Ok(negotiated),
            Err(e) => {
                if let Err(close_error) = link.close().await {
                    log::debug!("Closing link after failed handshake: {}", close_error);
                }
                Err(e)
            }
        }
    }

    /// Hand the link to a driver task and publish the session
    async fn start_session(&self, negotiated: SetupCommunication) -> S7Result<()> {
        let mut slot = self.link.lock().await;
        let link = slot
            .take()
            .ok_or_else(|| S7Error::io(std::io::ErrorKind::NotConnected, "Link unavailable"))?;
        let parallel_jobs = negotiated
            .max_amq_calling
            .min(self.config.max_parallel_jobs)
            .max(1) as usize;
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let session = Arc::new(Session {
            outbound: tx,
            dispatcher: Dispatcher::new(Arc::clone(&self.statistics)),
            pdu_size: negotiated.pdu_length,
            parallel_jobs,
            permits: Arc::new(Semaphore::new(parallel_jobs)),
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
        });

        // requests may start as soon as the state reads Ready
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&session));
        if let Err(e) = self.state.transition(ConnectionState::Ready) {
            self.take_session();
            *slot = Some(link);
            return Err(e);
        }
        let driver = Driver {
            link,
            outbound: rx,
            dispatcher: Arc::clone(&session.dispatcher),
            state: Arc::clone(&self.state),
            cancel: session.cancel.clone(),
        };
        *session.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(tokio::spawn(driver.run()));
        log::info!(
            "Connected to {} (TSAP {}): PDU size {}, {} parallel job(s)",
            self.config.address,
            self.config.remote_tsap(),
            negotiated.pdu_length,
            parallel_jobs
        );
        Ok(())
    }

    /// Send one job and wait for its reply
    async fn transact<F>(&self, kind: RequestKind, build: F) -> S7Result<Pdu>
    where
        F: FnOnce(u16) -> Pdu,
    {
        let session = self.ready_session()?;
        let deadline = Instant::now() + self.config.request_timeout;
        let _permit = match tokio::time::timeout_at(deadline, Arc::clone(&session.permits).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(session.dispatcher.closed_cause().unwrap_or(S7Error::NotConnected)),
            Err(_) => return Err(S7Error::Timeout),
        };
        let handle = session.dispatcher.register(kind)?;
        let frame = build(handle.sequence()).encode()?;
        if frame.len() > session.pdu_size as usize {
            return Err(S7Error::InvalidData(format!(
                "Request of {} bytes exceeds the PDU size {}",
                frame.len(),
                session.pdu_size
            )));
        }
        log::trace!("Sending {:?} request #{} ({} bytes)", kind, handle.sequence(), frame.len());
        if session.outbound.send(frame).await.is_err() {
            return Err(session.dispatcher.closed_cause().unwrap_or(S7Error::NotConnected));
        }
        handle.wait(deadline).await
    }

    /// Run the requests of a plan, concurrently if configured
    async fn execute<'a, T, F, Fut>(&self, requests: &'a [Vec<Fragment>], run: F) -> S7Result<Vec<(&'a [Fragment], T)>>
    where
        F: Fn(&'a [Fragment]) -> Fut,
        Fut: Future<Output = S7Result<T>>,
    {
        let limit = self.current_session().map_or(1, |s| s.parallel_jobs);
        if self.config.parallel && limit > 1 && requests.len() > 1 {
            let replies: Vec<_> = requests
                .iter()
                .map(|batch| {
                    let reply = run(batch.as_slice());
                    async move { reply.await.map(|result| (batch.as_slice(), result)) }
                })
                .collect();
            stream::iter(replies)
            .buffer_unordered(limit)
            .try_collect()
            .await
        } else {
            let mut results = Vec::with_capacity(requests.len());
            for batch in requests {
                results.push((batch.as_slice(), run(batch.as_slice()).await?));
            }
            Ok(results)
        }
    }

    async fn read_batch(&self, batch: &[Fragment]) -> S7Result<Vec<DataItem>> {
        let parameter = read_var_parameter(batch.iter().map(|f| &f.descriptor))?;
        let reply = self
            .transact(RequestKind::Read, |sequence| Pdu::job(sequence, parameter, Bytes::new()))
            .await?;
        let (parameter, data) = reply.into_ack()?;
        decode_read_response(&parameter, &data, batch.len())
    }

    async fn write_batch(&self, batch: &[Fragment], items: &[(AddressingDescriptor, Bytes)]) -> S7Result<Vec<ReturnCode>> {
        let slices: Vec<(AddressingDescriptor, &[u8])> = batch
            .iter()
            .map(|f| (f.descriptor, &items[f.item].1[f.range.clone()]))
            .collect();
        let (parameter, data) = write_var_request(&slices)?;
        let reply = self
            .transact(RequestKind::Write, |sequence| Pdu::job(sequence, parameter, data))
            .await?;
        let (parameter, data) = reply.into_ack()?;
        decode_write_response(&parameter, &data, batch.len())
    }

    async fn control(&self, control: PlcControl) -> S7Result<()> {
        let reply = self
            .transact(RequestKind::Control, |sequence| control.request(sequence))
            .await?;
        control.check_response(reply)
    }

    async fn user_data(&self, request: UserDataRequest) -> S7Result<UserDataResponse> {
        let (group, subfunction) = (request.group, request.subfunction);
        let reply = self
            .transact(RequestKind::UserData, |sequence| request.request(sequence))
            .await?;
        UserDataResponse::decode(reply, group, subfunction)
    }

    /// Read the metadata of a program block
    pub async fn read_block_info(&self, block_type: BlockType, number: u16) -> S7Result<BlockInfo> {
        let response = self
            .user_data(UserDataRequest::block_info(block_type, number.into())?)
            .await?;
        BlockInfo::decode(&response.payload)
    }

    /// Read the CPU clock
    pub async fn get_plc_time(&self) -> S7Result<PlcDateTime> {
        self.user_data(UserDataRequest::read_clock()).await?.clock()
    }

    /// Set the CPU clock
    pub async fn set_plc_time(&self, time: &PlcDateTime) -> S7Result<()> {
        self.user_data(UserDataRequest::set_clock(time)).await.map(|_| ())
    }

    /// Read the CPU operating state
    pub async fn get_plc_status(&self) -> S7Result<PlcStatus> {
        let response = self
            .user_data(UserDataRequest::read_szl(SZL_CPU_STATUS, 0x0000))
            .await?;
        response.cpu_status()
    }

    /// Start the CPU; `cold` requests a cold start instead of a warm restart
    pub async fn start_plc(&self, cold: bool) -> S7Result<()> {
        self.control(if cold { PlcControl::ColdStart } else { PlcControl::HotStart })
            .await
    }

    pub async fn stop_plc(&self) -> S7Result<()> {
        self.control(PlcControl::Stop).await
    }

    pub async fn copy_ram_to_rom(&self) -> S7Result<()> {
        self.control(PlcControl::CopyRamToRom).await
    }

    pub async fn compress_memory(&self) -> S7Result<()> {
        self.control(PlcControl::Compress).await
    }
}

#[async_trait::async_trait]
impl Connection for S7Connection {
    async fn connect(&self) -> S7Result<()> {
        match self.state.get() {
            ConnectionState::Ready => return Ok(()),
            state if state.is_connecting() => return Err(S7Error::ConnectInProgress),
            _ => {}
        }
        if !self
            .state
            .compare_and_set(ConnectionState::Disconnected, ConnectionState::CotpConnecting)
        {
            return Err(S7Error::ConnectInProgress);
        }
        self.config.validate()?;
        log::info!(
            "Connecting to {} (local TSAP {}, remote TSAP {})",
            self.config.address,
            self.config.local_tsap(),
            self.config.remote_tsap()
        );

        let result = match self.establish().await {
            Ok(negotiated) => self.start_session(negotiated).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            log::error!("Connect to {} failed: {}", self.config.address, e);
            let _ = self.state.transition(ConnectionState::Disconnected);
        }
        result
    }

    async fn disconnect(&self) -> S7Result<()> {
        let session = self.take_session();
        if session.is_none() && self.state.get() == ConnectionState::Disconnected {
            return Ok(());
        }
        let _ = self.state.transition(ConnectionState::Disconnecting);

        let mut slot = self.link.lock().await;
        if let Some(session) = session {
            if let Some(link) = session.shutdown(S7Error::NotConnected).await {
                *slot = Some(link);
            }
        }
        let result = match slot.as_mut() {
            Some(link) if !link.is_closed() => link.close().await,
            _ => Ok(()),
        };
        let _ = self.state.transition(ConnectionState::Disconnected);
        log::info!("Disconnected from {}", self.config.address);
        result
    }

    fn is_ready(&self) -> bool {
        self.state.get().is_ready()
    }

    async fn read(&self, descriptors: &[AddressingDescriptor]) -> S7Result<Vec<S7Result<Bytes>>> {
        if descriptors.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.ready_session()?;
        let plan = RequestPlan::for_read(descriptors, session.pdu_size)?;
        let replies = self
            .execute(plan.requests(), |batch| self.read_batch(batch))
            .await?;

        let mut assembler = ReadAssembler::new(descriptors);
        for (batch, items) in replies {
            for (fragment, item) in batch.iter().zip(items) {
                assembler.accept(fragment, item)?;
            }
        }
        Ok(assembler.finish())
    }

    async fn write(&self, items: &[(AddressingDescriptor, Bytes)]) -> S7Result<Vec<S7Result<()>>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        for (descriptor, payload) in items {
            if payload.len() != descriptor.byte_length() {
                return Err(S7Error::InvalidData(format!(
                    "Payload of {} bytes does not match {} ({} bytes)",
                    payload.len(),
                    descriptor,
                    descriptor.byte_length()
                )));
            }
        }
        let session = self.ready_session()?;
        let descriptors: Vec<AddressingDescriptor> = items.iter().map(|(d, _)| *d).collect();
        let plan = RequestPlan::for_write(&descriptors, session.pdu_size)?;
        let replies = self
            .execute(plan.requests(), |batch| self.write_batch(batch, items))
            .await?;

        let mut assembler = WriteAssembler::new(&plan, items.len());
        for (batch, codes) in replies {
            for (fragment, code) in batch.iter().zip(codes) {
                assembler.accept(fragment, code);
            }
        }
        Ok(assembler.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlc, MISSING_BLOCK};
    use s7_core::{Area, Tsap};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn config(pdu_size: u16) -> ConnectionConfig {
        ConnectionConfig {
            address: "fake-plc".to_string(),
            pdu_size,
            ..Default::default()
        }
    }

    async fn connected(plc: &Arc<FakePlc>, config: ConnectionConfig) -> S7Connection {
        let conn = S7Connection::with_transport(config, Box::new(plc.spawn_duplex()));
        assert_ok!(conn.connect().await);
        conn
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_handshake_negotiates_smaller_pdu() {
        let plc = FakePlc::new(480);
        let conn = connected(&plc, config(960)).await;
        assert!(conn.is_ready());
        assert_eq!(conn.pdu_size(), Some(480));
        assert_eq!(*plc.called_tsap.lock().unwrap(), Some(Tsap(0x0102)));

        // already connected
        conn.connect().await.unwrap();
        conn.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_rejects_tiny_pdu() {
        let plc = FakePlc::new(16);
        let conn = S7Connection::with_transport(config(960), Box::new(plc.spawn_duplex()));
        assert!(matches!(conn.connect().await, Err(S7Error::Protocol(_))));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.pdu_size(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connect_is_rejected() {
        // the peer never answers the connection request
        let (transport, _peer) = s7_transport::DuplexTransport::pair(1024);
        let conn = Arc::new(S7Connection::with_transport(config(960), Box::new(transport)));
        let first = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.connect().await }
        });
        conn.watch_state()
            .wait_for(|state| state.is_connecting())
            .await
            .unwrap();

        assert!(matches!(conn.connect().await, Err(S7Error::ConnectInProgress)));
        assert!(matches!(first.await.unwrap(), Err(S7Error::Timeout)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let plc = FakePlc::new(480);
        let conn = connected(&plc, config(480)).await;
        conn.disconnect().await.unwrap();
        conn.disconnect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let tag: AddressingDescriptor = "DB1.DBW0".parse().unwrap();
        assert!(matches!(conn.read(&[tag]).await, Err(S7Error::NotConnected)));
        assert!(matches!(conn.get_plc_status().await, Err(S7Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_large_read_and_write_are_split() {
        let plc = FakePlc::new(240);
        let conn = connected(&plc, config(960)).await;
        let data = pattern(6534);
        plc.fill(Area::DataBlock, 1, 0, &data);

        let tag = AddressingDescriptor::bytes(Area::DataBlock, 1, 0, data.len()).unwrap();
        let mut results = conn.read(&[tag]).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(&results.remove(0).unwrap()[..], &data[..]);
        assert!(plc.jobs.load(Ordering::SeqCst) >= 28);
        assert!(plc.max_request.load(Ordering::SeqCst) <= 240);
        assert!(plc.max_reply.load(Ordering::SeqCst) <= 240);

        let written: Vec<u8> = data.iter().rev().copied().collect();
        let tag = AddressingDescriptor::bytes(Area::DataBlock, 2, 100, written.len()).unwrap();
        let results = conn.write(&[(tag, Bytes::from(written.clone()))]).await.unwrap();
        assert!(results[0].is_ok());
        assert_eq!(plc.peek(Area::DataBlock, 2, 100, written.len()), written);
        assert!(plc.max_request.load(Ordering::SeqCst) <= 240);

        let stats = conn.statistics();
        assert_eq!(stats.pdus_sent, stats.pdus_received);
        assert_eq!(stats.timeouts, 0);
    }

    #[tokio::test]
    async fn test_bit_access() {
        let plc = FakePlc::new(480);
        let conn = connected(&plc, config(480)).await;
        plc.fill(Area::DataBlock, 1, 16, &[0x02]);

        let bit0: AddressingDescriptor = "DB1.DBX16.0".parse().unwrap();
        let bit1: AddressingDescriptor = "DB1.DBX16.1".parse().unwrap();
        let results = conn
            .write(&[(bit0, Bytes::from_static(&[1])), (bit1, Bytes::from_static(&[0]))])
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(plc.peek(Area::DataBlock, 1, 16, 1), vec![0x01]);

        let results = conn.read(&[bit0, bit1]).await.unwrap();
        assert_eq!(&results[0].as_ref().unwrap()[..], &[1]);
        assert_eq!(&results[1].as_ref().unwrap()[..], &[0]);
    }

    #[tokio::test]
    async fn test_bit_run_access() {
        let plc = FakePlc::new(480);
        let conn = connected(&plc, config(480)).await;
        plc.fill(Area::DataBlock, 6, 2, &[0b1010_0000, 0b0001_0101]);

        // bits 2.5 ..= 3.4
        let tag: AddressingDescriptor = "DB6.DBX2.5,8".parse().unwrap();
        let results = conn.read(&[tag]).await.unwrap();
        assert_eq!(&results[0].as_ref().unwrap()[..], &[1, 0, 1, 1, 0, 1, 0, 1]);
        assert_eq!(plc.jobs.load(Ordering::SeqCst), 1);

        let results = conn
            .write(&[(tag, Bytes::from_static(&[0, 1, 0, 0, 1, 0, 1, 0]))])
            .await
            .unwrap();
        assert!(results[0].is_ok());
        assert_eq!(plc.peek(Area::DataBlock, 6, 2, 2), vec![0b0100_0000, 0b0000_1010]);

        let short = conn.write(&[(tag, Bytes::from_static(&[1]))]).await;
        assert!(matches!(short, Err(S7Error::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_item_errors() {
        let plc = FakePlc::new(480);
        let conn = connected(&plc, config(480)).await;
        plc.fill(Area::DataBlock, 1, 0, &[0x12, 0x34, 0x00, 0x00, 0x56]);

        let tags: Vec<AddressingDescriptor> = ["DB1.DBW0", "DB999.DBB0", "DB1.DBB4"]
            .iter()
            .map(|t| t.parse().unwrap())
            .collect();
        let results = conn.read(&tags).await.unwrap();
        assert_eq!(&results[0].as_ref().unwrap()[..], &[0x12, 0x34]);
        assert!(matches!(
            results[1],
            Err(S7Error::Item(ReturnCode::ObjectDoesNotExist))
        ));
        assert_eq!(&results[2].as_ref().unwrap()[..], &[0x56]);

        let results = conn
            .write(&[
                (tags[1], Bytes::from_static(&[0xAA])),
                (tags[2], Bytes::from_static(&[0xBB])),
            ])
            .await
            .unwrap();
        assert!(matches!(
            results[0],
            Err(S7Error::Item(ReturnCode::ObjectDoesNotExist))
        ));
        assert!(results[1].is_ok());
        assert!(conn.is_ready());
    }

    #[tokio::test]
    async fn test_mixed_types_in_one_batch() {
        let plc = FakePlc::new(480);
        let conn = connected(&plc, config(480)).await;
        let tags: Vec<AddressingDescriptor> = ["DB4.DBB0", "DB4.DBX1.3", "DB4.DBB2,10", "MD0"]
            .iter()
            .map(|t| t.parse().unwrap())
            .collect();
        let payloads = [
            Bytes::from_static(&[0x7F]),
            Bytes::from_static(&[1]),
            Bytes::from_static(b"conveyor-1"),
            Bytes::from_static(&[0x41, 0x20, 0x00, 0x00]),
        ];
        let items: Vec<(AddressingDescriptor, Bytes)> =
            tags.iter().copied().zip(payloads.iter().cloned()).collect();
        let results = conn.write(&items).await.unwrap();
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(plc.peek(Area::DataBlock, 4, 1, 1), vec![0x08]);

        let results = conn.read(&tags).await.unwrap();
        for (result, payload) in results.iter().zip(&payloads) {
            assert_eq!(result.as_ref().unwrap(), payload);
        }
    }

    #[tokio::test]
    async fn test_write_length_mismatch_sends_nothing() {
        let plc = FakePlc::new(480);
        let conn = connected(&plc, config(480)).await;
        let tag: AddressingDescriptor = "DB1.DBD0".parse().unwrap();
        let result = conn.write(&[(tag, Bytes::from_static(&[1, 2]))]).await;
        assert!(matches!(result, Err(S7Error::InvalidData(_))));
        assert_eq!(plc.jobs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_correlated() {
        let plc = FakePlc::new(480);
        plc.batch_replies.store(8, Ordering::SeqCst);
        let conn = Arc::new(connected(&plc, config(480)).await);
        plc.fill(Area::DataBlock, 3, 0, &[10, 11, 12, 13, 14, 15, 16, 17]);

        let reads = (0..8u32).map(|i| {
            let conn = Arc::clone(&conn);
            async move {
                let tag = AddressingDescriptor::bytes(Area::DataBlock, 3, i, 1).unwrap();
                let mut results = conn.read(&[tag]).await.unwrap();
                (i, results.remove(0).unwrap())
            }
        });
        for (i, value) in futures::future::join_all(reads).await {
            assert_eq!(&value[..], &[10 + i as u8]);
        }
        assert_eq!(conn.statistics().unexpected_replies, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_connection_usable() {
        let plc = FakePlc::new(480);
        let conn = connected(
            &plc,
            ConnectionConfig {
                request_timeout: Duration::from_secs(2),
                ..config(480)
            },
        )
        .await;
        let tag: AddressingDescriptor = "DB1.DBB0".parse().unwrap();

        plc.mute.store(true, Ordering::SeqCst);
        let start = Instant::now();
        assert!(matches!(conn.read(&[tag]).await, Err(S7Error::Timeout)));
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(conn.statistics().timeouts, 1);

        plc.mute.store(false, Ordering::SeqCst);
        assert!(conn.read(&[tag]).await.unwrap()[0].is_ok());
        assert!(conn.is_ready());
    }

    #[tokio::test]
    async fn test_transport_failure_fails_pending_requests() {
        let plc = FakePlc::new(480);
        *plc.close_after.lock().unwrap() = Some(0);
        let conn = Arc::new(connected(&plc, config(480)).await);

        let reads = (0..3u32).map(|i| {
            let conn = Arc::clone(&conn);
            async move {
                let tag = AddressingDescriptor::bytes(Area::DataBlock, 1, i, 1).unwrap();
                conn.read(&[tag]).await
            }
        });
        for result in futures::future::join_all(reads).await {
            let error = assert_err!(result);
            assert!(error.is_fatal(), "unexpected error {:?}", error);
        }
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.pdu_size(), None);
        assert_eq!(conn.statistics().fatal_errors, 1);
        conn.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_parallel_split_read() {
        let plc = FakePlc::new(240);
        let conn = connected(
            &plc,
            ConnectionConfig {
                parallel: true,
                ..config(240)
            },
        )
        .await;
        // 16 fragments of 222 bytes, answered four at a time in reverse order
        plc.batch_replies.store(4, Ordering::SeqCst);
        let data = pattern(16 * 222);
        plc.fill(Area::Flags, 0, 0, &data);
        let tag = AddressingDescriptor::bytes(Area::Flags, 0, 0, data.len()).unwrap();
        let results = conn.read(&[tag]).await.unwrap();
        assert_eq!(&results[0].as_ref().unwrap()[..], &data[..]);
        assert_eq!(plc.jobs.load(Ordering::SeqCst), 16);
        assert_eq!(conn.statistics().unexpected_replies, 0);
    }

    #[tokio::test]
    async fn test_run_state_control() {
        let plc = FakePlc::new(480);
        let conn = connected(&plc, config(480)).await;
        assert_eq!(conn.get_plc_status().await.unwrap(), PlcStatus::Run);

        assert_ok!(conn.stop_plc().await);
        assert_eq!(plc.status(), PlcStatus::Stop);
        assert_eq!(conn.get_plc_status().await.unwrap(), PlcStatus::Stop);
        // already stopped
        assert_ok!(conn.stop_plc().await);

        conn.start_plc(false).await.unwrap();
        assert_eq!(plc.status(), PlcStatus::Run);
        conn.start_plc(true).await.unwrap();
        conn.copy_ram_to_rom().await.unwrap();
        conn.compress_memory().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_follows_plc() {
        let plc = FakePlc::new(480);
        plc.set_status(PlcStatus::Stop);
        let conn = connected(&plc, config(480)).await;
        assert_eq!(conn.get_plc_status().await.unwrap(), PlcStatus::Stop);

        // already stopped
        assert_ok!(conn.stop_plc().await);
        conn.start_plc(false).await.unwrap();
        assert_eq!(conn.get_plc_status().await.unwrap(), PlcStatus::Run);
    }

    #[tokio::test]
    async fn test_clock_round_trip() {
        let plc = FakePlc::new(480);
        let conn = connected(&plc, config(480)).await;
        assert_eq!(conn.get_plc_time().await.unwrap(), plc.clock());

        let time = PlcDateTime::new(2025, 6, 1, 12, 34, 56, 789).unwrap();
        conn.set_plc_time(&time).await.unwrap();
        assert_eq!(plc.clock(), time);
        assert_eq!(conn.get_plc_time().await.unwrap(), time);
    }

    #[tokio::test]
    async fn test_block_info() {
        let plc = FakePlc::new(480);
        let conn = connected(&plc, config(480)).await;
        let info = conn.read_block_info(BlockType::Db, 7).await.unwrap();
        assert_eq!(info.block_type, BlockType::Db);
        assert_eq!(info.block_number, 7);
        assert_eq!(info.author, "TESTER");
        assert_eq!(info.mc7_size, 16);

        assert!(matches!(
            conn.read_block_info(BlockType::Db, MISSING_BLOCK).await,
            Err(S7Error::Item(ReturnCode::ObjectDoesNotExist))
        ));
    }

    #[tokio::test]
    async fn test_tcp_loopback() {
        let plc = FakePlc::new(480);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = Arc::clone(&plc);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            server.serve(stream).await
        });

        let conn = crate::connection::ConnectionBuilder::new()
            .tcp(&address)
            .pdu_size(480)
            .build()
            .unwrap();
        conn.connect().await.unwrap();
        let tag: AddressingDescriptor = "MW10".parse().unwrap();
        let results = conn.write(&[(tag, Bytes::from_static(&[0xCA, 0xFE]))]).await.unwrap();
        assert!(results[0].is_ok());
        assert_eq!(&conn.read(&[tag]).await.unwrap()[0].as_ref().unwrap()[..], &[0xCA, 0xFE]);
        conn.disconnect().await.unwrap();
    }
}
