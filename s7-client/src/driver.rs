//! Connection driver task
//!
//! After the handshake the link is moved into a task that multiplexes
//! outgoing PDUs with incoming ones. Incoming PDUs are handed to the
//! dispatcher. A transport or decode failure ends the task; every outstanding
//! request then fails with the same cause and the connection drops back to
//! `Disconnected`. The task returns the link so it can be closed or reopened.

use crate::dispatcher::Dispatcher;
use crate::state::StateCell;
use bytes::Bytes;
use s7_application::Pdu;
use s7_core::{S7Error, S7Result};
use s7_session::{ConnectionState, Link};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) struct Driver {
    pub(crate) link: Link,
    pub(crate) outbound: mpsc::Receiver<Bytes>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) state: Arc<StateCell>,
    pub(crate) cancel: CancellationToken,
}

impl Driver {
    pub(crate) async fn run(mut self) -> Link {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    log::debug!("Driver stopped");
                    break;
                }
                frame = self.outbound.recv() => {
                    let Some(frame) = frame else {
                        log::debug!("Connection dropped, driver exiting");
                        break;
                    };
                    let len = frame.len();
                    if let Err(e) = self.link.send_data(frame).await {
                        self.fail(e);
                        break;
                    }
                    self.dispatcher.record_sent(len);
                }
                received = self.link.receive_data() => {
                    match received.and_then(|bytes| self.decode(bytes)) {
                        Ok(pdu) => self.dispatcher.deliver(pdu),
                        Err(e) => {
                            self.fail(e);
                            break;
                        }
                    }
                }
            }
        }
        self.link
    }

    fn decode(&self, bytes: Bytes) -> S7Result<Pdu> {
        self.dispatcher.record_received(bytes.len());
        log::trace!("Received S7 PDU of {} bytes", bytes.len());
        Pdu::decode(bytes)
    }

    fn fail(&self, cause: S7Error) {
        log::error!("Connection failed: {}", cause);
        self.dispatcher.record_fatal_error();
        // valid from any state; published before waiters observe the failure
        let _ = self.state.transition(ConnectionState::Disconnected);
        self.dispatcher.fail_all(cause);
    }
}
