//! Request/response correlation
//!
//! Every job sent on a connection carries a sequence number (the S7 PDU
//! reference). The dispatcher hands out sequence numbers, keeps one
//! completion slot per outstanding request and routes each incoming PDU to
//! the slot with the same number. Allocation and lookup happen under a single
//! mutex.

use s7_application::Pdu;
use s7_core::{S7Error, S7Result};
use s7_session::SessionStatistics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// What an outstanding request is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Setup,
    Read,
    Write,
    Control,
    UserData,
}

#[derive(Debug)]
struct Entry {
    tx: oneshot::Sender<S7Result<Pdu>>,
    /// Distinguishes a reused sequence number from the registration that owns it
    registration: u64,
    kind: RequestKind,
}

#[derive(Debug, Default)]
struct Table {
    next_sequence: u16,
    next_registration: u64,
    pending: HashMap<u16, Entry>,
    /// Set once the session is gone; later registrations fail with it
    closed: Option<S7Error>,
}

/// Correlation table of one session
#[derive(Debug)]
pub struct Dispatcher {
    table: Mutex<Table>,
    statistics: Arc<Mutex<SessionStatistics>>,
}

impl Dispatcher {
    pub fn new(statistics: Arc<Mutex<SessionStatistics>>) -> Arc<Self> {
        Arc::new(Self {
            table: Mutex::new(Table::default()),
            statistics,
        })
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> MutexGuard<'_, SessionStatistics> {
        self.statistics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a sequence number and a completion slot
    ///
    /// Sequence numbers run from 1 to 65535 and wrap; numbers still
    /// outstanding are skipped.
    ///
    /// # Errors
    ///
    /// Returns the cause the session failed with once it is closed.
    pub fn register(self: &Arc<Self>, kind: RequestKind) -> S7Result<ResponseHandle> {
        let mut table = self.table();
        if let Some(cause) = &table.closed {
            return Err(cause.clone());
        }
        if table.pending.len() >= u16::MAX as usize {
            return Err(S7Error::Protocol("No free sequence number".to_string()));
        }
        let sequence = loop {
            table.next_sequence = table.next_sequence.wrapping_add(1);
            if table.next_sequence == 0 {
                table.next_sequence = 1;
            }
            if !table.pending.contains_key(&table.next_sequence) {
                break table.next_sequence;
            }
        };
        table.next_registration += 1;
        let registration = table.next_registration;
        let (tx, rx) = oneshot::channel();
        table.pending.insert(sequence, Entry { tx, registration, kind });
        log::trace!("Registered {:?} request #{}", kind, sequence);

        Ok(ResponseHandle {
            dispatcher: Arc::clone(self),
            sequence,
            registration,
            rx: Some(rx),
        })
    }

    /// Route an incoming PDU to the request with the same sequence number
    ///
    /// Replies nobody waits for are logged and dropped.
    pub fn deliver(&self, pdu: Pdu) {
        let sequence = pdu.sequence();
        let entry = self.table().pending.remove(&sequence);
        match entry {
            Some(entry) => {
                log::trace!("Reply #{} for {:?} request", sequence, entry.kind);
                // the waiter may have gone away in the meantime
                let _ = entry.tx.send(Ok(pdu));
            }
            None => {
                self.stats().increment_unexpected_replies();
                log::warn!(
                    "Dropping {:?} with unmatched sequence number {}",
                    pdu.message_type(),
                    sequence
                );
            }
        }
    }

    /// Fail every outstanding request with `cause` and refuse new ones
    pub fn fail_all(&self, cause: S7Error) {
        let pending: Vec<Entry> = {
            let mut table = self.table();
            table.closed.get_or_insert_with(|| cause.clone());
            table.pending.drain().map(|(_, entry)| entry).collect()
        };
        if !pending.is_empty() {
            log::debug!("Failing {} outstanding request(s): {}", pending.len(), cause);
        }
        for entry in pending {
            let _ = entry.tx.send(Err(cause.clone()));
        }
    }

    /// Cause the session was closed with, if it is closed
    pub fn closed_cause(&self) -> Option<S7Error> {
        self.table().closed.clone()
    }

    pub fn pending(&self) -> usize {
        self.table().pending.len()
    }

    pub fn record_sent(&self, bytes: usize) {
        self.stats().record_sent(bytes);
    }

    pub fn record_received(&self, bytes: usize) {
        self.stats().record_received(bytes);
    }

    pub fn record_fatal_error(&self) {
        self.stats().increment_fatal_errors();
    }

    /// Remove an entry if it still belongs to `registration`
    fn remove(&self, sequence: u16, registration: u64) -> bool {
        let mut table = self.table();
        match table.pending.get(&sequence) {
            Some(entry) if entry.registration == registration => {
                table.pending.remove(&sequence);
                true
            }
            _ => false,
        }
    }
}

/// The caller's side of an outstanding request
///
/// Dropping the handle before the reply arrives releases the sequence number;
/// a reply arriving later is treated as unmatched.
#[derive(Debug)]
pub struct ResponseHandle {
    dispatcher: Arc<Dispatcher>,
    sequence: u16,
    registration: u64,
    rx: Option<oneshot::Receiver<S7Result<Pdu>>>,
}

impl ResponseHandle {
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Wait for the reply until `deadline`
    ///
    /// # Errors
    ///
    /// `S7Error::Timeout` once the deadline passes, or the session's failure
    /// cause if it closed first.
    pub async fn wait(mut self, deadline: Instant) -> S7Result<Pdu> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(S7Error::NotConnected);
        };
        let outcome = tokio::time::timeout_at(deadline, rx).await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.dispatcher.closed_cause().unwrap_or(S7Error::NotConnected)),
            Err(_) if self.dispatcher.remove(self.sequence, self.registration) => {
                self.dispatcher.stats().increment_timeouts();
                log::debug!("Request #{} timed out", self.sequence);
                Err(S7Error::Timeout)
            }
            // completed right at the deadline
            Err(_) => self
                .rx
                .as_mut()
                .and_then(|rx| rx.try_recv().ok())
                .unwrap_or(Err(S7Error::Timeout)),
        };
        self.rx = None;
        result
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        // `rx` is only cleared once `wait` has run to completion
        if self.rx.is_some() && self.dispatcher.remove(self.sequence, self.registration) {
            self.dispatcher.stats().increment_cancellations();
            log::debug!("Request #{} abandoned", self.sequence);
        }
    }
}
