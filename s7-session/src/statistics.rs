//! Session statistics collection

/// Session statistics
///
/// Typed diagnostics counters for one connection. The dispatcher updates them
/// while frames flow; callers read a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatistics {
    /// Total number of S7 PDUs sent
    pub pdus_sent: u64,
    /// Total number of S7 PDUs received
    pub pdus_received: u64,
    /// Total payload bytes sent (S7 PDU level)
    pub bytes_sent: u64,
    /// Total payload bytes received (S7 PDU level)
    pub bytes_received: u64,
    /// Requests that missed their deadline
    pub timeouts: u64,
    /// Replies whose sequence number matched no outstanding request
    pub unexpected_replies: u64,
    /// Requests abandoned by their caller before a reply arrived
    pub cancellations: u64,
    /// Fatal transport or protocol failures
    pub fatal_errors: u64,
}

impl SessionStatistics {
    /// Create new statistics with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all statistics counters
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.pdus_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.pdus_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn increment_timeouts(&mut self) {
        self.timeouts += 1;
    }

    pub fn increment_unexpected_replies(&mut self) {
        self.unexpected_replies += 1;
    }

    pub fn increment_cancellations(&mut self) {
        self.cancellations += 1;
    }

    pub fn increment_fatal_errors(&mut self) {
        self.fatal_errors += 1;
    }

    /// Share of sent requests that timed out, as a percentage
    ///
    /// Returns 0.0 if nothing has been sent.
    pub fn timeout_rate(&self) -> f64 {
        if self.pdus_sent == 0 {
            0.0
        } else {
            (self.timeouts as f64 / self.pdus_sent as f64) * 100.0
        }
    }
}
