//! Observable connection state

use s7_core::S7Result;
use s7_session::ConnectionState;
use tokio::sync::watch;

/// Connection state shared between the connection and its driver task
///
/// Changes are validated against the lifecycle and published on a watch
/// channel.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(ConnectionState::Disconnected),
        }
    }

    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Move to `next` if the lifecycle allows it
    pub fn transition(&self, next: ConnectionState) -> S7Result<()> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|state| match state.validate_transition(next) {
            Ok(()) => {
                log::debug!("Connection state {} -> {}", state, next);
                let changed = *state != next;
                *state = next;
                changed
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }

    /// Move from `expected` to `next` atomically; false if the state differed
    pub fn compare_and_set(&self, expected: ConnectionState, next: ConnectionState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == expected && state.validate_transition(next).is_ok() {
                log::debug!("Connection state {} -> {}", state, next);
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_published() {
        let cell = StateCell::new();
        let mut rx = cell.subscribe();
        assert!(cell.compare_and_set(ConnectionState::Disconnected, ConnectionState::CotpConnecting));
        assert!(!cell.compare_and_set(ConnectionState::Disconnected, ConnectionState::CotpConnecting));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::CotpConnecting);

        assert!(cell.transition(ConnectionState::Ready).is_err());
        cell.transition(ConnectionState::CotpConnected).unwrap();
        cell.transition(ConnectionState::Disconnected).unwrap();
        assert_eq!(cell.get(), ConnectionState::Disconnected);
    }
}
