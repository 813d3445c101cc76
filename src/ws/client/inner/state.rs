use std::time::Duration;

use tokio::{sync::watch, time::Instant};

/// Gateway connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// client constructed, never connected
    Created,
    /// connect requested, driver prepared
    Initialized,
    /// opening socket and identifying a new session
    Connecting,
    /// handshake done, events flowing
    Ready,
    /// connection lost, waiting to retry
    Reconnecting,
    /// opening socket and resuming the last session
    Resuming,
    /// disconnect requested
    Disconnecting,
    /// disconnected on request, final
    Disconnected,
    /// too many failures, final and not recoverable
    Dead,
}

impl ConnectionState {
    /// no state follows this one
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Dead)
    }

    /// frames sent in this state are queued for the connection
    pub fn accepts_frames(self) -> bool {
        matches!(
            self,
            Self::Initialized | Self::Connecting | Self::Ready | Self::Reconnecting | Self::Resuming
        )
    }
}

/// Shared, observable connection state.
///
/// Final states are never left, and disconnecting can only end in a final state.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl Default for StateCell {
    fn default() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Created);
        Self { tx }
    }
}

impl StateCell {
    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Move to `next`, returns false if current state does not allow it
    pub fn set(&self, next: ConnectionState) -> bool {
        let mut moved = false;

        self.tx.send_if_modified(|current| {
            let allowed = match *current {
                s if s.is_terminal() => false,
                ConnectionState::Disconnecting => next.is_terminal(),
                s => s != next,
            };

            if allowed {
                log::debug!("Move from {:?} to {:?} state", *current, next);
                *current = next;
            }

            moved = allowed;
            allowed
        });

        moved
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

/// Gateway session, decides between identify and resume on every connect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// session id from last ready event
    pub session_id: Option<String>,
    /// sequence of the last received dispatch, zero before any
    pub last_sequence: u64,
    /// whether the next connect should resume
    pub resumable: bool,
}

impl Session {
    /// Arguments for resume, if the session can be resumed
    pub fn resume_arguments(&self) -> Option<(&str, u64)> {
        match self.session_id {
            Some(ref id) if self.resumable => Some((id.as_str(), self.last_sequence)),
            _ => None,
        }
    }

    /// Start a new session after a ready event
    pub fn start(&mut self, session_id: String) {
        self.session_id = Some(session_id);
        self.resumable = true;
    }

    /// Forget the session, next connect will identify
    pub fn invalidate(&mut self) {
        self.session_id = None;
        self.last_sequence = 0;
        self.resumable = false;
    }
}

/// Abnormal close counter over a rolling window, the reconnect circuit breaker.
///
/// The count starts over when the gap since the previous failure exceeds the window.
#[derive(Debug, Clone)]
pub struct FailureWindow {
    count: u32,
    last_failure: Option<Instant>,
    threshold: u32,
    window: Duration,
}

impl FailureWindow {
    /// Create a window which trips at `threshold` failures within `window`
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            count: 0,
            last_failure: None,
            threshold: threshold.max(1),
            window,
        }
    }

    /// failures counted in current window
    pub fn count(&self) -> u32 {
        self.count
    }

    /// failures that trip the breaker
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Count a failure at `now`, returns true if threshold is reached
    pub fn record(&mut self, now: Instant) -> bool {
        match self.last_failure {
            Some(last) if now.saturating_duration_since(last) <= self.window => {
                self.count += 1;
            }
            _ => self.count = 1,
        }
        self.last_failure = Some(now);

        self.count >= self.threshold
    }
}
