use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;

/// Fixed capacity sliding window counter.
///
/// Holds the timestamps of admitted actions in the last `window`, oldest first.
#[derive(Debug)]
pub(crate) struct SlidingWindow {
    capacity: usize,
    window: Duration,
    admitted: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            admitted: VecDeque::with_capacity(capacity),
        }
    }

    /// Try to admit one action at `now`.
    ///
    /// Returns zero and records `now` if admitted, otherwise the time left until
    /// the oldest recorded action leaves the window.
    pub fn check(&mut self, now: Instant) -> Duration {
        while let Some(oldest) = self.admitted.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }

        if self.admitted.len() >= self.capacity {
            return match self.admitted.front() {
                Some(oldest) => (*oldest + self.window)
                    .saturating_duration_since(now)
                    .max(Duration::from_millis(1)),
                // zero capacity, nothing will ever expire
                None => self.window,
            };
        }

        self.admitted.push_back(now);
        Duration::ZERO
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.admitted.len()
    }
}
