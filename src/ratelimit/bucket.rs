use std::time::Duration;

use tokio::time::Instant;

/// Rate limit accounting for one resource class, as last reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Bucket {
    pub reset_at: Instant,
    pub remaining: u32,
}

impl Bucket {
    /// Time to wait before a request on this bucket is worth trying.
    pub fn wait(&self, now: Instant) -> Duration {
        if self.remaining > 0 {
            Duration::ZERO
        } else {
            self.reset_at.saturating_duration_since(now)
        }
    }
}

/// Sticky lockout applied to every REST call after a globally flagged 429.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct GlobalLockout {
    until: Option<Instant>,
}

impl GlobalLockout {
    pub fn wait(&self, now: Instant) -> Duration {
        self.until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default()
    }

    /// Extend the lockout to `until`, never shortening one already in place.
    pub fn extend(&mut self, until: Instant) {
        match self.until {
            Some(current) if current >= until => {}
            _ => self.until = Some(until),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bucket_with_remaining_never_waits() {
        let now = Instant::now();
        let bucket = Bucket {
            reset_at: now + Duration::from_secs(10),
            remaining: 1,
        };
        assert_eq!(bucket.wait(now), Duration::ZERO);
    }

    #[test]
    fn test_exhausted_bucket_waits_until_reset() {
        let now = Instant::now();
        let bucket = Bucket {
            reset_at: now + Duration::from_secs(10),
            remaining: 0,
        };
        assert_eq!(bucket.wait(now), Duration::from_secs(10));
        assert_eq!(bucket.wait(now + Duration::from_secs(11)), Duration::ZERO);
    }

    #[test]
    fn test_global_lockout_is_not_shortened() {
        let now = Instant::now();
        let mut global = GlobalLockout::default();
        assert_eq!(global.wait(now), Duration::ZERO);

        global.extend(now + Duration::from_secs(5));
        global.extend(now + Duration::from_secs(1));
        assert_eq!(global.wait(now), Duration::from_secs(5));
    }
}
