//! Cooperative token bucket gating outbound vulnerability queries.

use opsmith_core::{Error, Result};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Token bucket with capacity 1.
///
/// The first `acquire` proceeds immediately; subsequent acquisitions are
/// spaced at least one refill interval apart, so a burst of K calls takes at
/// least `(K - 1) / rate` wall-clock seconds. Waiters yield the task rather
/// than the thread.
pub struct RateLimiter {
    next_free: Mutex<Instant>,
    interval: Duration,
}

impl RateLimiter {
    /// Create a limiter granting `rate_per_sec` tokens per second.
    #[must_use]
    pub fn new(rate_per_sec: f64) -> Self {
        let rate = if rate_per_sec > 0.0 { rate_per_sec } else { 1.0 };
        Self {
            next_free: Mutex::new(Instant::now()),
            interval: Duration::from_secs_f64(1.0 / rate),
        }
    }

    /// Wait for the next token, or bail out when `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        let wait_until = self.reserve().await;
        tokio::select! {
            () = cancel.cancelled() => Err(Error::config("operation cancelled")),
            () = tokio::time::sleep_until(wait_until) => Ok(()),
        }
    }

    /// Take a token without waiting; errors when none is available.
    pub fn try_acquire(&self) -> Result<()> {
        let mut next_free = self
            .next_free
            .try_lock()
            .map_err(|_| Error::RateLimited)?;
        let now = Instant::now();
        if *next_free > now {
            return Err(Error::RateLimited);
        }
        *next_free = now + self.interval;
        Ok(())
    }

    /// Reserve the next slot and return the instant it becomes usable.
    async fn reserve(&self) -> Instant {
        let mut next_free = self.next_free.lock().await;
        let now = Instant::now();
        let slot = (*next_free).max(now);
        *next_free = slot + self.interval;
        slot
    }
}
