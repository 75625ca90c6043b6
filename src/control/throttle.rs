//! Lossy leading-edge rate limiting.
//!
//! [`RateLimiter`] accepts an update when at least `interval` has passed since
//! the last accepted one and drops it otherwise.  Nothing is queued and there
//! is no trailing flush: a dropped update is simply superseded by whatever
//! state is current at the next accepted update.
//!
//! Time comes from a [`Clock`], so tests can drive the limiter without
//! sleeping.
//!
//! ```
//! use std::time::Duration;
//! use promptdj::control::{ManualClock, RateLimiter, Throttle};
//!
//! let clock = ManualClock::new();
//! let mut limiter = RateLimiter::new(Duration::from_millis(250));
//!
//! assert_eq!(limiter.try_accept(clock.now()), Throttle::Sent);
//! clock.advance(Duration::from_millis(100));
//! assert_eq!(limiter.try_accept(clock.now()), Throttle::Dropped);
//! clock.advance(Duration::from_millis(150));
//! assert_eq!(limiter.try_accept(clock.now()), Throttle::Sent);
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of monotonic time for rate limiting and liveness bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time via [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.  Cheap to clone; clones share time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        ManualClock::now(self)
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Outcome of [`RateLimiter::try_accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttle {
    /// The update should go out now; the interval restarts.
    Sent,
    /// The interval has not elapsed; the update is discarded.
    Dropped,
}

/// Leading-edge, non-queuing rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    last_accepted: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_accepted: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Accept or drop an update arriving at `now`.
    pub fn try_accept(&mut self, now: Instant) -> Throttle {
        let open = match self.last_accepted {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if open {
            self.last_accepted = Some(now);
            Throttle::Sent
        } else {
            Throttle::Dropped
        }
    }

    /// Forget the last accepted update so the next one goes out immediately.
    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(250);

    #[test]
    fn first_update_is_sent() {
        let clock = ManualClock::new();
        let mut limiter = RateLimiter::new(INTERVAL);
        assert_eq!(limiter.try_accept(clock.now()), Throttle::Sent);
    }

    #[test]
    fn burst_within_interval_sends_once() {
        let clock = ManualClock::new();
        let mut limiter = RateLimiter::new(INTERVAL);

        let outcomes: Vec<_> = (0..5)
            .map(|_| {
                let o = limiter.try_accept(clock.now());
                clock.advance(Duration::from_millis(40));
                o
            })
            .collect();

        let sent = outcomes.iter().filter(|o| **o == Throttle::Sent).count();
        assert_eq!(sent, 1);
        assert_eq!(outcomes[0], Throttle::Sent);
    }

    #[test]
    fn dropped_updates_do_not_extend_the_window() {
        let clock = ManualClock::new();
        let mut limiter = RateLimiter::new(INTERVAL);

        limiter.try_accept(clock.now());
        clock.advance(Duration::from_millis(200));
        assert_eq!(limiter.try_accept(clock.now()), Throttle::Dropped);
        // 250 ms after the accepted update, not after the dropped one.
        clock.advance(Duration::from_millis(50));
        assert_eq!(limiter.try_accept(clock.now()), Throttle::Sent);
    }

    #[test]
    fn reset_reopens_immediately() {
        let clock = ManualClock::new();
        let mut limiter = RateLimiter::new(INTERVAL);
        limiter.try_accept(clock.now());
        limiter.reset();
        assert_eq!(limiter.try_accept(clock.now()), Throttle::Sent);
    }
}
