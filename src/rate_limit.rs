//! Notification rate limiting.
//!
//! Both limiters are driven by an explicit `now` so the owner's event loop
//! decides when time passes. Neither spawns timers of its own: `Debounce`
//! reports the instant it wants to be polled at through `deadline()`.

use std::time::{Duration, Instant};

/// Leading-edge throttle
///
/// The first call passes immediately and arms a cooldown. Calls during the
/// cooldown are dropped, not queued. The first call after the cooldown
/// passes immediately again.
#[derive(Debug, Clone)]
pub struct Throttle {
    limit: Duration,
    cooldown_until: Option<Instant>,
}

impl Throttle {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            cooldown_until: None,
        }
    }

    /// Whether a call at `now` passes; arms the cooldown when it does
    pub fn admit(&mut self, now: Instant) -> bool {
        if self.cooldown_until.is_some_and(|until| now < until) {
            return false;
        }
        self.cooldown_until = Some(now + self.limit);
        true
    }

    /// Pass `value` through if the call is admitted
    pub fn call<T>(&mut self, now: Instant, value: T) -> Option<T> {
        self.admit(now).then_some(value)
    }

    /// Drop any running cooldown
    pub fn cancel(&mut self) {
        self.cooldown_until = None;
    }
}

/// Trailing-edge debounce
///
/// Each call replaces the pending value and restarts the delay. The value is
/// released once, `delay` after the last call.
#[derive(Debug, Clone)]
pub struct Debounce<T> {
    delay: Duration,
    pending: Option<(Instant, T)>,
}

impl<T> Debounce<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn call(&mut self, now: Instant, value: T) {
        self.pending = Some((now + self.delay, value));
    }

    /// When the pending value is due, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(due, _)| *due)
    }

    /// Release the pending value if its delay has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.pending.take() {
            Some((due, value)) if now >= due => Some(value),
            other => {
                self.pending = other;
                None
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}
