//! Cancellable deadlines owned by the session task.
//!
//! A [`Timeout`] is only a deadline; the session task sleeps until the
//! earliest armed deadline and then asks each timer whether it fired.
//! Cancelling is always allowed, including after the timer fired.

use std::time::Duration;
use tokio::time::Instant;

/// A one-shot, re-armable deadline.
#[derive(Debug, Clone)]
pub(crate) struct Timeout {
    duration: Duration,
    deadline: Option<Instant>,
}

impl Timeout {
    /// Create a disarmed timer.
    pub(crate) fn new(duration: Duration) -> Self {
        Self {
            duration,
            deadline: None,
        }
    }

    /// Arm the timer to fire `duration` after `now`, replacing any previous deadline.
    pub(crate) fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.duration);
    }

    /// Disarm the timer. No-op if it is not armed.
    pub(crate) fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Get the deadline if armed.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Check if the timer is armed.
    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarm and return `true` if the deadline has passed.
    pub(crate) fn take_expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Get the earliest of several optional deadlines.
pub(crate) fn earliest(deadlines: impl IntoIterator<Item = Option<Instant>>) -> Option<Instant> {
    deadlines.into_iter().flatten().min()
}
