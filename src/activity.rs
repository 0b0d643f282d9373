//! Debounced activity flag
//!
//! Every motion pulse sets the flag and pushes its expiry out by the full
//! timeout (refresh, not coalesce). The flag clears once the timeout elapses
//! after the last pulse.

use crate::scheduler::ScheduledTask;
use std::time::Duration;
use tokio::time::Instant;

/// Snapshot of the activity flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityState {
    pub active: bool,
    /// Remaining time until the flag clears, if set
    pub expires_in_ms: Option<u64>,
}

/// Activity flag with its pending auto-clear task
#[derive(Debug)]
pub struct ActivityDebouncer {
    timeout: Duration,
    active: bool,
    expires_at: Option<Instant>,
    clear_task: Option<ScheduledTask>,
}

impl ActivityDebouncer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            active: false,
            expires_at: None,
            clear_task: None,
        }
    }

    /// Set the flag and return the new expiry deadline.
    ///
    /// Any pending auto-clear is cancelled; the caller arms a replacement
    /// with [`ActivityDebouncer::arm`].
    pub fn pulse(&mut self, now: Instant) -> Instant {
        let deadline = now + self.timeout;
        self.active = true;
        self.expires_at = Some(deadline);
        if let Some(task) = self.clear_task.take() {
            task.cancel();
        }
        deadline
    }

    /// Install the auto-clear task, cancelling whichever one it replaces.
    pub fn arm(&mut self, task: ScheduledTask) {
        if let Some(previous) = self.clear_task.replace(task) {
            previous.cancel();
        }
    }

    /// Clear the flag if its deadline has passed. Returns whether it cleared.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) if self.active && now >= deadline => {
                self.active = false;
                self.expires_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.active && self.expires_at.is_some_and(|deadline| now < deadline)
    }

    pub fn state(&self, now: Instant) -> ActivityState {
        let active = self.is_active(now);
        ActivityState {
            active,
            expires_in_ms: self
                .expires_at
                .filter(|_| active)
                .map(|deadline| deadline.saturating_duration_since(now).as_millis() as u64),
        }
    }

    /// Drop any pending auto-clear task
    pub fn cancel(&mut self) {
        if let Some(task) = self.clear_task.take() {
            task.cancel();
        }
    }
}
