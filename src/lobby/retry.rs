//! Join Retry
//!
//! A failed relay join is retried once after a fixed delay, unless the
//! user has left the lobby in the meantime. Leaving is detected by
//! comparing the lobby id captured at scheduling time with the current
//! one when the retry comes due; there is no separate cancel handle.

use std::time::{Duration, Instant};

/// Default delay before the single retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct ScheduledRetry {
    lobby_id: String,
    due_at: Instant,
}

/// Tracks the one allowed retry for the current join attempt.
#[derive(Debug, Clone)]
pub struct JoinRetry {
    delay: Duration,
    scheduled: Option<ScheduledRetry>,
    used: bool,
}

impl JoinRetry {
    /// Create with a retry delay.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            scheduled: None,
            used: false,
        }
    }

    /// Schedule the retry after a failed join.
    ///
    /// Returns false when the retry was already spent; the caller should
    /// then treat the join as failed.
    pub fn schedule(&mut self, lobby_id: &str, now: Instant) -> bool {
        if self.used || lobby_id.is_empty() {
            return false;
        }
        self.used = true;
        self.scheduled = Some(ScheduledRetry {
            lobby_id: lobby_id.to_string(),
            due_at: now + self.delay,
        });
        true
    }

    /// Whether a retry is waiting to fire.
    pub fn is_pending(&self) -> bool {
        self.scheduled.is_some()
    }

    /// Fire the retry if it is due.
    ///
    /// Returns true at most once. A retry whose lobby no longer matches
    /// `current_lobby` is dropped without firing.
    pub fn poll(&mut self, now: Instant, current_lobby: Option<&str>) -> bool {
        let due = match &self.scheduled {
            Some(s) => now >= s.due_at,
            None => return false,
        };
        if !due {
            return false;
        }
        let Some(retry) = self.scheduled.take() else {
            return false;
        };
        matches!(current_lobby, Some(id) if !id.is_empty() && id == retry.lobby_id)
    }

    /// Forget any retry state, e.g. once a join succeeds or a new lobby
    /// is entered.
    pub fn reset(&mut self) {
        self.scheduled = None;
        self.used = false;
    }
}

impl Default for JoinRetry {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY)
    }
}
