use super::backoff::BackoffPolicy;
use std::time::Duration;

/// A retry the driver should arm a single-shot timer for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub ticket: u64,
    pub delay: Duration,
}

/// Retry bookkeeping: attempt counter, ceiling and the single pending retry.
///
/// The timer itself lives in the driver; this type only hands out tickets and
/// decides whether a firing is still current.
#[derive(Debug, Clone)]
pub struct ReconnectScheduler {
    policy: BackoffPolicy,
    max_attempts: u32,
    attempts: u32,
    pending: Option<u64>,
    next_ticket: u64,
}

impl ReconnectScheduler {
    pub fn new(policy: BackoffPolicy, max_attempts: u32) -> Self {
        Self {
            policy,
            max_attempts,
            attempts: 0,
            pending: None,
            next_ticket: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Reserves the next retry. Returns `None` once the ceiling is reached.
    ///
    /// Any retry still pending is superseded; its ticket will no longer fire.
    pub fn schedule(&mut self) -> Option<ScheduledRetry> {
        if self.is_exhausted() {
            self.pending = None;
            return None;
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.pending = Some(ticket);

        Some(ScheduledRetry {
            ticket,
            delay: self.policy.delay(self.attempts),
        })
    }

    /// Claims a timer firing. Increments the attempt counter when `ticket` is current.
    pub fn fire(&mut self, ticket: u64) -> bool {
        if self.pending != Some(ticket) {
            return false;
        }
        self.pending = None;
        self.attempts += 1;
        true
    }

    /// Drops the pending retry, if any. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Back to attempt zero with nothing pending
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.pending = None;
    }
}

impl Default for ReconnectScheduler {
    fn default() -> Self {
        Self::new(
            BackoffPolicy::default(),
            crate::types::MAX_RECONNECT_ATTEMPTS,
        )
    }
}
