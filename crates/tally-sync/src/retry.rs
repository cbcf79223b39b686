//! # Retry Policy
//!
//! The one place that decides whether a failed mutation retries or is
//! evicted. Every mutation kind's handler consults this instead of
//! re-implementing the cap check.
//!
//! There is deliberately no per-mutation backoff timer here: attempts are
//! naturally spaced by reconnect/foreground events, and the bounded counter
//! is what prevents retrying forever.

use chrono::Utc;

use tally_core::SyncAttempts;

/// What to do with a mutation after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Keep the mutation queued; it gets another attempt next pass.
    Retry,

    /// The cap is reached: remove the mutation and report it as lost.
    Evict,
}

/// Bounded-attempts eviction policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// A policy that evicts after `max_attempts` failures.
    pub fn new(max_attempts: u32) -> Self {
        RetryPolicy { max_attempts }
    }

    /// The configured cap.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Records a failed attempt and decides the mutation's fate.
    pub fn register_failure(
        &self,
        attempts: &mut SyncAttempts,
        error: impl Into<String>,
    ) -> RetryDisposition {
        attempts.record_failure(error, Utc::now());

        if attempts.retry_count >= self.max_attempts {
            RetryDisposition::Evict
        } else {
            RetryDisposition::Retry
        }
    }

    /// True when bookkeeping already shows the cap reached (used by the
    /// periodic cleanup sweep).
    pub fn is_exhausted(&self, attempts: &SyncAttempts) -> bool {
        attempts.retry_count >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_exactly_at_cap() {
        let policy = RetryPolicy::new(5);
        let mut attempts = SyncAttempts::new();

        for attempt in 1..5 {
            assert_eq!(
                policy.register_failure(&mut attempts, "HTTP 503"),
                RetryDisposition::Retry,
                "attempt {attempt} should still retry"
            );
        }
        assert_eq!(
            policy.register_failure(&mut attempts, "HTTP 503"),
            RetryDisposition::Evict
        );
        assert_eq!(attempts.retry_count, 5);
        assert!(policy.is_exhausted(&attempts));
    }

    #[test]
    fn test_bookkeeping_updated_on_every_failure() {
        let policy = RetryPolicy::new(3);
        let mut attempts = SyncAttempts::new();

        policy.register_failure(&mut attempts, "first");
        policy.register_failure(&mut attempts, "second");

        assert_eq!(attempts.retry_count, 2);
        assert_eq!(attempts.last_error.as_deref(), Some("second"));
        assert!(attempts.last_attempt_at.is_some());
    }
}
