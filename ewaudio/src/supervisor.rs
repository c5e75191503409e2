//! Failure supervision: reconnect backoff and the stall watchdog
//!
//! Connection resets are retried with doubling backoff up to a cap;
//! once the cap is exhausted the next reset escalates to a hard network
//! failure. The retry counter is cumulative over the life of a stream,
//! so a flaky link cannot reset its own budget by limping along.
//!
//! The watchdog fires when no I/O activity is observed for the timeout
//! window. Stalls are hard failures: a silently dead connection looks
//! healthy to the socket layer, so waiting longer never helps.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub struct RetryPolicy {
    max_retries: u32,
    attempts: u32,
    base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            attempts: 0,
            base: Duration::from_millis(500),
        }
    }

    /// Backoff before the next reconnect attempt, or `None` when the
    /// budget is exhausted and the failure must escalate
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_retries {
            return None;
        }
        let delay = self.base * 2u32.pow(self.attempts);
        self.attempts += 1;
        debug!(attempt = self.attempts, ?delay, "scheduling reconnect");
        Some(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

pub struct Watchdog {
    timeout: Duration,
    last_activity: Instant,
    armed: bool,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_activity: Instant::now(),
            armed: true,
        }
    }

    /// Record I/O activity
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Disarm while the stream is deliberately idle (paused, or the
    /// reader unscheduled on backpressure)
    pub fn suspend(&mut self) {
        self.armed = false;
    }

    /// Re-arm with a fresh window
    pub fn resume(&mut self) {
        self.armed = true;
        self.last_activity = Instant::now();
    }

    pub fn expired(&self) -> bool {
        self.armed && self.last_activity.elapsed() >= self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_escalates() {
        let mut policy = RetryPolicy::new(3);
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(2000)));
        assert_eq!(policy.next_backoff(), None);
        assert_eq!(policy.attempts(), 3);
    }

    #[test]
    fn zero_budget_escalates_immediately() {
        let mut policy = RetryPolicy::new(0);
        assert_eq!(policy.next_backoff(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_fires_after_silence() {
        let mut dog = Watchdog::new(Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!dog.expired());
        dog.touch();
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!dog.expired());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(dog.expired());
    }

    #[tokio::test(start_paused = true)]
    async fn suspended_watchdog_never_fires() {
        let mut dog = Watchdog::new(Duration::from_secs(10));
        dog.suspend();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!dog.expired());
        dog.resume();
        assert!(!dog.expired());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(dog.expired());
    }
}
