//! Time source for timers, backoff sleeps and permission timestamps.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Wall clock plus an async sleep.
///
/// Every suspension point in the launch funnel (launch timeout, merge
/// window, relay delay, attribution cushion, retry backoff) sleeps through
/// this trait so tests can observe and control elapsed time.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Production clock: `chrono::Utc::now` and `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Milliseconds since the Unix epoch for `at`.
#[must_use]
pub fn epoch_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Inverse of [`epoch_millis`]; `None` for out-of-range values.
#[must_use]
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_millis_round_trips() {
        let at = from_epoch_millis(1_700_000_000_123).expect("in range");
        assert_eq!(epoch_millis(at), 1_700_000_000_123);
    }

    #[tokio::test(start_paused = true)]
    async fn system_clock_sleep_uses_tokio_time() {
        let started = tokio::time::Instant::now();
        SystemClock.sleep(Duration::from_secs(30)).await;
        assert!(started.elapsed() >= Duration::from_secs(30));
    }
}
