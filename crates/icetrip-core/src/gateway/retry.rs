//! Bounded retry with backoff for destination resolution.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::{GatewayError, RemoteGateway};
use crate::clock::Clock;
use crate::event::Payload;

/// Per-attempt delays. The number of delays is the attempt budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(9),
            Duration::from_secs(18),
            Duration::from_secs(36),
        ])
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    #[must_use]
    pub fn attempts(&self) -> usize {
        self.delays.len()
    }

    #[must_use]
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// How long to wait after attempt `index` failed with `error`.
    ///
    /// Rate limiting scales the delay by the attempt number; every other
    /// failure waits the plain delay.
    #[must_use]
    pub fn backoff(&self, index: usize, error: &GatewayError) -> Duration {
        let base = self.delays.get(index).copied().unwrap_or_default();
        if matches!(error, GatewayError::RateLimited) {
            let factor = u32::try_from(index + 1).unwrap_or(u32::MAX);
            base.saturating_mul(factor)
        } else {
            base
        }
    }
}

/// Run `attempt` up to `policy.attempts()` times, sleeping through `clock`
/// between failures. The last failure is returned once the budget is spent;
/// no sleep follows the final attempt.
///
/// # Errors
///
/// Returns the last attempt's error, or [`GatewayError::NoAttempts`] for an
/// empty policy.
pub async fn run_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    mut attempt: F,
) -> Result<T, GatewayError>
where
    F: FnMut(usize) -> Fut + Send,
    Fut: Future<Output = Result<T, GatewayError>> + Send,
{
    let mut last = None;
    for index in 0..policy.attempts() {
        match attempt(index).await {
            Ok(value) => {
                debug!(attempt = index + 1, "gateway attempt succeeded");
                return Ok(value);
            }
            Err(err) => {
                let remaining = policy.attempts() - index - 1;
                if remaining > 0 {
                    let wait = policy.backoff(index, &err);
                    warn!(
                        attempt = index + 1,
                        remaining,
                        delay_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "gateway attempt failed; backing off"
                    );
                    last = Some(err);
                    clock.sleep(wait).await;
                } else {
                    warn!(attempt = index + 1, error = %err, "gateway retry budget exhausted");
                    last = Some(err);
                }
            }
        }
    }
    Err(last.unwrap_or(GatewayError::NoAttempts))
}

/// Resolve the destination URL with the full retry policy.
///
/// # Errors
///
/// Returns the last attempt's error once the policy is exhausted.
pub async fn resolve_destination(
    gateway: &dyn RemoteGateway,
    clock: &dyn Clock,
    policy: &RetryPolicy,
    attribution: &Payload,
) -> Result<String, GatewayError> {
    run_with_backoff(policy, clock, |_| gateway.fetch_destination(attribution)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct RecordingClock {
        sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Clock for RecordingClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::<Utc>::UNIX_EPOCH
        }

        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().push(duration);
        }
    }

    struct Scripted {
        outcomes: Mutex<VecDeque<Result<String, GatewayError>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<String, GatewayError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteGateway for Scripted {
        async fn check_liveness(&self) -> Result<bool, GatewayError> {
            Ok(true)
        }

        async fn pull_attribution(&self, _device_id: &str) -> Result<Payload, GatewayError> {
            Ok(Payload::new())
        }

        async fn fetch_destination(&self, _attribution: &Payload) -> Result<String, GatewayError> {
            *self.calls.lock() += 1;
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::Transport("script ran out".into())))
        }
    }

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_secs).collect()
    }

    #[tokio::test]
    async fn rate_limits_scale_backoff() {
        let clock = RecordingClock::default();
        let gateway = Scripted::new(vec![
            Err(GatewayError::RateLimited),
            Err(GatewayError::RateLimited),
            Ok("https://dest".into()),
        ]);

        let url = resolve_destination(&gateway, &clock, &RetryPolicy::default(), &Payload::new())
            .await
            .expect("third attempt succeeds");

        assert_eq!(url, "https://dest");
        assert_eq!(*clock.sleeps.lock(), secs(&[9, 36]));
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error_without_fourth_attempt() {
        let clock = RecordingClock::default();
        let gateway = Scripted::new(vec![
            Err(GatewayError::Status { status: 500 }),
            Err(GatewayError::Decode("ok=false".into())),
            Err(GatewayError::Status { status: 503 }),
            Ok("https://never".into()),
        ]);

        let err = resolve_destination(&gateway, &clock, &RetryPolicy::default(), &Payload::new())
            .await
            .expect_err("budget spent");

        assert_eq!(err, GatewayError::Status { status: 503 });
        assert_eq!(*gateway.calls.lock(), 3);
        assert_eq!(*clock.sleeps.lock(), secs(&[9, 18]));
    }

    #[tokio::test]
    async fn trailing_rate_limit_is_the_reported_error() {
        let clock = RecordingClock::default();
        let gateway = Scripted::new(vec![
            Err(GatewayError::Transport("reset".into())),
            Err(GatewayError::RateLimited),
            Err(GatewayError::RateLimited),
        ]);

        let err = resolve_destination(&gateway, &clock, &RetryPolicy::default(), &Payload::new())
            .await
            .expect_err("budget spent");

        assert_eq!(err, GatewayError::RateLimited);
        assert_eq!(*clock.sleeps.lock(), secs(&[9, 36]));
    }

    #[tokio::test]
    async fn empty_policy_makes_no_attempt() {
        let clock = RecordingClock::default();
        let gateway = Scripted::new(vec![Ok("https://dest".into())]);

        let err = resolve_destination(
            &gateway,
            &clock,
            &RetryPolicy::new(Vec::new()),
            &Payload::new(),
        )
        .await
        .expect_err("no budget");

        assert_eq!(err, GatewayError::NoAttempts);
        assert_eq!(*gateway.calls.lock(), 0);
    }
}
