//! Launch timeout.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::{Publisher, Subscriber};
use crate::clock::Clock;
use crate::event::Event;
use crate::projection::Projection;

/// Shared handle to the pending launch timeout.
///
/// Any clone may cancel; arming again cancels the previous timer.
#[derive(Debug, Clone, Default)]
pub struct TimeoutGuard {
    token: Arc<Mutex<Option<CancellationToken>>>,
}

impl TimeoutGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh token and return it.
    fn rearm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.token.lock().replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel the pending timeout, if any. Idempotent.
    pub fn cancel(&self) {
        if let Some(token) = self.token.lock().take() {
            debug!("launch timeout cancelled");
            token.cancel();
        }
    }

    /// Whether a timeout is currently armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.token
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

/// Arms the launch timeout on `AppLaunched`.
pub struct LaunchHandler {
    guard: TimeoutGuard,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl LaunchHandler {
    #[must_use]
    pub fn new(
        guard: TimeoutGuard,
        publisher: Publisher,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            guard,
            publisher,
            clock,
            timeout,
        }
    }

    fn arm(&self) {
        let token = self.guard.rearm();
        let publisher = self.publisher.clone();
        let clock = Arc::clone(&self.clock);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = clock.sleep(timeout) => {
                    if !token.is_cancelled() {
                        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                        info!(timeout_ms, "launch timed out");
                        token.cancel();
                        publisher.publish(Event::AppTimedOut);
                    }
                }
            }
        });
    }
}

impl Subscriber<Projection> for LaunchHandler {
    fn on_event(&mut self, event: &Event, _: &Projection) {
        if matches!(event, Event::AppLaunched) {
            self.arm();
        }
    }
}
