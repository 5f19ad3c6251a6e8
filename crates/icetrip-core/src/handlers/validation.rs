//! Liveness validation.

use std::sync::Arc;

use tracing::warn;

use crate::bus::{Publisher, Subscriber};
use crate::event::Event;
use crate::gateway::RemoteGateway;
use crate::projection::Projection;

/// Reason reported when the liveness document is present but unusable.
pub const LIVENESS_REJECTED: &str = "liveness_check_failed";

/// Runs the liveness check on every `AttributionReceived`.
pub struct ValidationHandler {
    gateway: Arc<dyn RemoteGateway>,
    publisher: Publisher,
}

impl ValidationHandler {
    #[must_use]
    pub fn new(gateway: Arc<dyn RemoteGateway>, publisher: Publisher) -> Self {
        Self { gateway, publisher }
    }

    fn validate(&self) {
        self.publisher.publish(Event::ValidationTriggered);
        let gateway = Arc::clone(&self.gateway);
        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            let outcome = match gateway.check_liveness().await {
                Ok(true) => Event::ValidationSucceeded,
                Ok(false) => Event::ValidationFailed {
                    reason: LIVENESS_REJECTED.to_string(),
                },
                Err(err) => {
                    warn!(error = %err, "liveness check failed");
                    Event::ValidationFailed {
                        reason: err.to_string(),
                    }
                }
            };
            publisher.publish(outcome);
        });
    }
}

impl Subscriber<Projection> for ValidationHandler {
    fn on_event(&mut self, event: &Event, _: &Projection) {
        if let Event::AttributionReceived(_) = event {
            self.validate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus;
    use crate::event::Payload;
    use crate::gateway::GatewayError;
    use async_trait::async_trait;

    struct Liveness(Result<bool, GatewayError>);

    #[async_trait]
    impl RemoteGateway for Liveness {
        async fn check_liveness(&self) -> Result<bool, GatewayError> {
            self.0.clone()
        }

        async fn pull_attribution(&self, _: &str) -> Result<Payload, GatewayError> {
            Ok(Payload::new())
        }

        async fn fetch_destination(&self, _: &Payload) -> Result<String, GatewayError> {
            Err(GatewayError::NoAttempts)
        }
    }

    async fn run(outcome: Result<bool, GatewayError>) -> Vec<Event> {
        let (publisher, mut inbox) = bus::channel();
        let mut handler = ValidationHandler::new(Arc::new(Liveness(outcome)), publisher);
        handler.on_event(&Event::AttributionReceived(Payload::new()), &Projection::new());
        let first = inbox.recv().await.expect("triggered");
        let second = inbox.recv().await.expect("outcome");
        vec![first, second]
    }

    #[tokio::test]
    async fn live_marker_succeeds() {
        assert_eq!(
            run(Ok(true)).await,
            vec![Event::ValidationTriggered, Event::ValidationSucceeded]
        );
    }

    #[tokio::test]
    async fn unusable_marker_fails_with_fixed_reason() {
        assert_eq!(
            run(Ok(false)).await[1],
            Event::ValidationFailed {
                reason: LIVENESS_REJECTED.into()
            }
        );
    }

    #[tokio::test]
    async fn transport_error_text_becomes_reason() {
        let events = run(Err(GatewayError::Transport("dns".into()))).await;
        let Event::ValidationFailed { reason } = &events[1] else {
            panic!("expected failure, got {:?}", events[1]);
        };
        assert!(reason.contains("dns"));
    }

    #[tokio::test]
    async fn other_events_are_ignored() {
        let (publisher, mut inbox) = bus::channel();
        let mut handler = ValidationHandler::new(Arc::new(Liveness(Ok(true))), publisher);
        handler.on_event(&Event::DeeplinkReceived(Payload::new()), &Projection::new());
        tokio::task::yield_now().await;
        assert!(inbox.try_recv().is_none());
    }
}
