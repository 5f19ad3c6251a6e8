//! Notification permission: persisting outcomes and asking the system.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::bus::{Publisher, Subscriber};
use crate::clock::Clock;
use crate::event::Event;
use crate::projection::Projection;
use crate::store::Store;

/// The platform's permission prompt.
#[async_trait]
pub trait PermissionPrompter: Send + Sync {
    /// Show the prompt. `Ok(true)` if the user allowed notifications.
    ///
    /// # Errors
    ///
    /// Returns an error if the prompt could not be shown.
    async fn request_authorization(&self) -> anyhow::Result<bool>;
}

/// The platform's remote-notification registration.
pub trait PushRegistrar: Send + Sync {
    fn register_for_remote_notifications(&self);
}

/// Registrar that does nothing; used where no push backend exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRegistrar;

impl PushRegistrar for NoopRegistrar {
    fn register_for_remote_notifications(&self) {}
}

/// Persists permission outcomes and registers for push on grant.
pub struct PermissionHandler {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    registrar: Arc<dyn PushRegistrar>,
}

impl PermissionHandler {
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        clock: Arc<dyn Clock>,
        registrar: Arc<dyn PushRegistrar>,
    ) -> Self {
        Self {
            store,
            clock,
            registrar,
        }
    }

    fn persist(&self, given: bool, blocked: bool) {
        if let Err(err) = self.store.save_permission(given, blocked, self.clock.now()) {
            warn!(error = %err, "failed to persist permission outcome");
        }
    }
}

impl Subscriber<Projection> for PermissionHandler {
    fn on_event(&mut self, event: &Event, _: &Projection) {
        match event {
            Event::PermissionGranted => {
                self.persist(true, false);
                self.registrar.register_for_remote_notifications();
            }
            Event::PermissionDenied => self.persist(false, true),
            Event::PermissionDeferred => self.persist(false, false),
            _ => {}
        }
    }
}

/// UI-facing entry point for the permission sheet.
#[derive(Clone)]
pub struct PermissionRequester {
    prompter: Arc<dyn PermissionPrompter>,
    publisher: Publisher,
}

impl PermissionRequester {
    #[must_use]
    pub fn new(prompter: Arc<dyn PermissionPrompter>, publisher: Publisher) -> Self {
        Self {
            prompter,
            publisher,
        }
    }

    /// Ask the system prompt; publishes `PermissionGranted` or
    /// `PermissionDenied`. A prompt that cannot be shown counts as deferred
    /// and continues to the destination like [`Self::defer`].
    pub fn request_permission(&self) -> tokio::task::JoinHandle<()> {
        self.publisher.publish(Event::PermissionDialogRequested);
        let prompter = Arc::clone(&self.prompter);
        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            let outcome = match prompter.request_authorization().await {
                Ok(true) => Event::PermissionGranted,
                Ok(false) => Event::PermissionDenied,
                Err(err) => {
                    warn!(error = %err, "permission prompt unavailable");
                    Event::PermissionDeferred
                }
            };
            info!(outcome = %outcome.kind(), "permission prompt answered");
            let deferred = outcome == Event::PermissionDeferred;
            publisher.publish(outcome);
            if deferred {
                publisher.publish(Event::NavigateToDestination);
            }
        })
    }

    /// The user dismissed the sheet without answering: record the deferral
    /// and continue to the destination.
    pub fn defer(&self) {
        self.publisher.publish(Event::PermissionDeferred);
        self.publisher.publish(Event::NavigateToDestination);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus;
    use crate::clock::{SystemClock, epoch_millis};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingRegistrar(AtomicUsize);

    impl PushRegistrar for CountingRegistrar {
        fn register_for_remote_notifications(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Answer(Option<bool>);

    #[async_trait]
    impl PermissionPrompter for Answer {
        async fn request_authorization(&self) -> anyhow::Result<bool> {
            self.0.ok_or_else(|| anyhow::anyhow!("no window"))
        }
    }

    #[test]
    fn outcomes_are_persisted_and_grant_registers() {
        let store = Arc::new(Store::in_memory());
        let registrar = Arc::new(CountingRegistrar::default());
        let mut handler = PermissionHandler::new(
            Arc::clone(&store),
            Arc::new(SystemClock),
            Arc::clone(&registrar) as Arc<dyn PushRegistrar>,
        );

        handler.on_event(&Event::PermissionDenied, &Projection::new());
        let denied = store.load();
        assert!(denied.perm_blocked);
        assert!(!denied.perm_given);
        assert!(denied.perm_date.is_some_and(|at| epoch_millis(at) > 0));
        assert_eq!(registrar.0.load(Ordering::SeqCst), 0);

        handler.on_event(&Event::PermissionGranted, &Projection::new());
        let granted = store.load();
        assert!(granted.perm_given);
        assert!(!granted.perm_blocked);
        assert_eq!(registrar.0.load(Ordering::SeqCst), 1);

        handler.on_event(&Event::PermissionDeferred, &Projection::new());
        let deferred = store.load();
        assert!(!deferred.perm_given);
        assert!(!deferred.perm_blocked);
    }

    async fn ask(answer: Option<bool>) -> Vec<Event> {
        let (publisher, mut inbox) = bus::channel();
        let requester = PermissionRequester::new(Arc::new(Answer(answer)), publisher);
        requester.request_permission().await.expect("prompt task");
        std::iter::from_fn(|| inbox.try_recv()).collect()
    }

    #[test]
    fn defer_continues_to_destination() {
        let (publisher, mut inbox) = bus::channel();
        PermissionRequester::new(Arc::new(Answer(None)), publisher).defer();
        let events: Vec<_> = std::iter::from_fn(|| inbox.try_recv()).collect();
        assert_eq!(
            events,
            vec![Event::PermissionDeferred, Event::NavigateToDestination]
        );
    }

    #[tokio::test]
    async fn request_publishes_dialog_then_outcome() {
        assert_eq!(
            ask(Some(true)).await,
            vec![Event::PermissionDialogRequested, Event::PermissionGranted]
        );
        assert_eq!(
            ask(Some(false)).await,
            vec![Event::PermissionDialogRequested, Event::PermissionDenied]
        );
        assert_eq!(
            ask(None).await,
            vec![
                Event::PermissionDialogRequested,
                Event::PermissionDeferred,
                Event::NavigateToDestination,
            ]
        );
    }
}
