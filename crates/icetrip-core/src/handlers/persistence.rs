//! Write-through of settled facts.

use std::sync::Arc;

use tracing::warn;

use crate::bus::Subscriber;
use crate::event::Event;
use crate::projection::{ACTIVE_MODE, Projection};
use crate::store::{Store, StoreError};

pub struct PersistenceHandler {
    store: Arc<Store>,
}

impl PersistenceHandler {
    #[must_use]
    pub const fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    fn write(&self, event: &Event) -> Result<(), StoreError> {
        match event {
            Event::AttributionReceived(payload) | Event::AttributionFetchSucceeded(payload) => {
                self.store.save_attribution(payload)
            }
            Event::DeeplinkReceived(payload) => self.store.save_deeplink(payload),
            Event::DestinationFetchSucceeded { url } => first_error([
                self.store.save_url(url),
                self.store.save_mode(ACTIVE_MODE),
                self.store.mark_installed(),
            ]),
            _ => Ok(()),
        }
    }
}

/// First failure wins; later ones are logged.
fn first_error<const N: usize>(results: [Result<(), StoreError>; N]) -> Result<(), StoreError> {
    results.into_iter().fold(Ok(()), |first, next| match (first, next) {
        (Err(err), Err(later)) => {
            warn!(code = later.code().code(), error = %later, "persist failed");
            Err(err)
        }
        (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
        (Ok(()), Ok(())) => Ok(()),
    })
}

impl Subscriber<Projection> for PersistenceHandler {
    fn on_event(&mut self, event: &Event, _: &Projection) {
        if let Err(err) = self.write(event) {
            warn!(event = %event.kind(), code = err.code().code(), error = %err, "persist failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Payload;
    use crate::store::{KvBackend, MemoryBackend};

    /// Tier whose writes always fail.
    struct ReadOnlyTier;

    impl KvBackend for ReadOnlyTier {
        fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
        fn set(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::LockTimeout {
                path: "standard.json".into(),
                waited: std::time::Duration::from_secs(2),
            })
        }
        fn remove(&self, _: &str) -> Result<(), StoreError> {
            self.set("", "")
        }
        fn clear(&self) -> Result<(), StoreError> {
            self.set("", "")
        }
    }

    #[test]
    fn destination_success_marks_install() {
        let store = Arc::new(Store::in_memory());
        let mut handler = PersistenceHandler::new(Arc::clone(&store));
        handler.on_event(
            &Event::DestinationFetchSucceeded {
                url: "https://dest".into(),
            },
            &Projection::new(),
        );

        let data = store.load();
        assert_eq!(data.url.as_deref(), Some("https://dest"));
        assert_eq!(data.mode.as_deref(), Some(ACTIVE_MODE));
        assert!(!data.is_new_install);
    }

    #[test]
    fn legacy_mirror_failure_still_marks_install() {
        let store = Arc::new(Store::new(
            Box::new(MemoryBackend::new()),
            Box::new(ReadOnlyTier),
        ));
        let handler = PersistenceHandler::new(Arc::clone(&store));

        let err = handler
            .write(&Event::DestinationFetchSucceeded {
                url: "https://dest".into(),
            })
            .expect_err("mirror write fails");
        assert!(matches!(err, StoreError::LockTimeout { .. }));

        let data = store.load();
        assert_eq!(data.url.as_deref(), Some("https://dest"));
        assert_eq!(data.mode.as_deref(), Some(ACTIVE_MODE));
        assert!(!data.is_new_install);
    }

    #[test]
    fn payload_events_overwrite_stored_maps() {
        let store = Arc::new(Store::in_memory());
        let mut handler = PersistenceHandler::new(Arc::clone(&store));
        let mut first = Payload::new();
        first.insert("af_status".into(), "Organic".into());
        let mut fetched = Payload::new();
        fetched.insert("af_status".into(), "Non-organic".into());
        let mut deeplink = Payload::new();
        deeplink.insert("campaign".into(), "winter".into());

        handler.on_event(&Event::AttributionReceived(first), &Projection::new());
        handler.on_event(&Event::AttributionFetchSucceeded(fetched.clone()), &Projection::new());
        handler.on_event(&Event::DeeplinkReceived(deeplink.clone()), &Projection::new());

        let data = store.load();
        assert_eq!(data.attribution, fetched);
        assert_eq!(data.deeplink, deeplink);
    }

    #[test]
    fn unrelated_events_write_nothing() {
        let store = Arc::new(Store::in_memory());
        let mut handler = PersistenceHandler::new(Arc::clone(&store));
        for event in [
            Event::AppLaunched,
            Event::DestinationFetchFailed,
            Event::PermissionGranted,
            Event::NavigateToHome,
        ] {
            handler.on_event(&event, &Projection::new());
        }
        assert_eq!(store.load(), crate::store::PersistedData::default());
    }
}
