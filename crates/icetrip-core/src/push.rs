//! Push-notification ingest.
//!
//! A notification may carry a URL that should override destination
//! resolution on the next flow run. The URL is stored as the transient
//! override, then announced to a listener after the relay delay.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::store::Store;

/// Candidate URL from a push payload.
///
/// Checked in order: `url`, `data.url`, `aps.data.url`, `custom.url`. The
/// first string found wins.
#[must_use]
pub fn extract_url(payload: &Map<String, Value>) -> Option<String> {
    const PATHS: [&[&str]; 4] = [
        &["url"],
        &["data", "url"],
        &["aps", "data", "url"],
        &["custom", "url"],
    ];

    PATHS.iter().find_map(|path| {
        let (last, parents) = path.split_last()?;
        let mut object = payload;
        for key in parents {
            object = object.get(*key)?.as_object()?;
        }
        object.get(*last)?.as_str().map(str::to_string)
    })
}

/// Stores push URLs and notifies a listener after the relay delay.
#[derive(Clone)]
pub struct PushNode {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    relay_delay: Duration,
    notify: Option<mpsc::UnboundedSender<String>>,
}

impl PushNode {
    #[must_use]
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, relay_delay: Duration) -> Self {
        Self {
            store,
            clock,
            relay_delay,
            notify: None,
        }
    }

    /// Subscribe to "load override URL" notifications. Replaces any earlier
    /// listener.
    pub fn listen(&mut self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notify = Some(tx);
        rx
    }

    /// Ingest one payload. Returns the extracted URL, if any.
    ///
    /// Must run inside a tokio runtime when a listener is registered.
    pub fn ingest(&self, payload: &Map<String, Value>) -> Option<String> {
        let url = extract_url(payload)?;
        if let Err(err) = self.store.save_override_url(&url) {
            warn!(error = %err, "failed to persist push override URL");
        }
        debug!(url = %url, "push override URL stored");

        if let Some(tx) = self.notify.clone() {
            let clock = Arc::clone(&self.clock);
            let delay = self.relay_delay;
            let announced = url.clone();
            tokio::spawn(async move {
                clock.sleep(delay).await;
                let _ = tx.send(announced);
            });
        }
        Some(url)
    }

    /// Persist a freshly issued messaging token.
    pub fn register_token(&self, token: &str) {
        if let Err(err) = self.store.save_push_token(token) {
            warn!(error = %err, "failed to persist push token");
        }
    }
}

impl std::fmt::Debug for PushNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushNode")
            .field("relay_delay", &self.relay_delay)
            .field("listening", &self.notify.is_some())
            .finish_non_exhaustive()
    }
}
