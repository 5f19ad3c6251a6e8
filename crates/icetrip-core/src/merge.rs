//! Conversion / deep-link correlation.
//!
//! The attribution SDK reports the install conversion and the deep link on
//! independent callbacks, in either order, possibly seconds apart. The
//! [`ConversionNode`] buffers both and forwards one merged record:
//!
//! ```text
//! conversion ──▶ buffer ──┬─ deep link already buffered ──▶ merge now
//!                         └─ start window timer ─▶ expiry ──▶ merge alone
//! deep link ──▶ (installed? drop) ──▶ deeplinkReceived ──▶ cancel timer
//!                                                      └─▶ merge if conversion buffered
//! merge ──▶ relay delay ──▶ attributionReceived(merged)
//! ```
//!
//! A deep link that arrives after the merge still produces
//! `deeplinkReceived` but never a second `attributionReceived`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::Publisher;
use crate::clock::Clock;
use crate::event::{Event, Payload, coerce_payload};
use crate::store::Store;

/// Prefix applied to deep-link keys inside the merged record.
pub const DEEP_PREFIX: &str = "deep_";

/// Merge a conversion payload with a deep-link payload.
///
/// Conversion keys are kept verbatim. Each deep-link key is added as
/// `deep_<key>` only if the conversion payload does not already carry that
/// prefixed key.
#[must_use]
pub fn merge_payloads(conversion: &Payload, deeplink: &Payload) -> Payload {
    let mut merged = conversion.clone();
    for (key, value) in deeplink {
        merged
            .entry(format!("{DEEP_PREFIX}{key}"))
            .or_insert_with(|| value.clone());
    }
    merged
}

/// Payload fed to the node when the SDK reports a conversion failure.
#[must_use]
pub fn conversion_error_payload(description: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("error".into(), "true".into());
    payload.insert("error_desc".into(), description.to_string());
    payload
}

/// Merge window and forward delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeTiming {
    pub window: Duration,
    pub relay_delay: Duration,
}

impl Default for MergeTiming {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(2_500),
            relay_delay: Duration::from_millis(2_500),
        }
    }
}

#[derive(Default)]
struct Buffer {
    conversion: Option<Payload>,
    deeplink: Option<Payload>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
    merged: bool,
}

impl Buffer {
    fn cancel_timer(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Shared {
    buffer: Mutex<Buffer>,
    store: Arc<Store>,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
    timing: MergeTiming,
}

/// Correlation buffer between the attribution SDK and the bus.
#[derive(Clone)]
pub struct ConversionNode {
    shared: Arc<Shared>,
}

impl ConversionNode {
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        publisher: Publisher,
        clock: Arc<dyn Clock>,
        timing: MergeTiming,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                buffer: Mutex::new(Buffer::default()),
                store,
                publisher,
                clock,
                timing,
            }),
        }
    }

    /// Raw SDK conversion callback.
    pub fn receive_conversion_json(&self, object: &Map<String, Value>) {
        self.receive_conversion(coerce_payload(object));
    }

    /// SDK conversion failure callback.
    pub fn receive_conversion_error(&self, description: &str) {
        self.receive_conversion(conversion_error_payload(description));
    }

    /// Buffer a conversion payload and (re)start the merge window. Merges
    /// immediately if a deep link is already buffered.
    pub fn receive_conversion(&self, payload: Payload) {
        let mut buffer = self.shared.buffer.lock();
        debug!(keys = payload.len(), "conversion buffered");
        buffer.conversion = Some(payload);
        buffer.merged = false;
        buffer.cancel_timer();

        if buffer.deeplink.is_some() {
            self.merge_locked(&mut buffer);
            return;
        }

        let generation = buffer.generation;
        let node = self.clone();
        buffer.timer = Some(tokio::spawn(async move {
            node.shared.clock.sleep(node.shared.timing.window).await;
            let mut buffer = node.shared.buffer.lock();
            if buffer.generation == generation && !buffer.merged {
                debug!("merge window expired without deep link");
                buffer.timer = None;
                node.merge_locked(&mut buffer);
            }
        }));
    }

    /// Raw SDK deep-link callback.
    pub fn receive_deeplink_json(&self, object: &Map<String, Value>) {
        self.receive_deeplink(coerce_payload(object));
    }

    /// Buffer a deep link. A no-op once the app is installed.
    pub fn receive_deeplink(&self, payload: Payload) {
        if self.shared.store.is_installed() {
            debug!("deep link ignored; app already installed");
            return;
        }
        let mut buffer = self.shared.buffer.lock();
        buffer.deeplink = Some(payload.clone());
        self.shared.publisher.publish(Event::DeeplinkReceived(payload));
        buffer.cancel_timer();
        if buffer.conversion.is_some() && !buffer.merged {
            self.merge_locked(&mut buffer);
        }
    }

    /// Whether a merged record has already been forwarded for the current
    /// conversion.
    #[must_use]
    pub fn has_merged(&self) -> bool {
        self.shared.buffer.lock().merged
    }

    fn merge_locked(&self, buffer: &mut Buffer) {
        let Some(conversion) = buffer.conversion.as_ref() else {
            return;
        };
        let merged = buffer.deeplink.as_ref().map_or_else(
            || conversion.clone(),
            |deeplink| merge_payloads(conversion, deeplink),
        );
        buffer.merged = true;
        info!(keys = merged.len(), "conversion merged");

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            shared.clock.sleep(shared.timing.relay_delay).await;
            shared.publisher.publish(Event::AttributionReceived(merged));
        });
    }
}

impl std::fmt::Debug for ConversionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionNode")
            .field("timing", &self.shared.timing)
            .finish_non_exhaustive()
    }
}
