//! Single-writer broadcast bus.
//!
//! Two halves:
//!
//! - [`Publisher`] / [`Inbox`]: an unbounded FIFO that any task may publish
//!   into. Async work (network calls, timers) re-enters orchestration only
//!   through a `Publisher`.
//! - [`EventBus`]: the subscriber table. The orchestration loop pops one
//!   event at a time from the inbox and calls [`EventBus::deliver`], which
//!   hands it to every registered subscriber in registration order.
//!
//! Because delivery happens on the one loop that owns the bus, a subscriber
//! always finishes the synchronous part of event *n* before any subscriber
//! sees event *n + 1*, and events published while a delivery is in progress
//! queue behind it.

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::event::Event;

/// A handler registered on an [`EventBus`].
///
/// `C` is read-only context handed alongside every event; the engine uses
/// the current [`crate::projection::Projection`].
pub trait Subscriber<C>: Send {
    /// React to one event. Must not block; spawn tasks for async work.
    fn on_event(&mut self, event: &Event, ctx: &C);
}

impl<C, F> Subscriber<C> for F
where
    F: FnMut(&Event, &C) + Send,
{
    fn on_event(&mut self, event: &Event, ctx: &C) {
        self(event, ctx);
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Slot<C> {
    id: SubscriptionId,
    subscriber: Box<dyn Subscriber<C>>,
}

/// Ordered subscriber table.
pub struct EventBus<C> {
    slots: Vec<Slot<C>>,
    next_id: u64,
    delivered: u64,
}

impl<C> Default for EventBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> EventBus<C> {
    /// Empty bus.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_id: 0,
            delivered: 0,
        }
    }

    /// Register a subscriber. It sees only events delivered after this call.
    pub fn subscribe(&mut self, subscriber: Box<dyn Subscriber<C>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.slots.push(Slot { id, subscriber });
        id
    }

    /// Remove a subscriber. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.slots.len();
        self.slots.retain(|slot| slot.id != id);
        self.slots.len() != before
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no subscribers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total events delivered so far.
    #[must_use]
    pub const fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Deliver one event to every subscriber, in registration order.
    pub fn deliver(&mut self, event: &Event, ctx: &C) {
        self.delivered += 1;
        trace!(event = %event.kind(), subscribers = self.slots.len(), "deliver");
        for slot in &mut self.slots {
            slot.subscriber.on_event(event, ctx);
        }
    }
}

/// Create a connected publisher / inbox pair.
#[must_use]
pub fn channel() -> (Publisher, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Publisher { tx }, Inbox { rx })
}

/// Cloneable sending half of the bus.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<Event>,
}

impl Publisher {
    /// Enqueue `event` for delivery. Fire-and-forget: if the orchestration
    /// loop has shut down the event is dropped.
    pub fn publish(&self, event: Event) {
        debug!(event = %event, "publish");
        if self.tx.send(event).is_err() {
            trace!("orchestration loop closed; event dropped");
        }
    }

    /// Whether the receiving loop is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of the bus, owned by the orchestration loop.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Inbox {
    /// Wait for the next event. `None` once every publisher is dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Pop an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}
