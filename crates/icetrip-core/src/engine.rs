//! The orchestration loop.
//!
//! [`Engine`] owns the projection, the subscriber table and the inbox. Each
//! event popped from the inbox is folded into the projection first, then
//! delivered to handlers (which therefore see the post-event snapshot), then
//! published to UI watchers.
//!
//! Handler registration order is fixed: launch, validation, flow,
//! permission, persistence. Extra subscribers added through
//! [`Engine::subscribe`] run after the built-in handlers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::{self, EventBus, Inbox, Publisher, Subscriber, SubscriptionId};
use crate::clock::Clock;
use crate::config::TimingConfig;
use crate::event::Event;
use crate::gateway::{RemoteGateway, RetryPolicy};
use crate::handlers::{
    Connectivity, FlowDeps, FlowHandler, LaunchHandler, PermissionHandler, PermissionPrompter,
    PermissionRequester, PersistenceHandler, PushRegistrar, TimeoutGuard, ValidationHandler,
    watch_connectivity,
};
use crate::merge::{ConversionNode, MergeTiming};
use crate::projection::Projection;
use crate::push::PushNode;
use crate::store::Store;

/// Injected collaborators.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<Store>,
    pub gateway: Arc<dyn RemoteGateway>,
    pub clock: Arc<dyn Clock>,
    pub prompter: Arc<dyn PermissionPrompter>,
    pub registrar: Arc<dyn PushRegistrar>,
    /// Persisted attribution device id.
    pub device_id: String,
}

pub struct Engine {
    projection: Projection,
    bus: EventBus<Projection>,
    inbox: Inbox,
    publisher: Publisher,
    snapshots: watch::Sender<Projection>,
    services: Services,
    timing: TimingConfig,
    timeout: TimeoutGuard,
}

impl Engine {
    /// Seed the projection from the store and register the handlers.
    #[must_use]
    pub fn new(services: Services, timing: TimingConfig) -> Self {
        let (publisher, inbox) = bus::channel();
        let mut projection = Projection::with_cooldown(timing.permission_cooldown());
        projection.seed(&services.store.load());
        let (snapshots, _) = watch::channel(projection.clone());
        let timeout = TimeoutGuard::new();

        let mut bus = EventBus::new();
        bus.subscribe(Box::new(LaunchHandler::new(
            timeout.clone(),
            publisher.clone(),
            Arc::clone(&services.clock),
            timing.launch_timeout(),
        )));
        bus.subscribe(Box::new(ValidationHandler::new(
            Arc::clone(&services.gateway),
            publisher.clone(),
        )));
        bus.subscribe(Box::new(FlowHandler::new(
            FlowDeps {
                gateway: Arc::clone(&services.gateway),
                store: Arc::clone(&services.store),
                clock: Arc::clone(&services.clock),
                timeout: timeout.clone(),
                retry: RetryPolicy::new(timing.retry_delays()),
                cushion: timing.attribution_cushion(),
                device_id: services.device_id.clone(),
                snapshots: snapshots.subscribe(),
            },
            publisher.clone(),
        )));
        bus.subscribe(Box::new(PermissionHandler::new(
            Arc::clone(&services.store),
            Arc::clone(&services.clock),
            Arc::clone(&services.registrar),
        )));
        bus.subscribe(Box::new(PersistenceHandler::new(Arc::clone(
            &services.store,
        ))));

        debug!(
            saved_url = ?projection.config().saved_url,
            new_install = projection.config().is_new_install,
            "engine seeded"
        );

        Self {
            projection,
            bus,
            inbox,
            publisher,
            snapshots,
            services,
            timing,
            timeout,
        }
    }

    /// Handle for publishing into this engine.
    #[must_use]
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// UI snapshot stream; updated after every event.
    #[must_use]
    pub fn snapshots(&self) -> watch::Receiver<Projection> {
        self.snapshots.subscribe()
    }

    #[must_use]
    pub const fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Shared launch-timeout handle.
    #[must_use]
    pub fn timeout(&self) -> TimeoutGuard {
        self.timeout.clone()
    }

    /// Add a subscriber after the built-in handlers.
    pub fn subscribe(&mut self, subscriber: Box<dyn Subscriber<Projection>>) -> SubscriptionId {
        self.bus.subscribe(subscriber)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Permission entry point for the UI.
    #[must_use]
    pub fn permission_requester(&self) -> PermissionRequester {
        PermissionRequester::new(Arc::clone(&self.services.prompter), self.publisher())
    }

    /// Merge node wired to this engine's store, clock and inbox.
    #[must_use]
    pub fn conversion_node(&self) -> ConversionNode {
        ConversionNode::new(
            Arc::clone(&self.services.store),
            self.publisher(),
            Arc::clone(&self.services.clock),
            MergeTiming {
                window: self.timing.merge_window(),
                relay_delay: self.timing.relay_delay(),
            },
        )
    }

    /// Push ingest wired to this engine's store and clock.
    #[must_use]
    pub fn push_node(&self) -> PushNode {
        PushNode::new(
            Arc::clone(&self.services.store),
            Arc::clone(&self.services.clock),
            self.timing.relay_delay(),
        )
    }

    /// Start publishing connectivity transitions from `rx`.
    pub fn watch_connectivity(&self, rx: watch::Receiver<Connectivity>) -> JoinHandle<()> {
        watch_connectivity(rx, self.publisher())
    }

    /// Publish `AppLaunched`.
    pub fn launch(&self) {
        info!("launch");
        self.publisher.publish(Event::AppLaunched);
    }

    /// Fold one event, deliver it, and publish the new snapshot.
    pub fn dispatch(&mut self, event: &Event) {
        self.projection.apply(event, self.services.clock.now());
        self.bus.deliver(event, &self.projection);
        self.snapshots.send_replace(self.projection.clone());
    }

    /// Dispatch everything already queued without waiting.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Some(event) = self.inbox.try_recv() {
            self.dispatch(&event);
            count += 1;
        }
        count
    }

    /// Run until `done` holds for the projection (checked after every
    /// event). Returns `false` if the inbox closed first.
    pub async fn run_until<F>(&mut self, mut done: F) -> bool
    where
        F: FnMut(&Projection) -> bool,
    {
        if done(&self.projection) {
            return true;
        }
        while let Some(event) = self.inbox.recv().await {
            self.dispatch(&event);
            if done(&self.projection) {
                return true;
            }
        }
        false
    }

    /// Like [`Self::run_until`] but gives up after `limit` of clock time.
    pub async fn run_until_or<F>(&mut self, limit: Duration, done: F) -> bool
    where
        F: FnMut(&Projection) -> bool,
    {
        tokio::time::timeout(limit, self.run_until(done))
            .await
            .unwrap_or(false)
    }

    /// Run until a navigation decision exists.
    pub async fn run_to_decision(&mut self) -> bool {
        self.run_until(|projection| projection.decision().is_some())
            .await
    }

    /// Run forever.
    pub async fn run(&mut self) {
        while let Some(event) = self.inbox.recv().await {
            self.dispatch(&event);
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("stage", self.projection.stage())
            .field("locked", &self.projection.locked())
            .field("subscribers", &self.bus.len())
            .field("delivered", &self.bus.delivered())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::event::{EventKind, Payload};
    use crate::gateway::GatewayError;
    use crate::handlers::NoopRegistrar;
    use crate::projection::{Decision, Stage};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Fixed;

    #[async_trait]
    impl RemoteGateway for Fixed {
        async fn check_liveness(&self) -> Result<bool, GatewayError> {
            Ok(true)
        }

        async fn pull_attribution(&self, _: &str) -> Result<Payload, GatewayError> {
            let mut payload = Payload::new();
            payload.insert("af_status".into(), "Non-organic".into());
            Ok(payload)
        }

        async fn fetch_destination(&self, _: &Payload) -> Result<String, GatewayError> {
            Ok("https://dest.example".into())
        }
    }

    struct Never;

    #[async_trait]
    impl PermissionPrompter for Never {
        async fn request_authorization(&self) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    fn engine(store: Arc<Store>) -> Engine {
        Engine::new(
            Services {
                store,
                gateway: Arc::new(Fixed),
                clock: Arc::new(SystemClock),
                prompter: Arc::new(Never),
                registrar: Arc::new(NoopRegistrar),
                device_id: "dev-1".into(),
            },
            TimingConfig::default(),
        )
    }

    fn recorder(engine: &mut Engine) -> Arc<Mutex<Vec<EventKind>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        engine.subscribe(Box::new(move |event: &Event, _: &Projection| {
            sink.lock().push(event.kind());
        }));
        log
    }

    #[tokio::test(start_paused = true)]
    async fn paid_launch_resolves_and_persists() {
        let store = Arc::new(Store::in_memory());
        let mut engine = engine(Arc::clone(&store));
        let log = recorder(&mut engine);
        let mut snapshots = engine.snapshots();

        engine.launch();
        let mut attribution = Payload::new();
        attribution.insert("af_status".into(), "Non-organic".into());
        engine
            .publisher()
            .publish(Event::AttributionReceived(attribution));

        assert!(engine.run_to_decision().await);
        assert_eq!(
            engine.projection().stage(),
            &Stage::Ready("https://dest.example".into())
        );
        assert_eq!(
            engine.projection().decision(),
            Some(Decision::PermissionPrompt("https://dest.example".into()))
        );
        assert!(!engine.timeout().is_armed());
        assert_eq!(
            *log.lock(),
            vec![
                EventKind::AppLaunched,
                EventKind::AttributionReceived,
                EventKind::ValidationTriggered,
                EventKind::ValidationSucceeded,
                EventKind::DestinationFetchTriggered,
                EventKind::DestinationFetchSucceeded,
            ]
        );
        assert!(snapshots.has_changed().expect("sender alive"));
        assert!(snapshots.borrow_and_update().locked());
        assert_eq!(store.load().url.as_deref(), Some("https://dest.example"));
    }

    #[tokio::test(start_paused = true)]
    async fn deeplink_during_cushion_fills_refreshed_attribution() {
        let store = Arc::new(Store::in_memory());
        let mut engine = engine(Arc::clone(&store));
        let log = recorder(&mut engine);

        engine.launch();
        let mut organic = Payload::new();
        organic.insert("af_status".into(), "Organic".into());
        engine.publisher().publish(Event::AttributionReceived(organic));
        engine
            .run_until_or(Duration::from_secs(1), |_| false)
            .await;
        assert!(log.lock().contains(&EventKind::AttributionFetchTriggered));
        assert!(!log.lock().contains(&EventKind::AttributionFetchSucceeded));

        let mut deeplink = Payload::new();
        deeplink.insert("sub1".into(), "winter".into());
        engine.publisher().publish(Event::DeeplinkReceived(deeplink));

        assert!(engine.run_to_decision().await);
        let attribution = engine.projection().attribution();
        assert_eq!(attribution.get("af_status").map(String::as_str), Some("Non-organic"));
        assert_eq!(attribution.get("sub1").map(String::as_str), Some("winter"));
    }

    #[tokio::test(start_paused = true)]
    async fn launch_without_attribution_times_out_home() {
        let mut engine = engine(Arc::new(Store::in_memory()));
        engine.launch();

        assert!(engine.run_to_decision().await);
        assert_eq!(engine.projection().stage(), &Stage::Suspended);
        assert_eq!(engine.projection().decision(), Some(Decision::Home));
    }

    #[tokio::test(start_paused = true)]
    async fn denied_prompt_goes_to_destination() {
        let mut engine = engine(Arc::new(Store::in_memory()));
        engine.publisher().publish(Event::DestinationFetchSucceeded {
            url: "https://dest.example".into(),
        });
        engine.drain();

        engine
            .permission_requester()
            .request_permission()
            .await
            .expect("prompt");
        engine.drain();

        assert!(engine.projection().permission().blocked);
        assert_eq!(
            engine.projection().decision(),
            Some(Decision::Destination("https://dest.example".into()))
        );
    }
}
