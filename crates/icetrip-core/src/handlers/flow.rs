//! Post-validation routing: saved URL, push override, attribution refresh,
//! or destination resolution.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::launch::TimeoutGuard;
use crate::bus::{Publisher, Subscriber};
use crate::clock::Clock;
use crate::event::{Event, Payload};
use crate::gateway::{RemoteGateway, RetryPolicy, resolve_destination};
use crate::projection::Projection;
use crate::store::Store;

/// Attribution status value that marks an organic install.
pub const ORGANIC: &str = "Organic";

/// What to do after a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowPlan {
    /// No attribution, but a URL from an earlier run.
    SavedUrl(String),
    /// No attribution and nothing saved.
    Home,
    /// A push notification supplied the destination.
    Override(String),
    /// Fresh organic install: refresh attribution first.
    RefreshAttribution,
    /// Resolve the destination with the current attribution.
    ResolveDestination,
}

/// Choose the flow path for `projection`. `override_url` is the pending push
/// override, if any.
#[must_use]
pub fn plan(projection: &Projection, override_url: Option<&str>) -> FlowPlan {
    if projection.attribution().is_empty() {
        return projection
            .config()
            .saved_url
            .clone()
            .map_or(FlowPlan::Home, FlowPlan::SavedUrl);
    }
    if let Some(url) = override_url {
        return FlowPlan::Override(url.to_string());
    }
    let organic = projection
        .attribution()
        .get("af_status")
        .is_some_and(|status| status == ORGANIC);
    if projection.config().is_new_install && organic {
        return FlowPlan::RefreshAttribution;
    }
    FlowPlan::ResolveDestination
}

/// Add deep-link keys the fetched attribution lacks. Fetched values win.
#[must_use]
pub fn fill_from_deeplink(mut fetched: Payload, deeplink: &Payload) -> Payload {
    for (key, value) in deeplink {
        fetched
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    fetched
}

/// Collaborators and tunables for [`FlowHandler`].
#[derive(Clone)]
pub struct FlowDeps {
    pub gateway: Arc<dyn RemoteGateway>,
    pub store: Arc<Store>,
    pub clock: Arc<dyn Clock>,
    pub timeout: TimeoutGuard,
    pub retry: RetryPolicy,
    pub cushion: Duration,
    pub device_id: String,
    /// Latest projection; read after the cushion so late deep links count.
    pub snapshots: watch::Receiver<Projection>,
}

pub struct FlowHandler {
    deps: FlowDeps,
    publisher: Publisher,
}

impl FlowHandler {
    #[must_use]
    pub const fn new(deps: FlowDeps, publisher: Publisher) -> Self {
        Self { deps, publisher }
    }

    fn settle(&self, url: String) {
        self.deps.timeout.cancel();
        self.publisher
            .publish(Event::DestinationFetchSucceeded { url });
    }

    fn run(&self, projection: &Projection) {
        let pending_override = self.deps.store.override_url();
        let chosen = plan(projection, pending_override.as_deref());
        debug!(plan = ?chosen, "flow planned");
        match chosen {
            FlowPlan::SavedUrl(url) => self.settle(url),
            FlowPlan::Home => self.publisher.publish(Event::NavigateToHome),
            FlowPlan::Override(url) => {
                if let Err(err) = self.deps.store.take_override_url() {
                    warn!(error = %err, "failed to clear push override URL");
                }
                info!(url = %url, "using push override URL");
                self.settle(url);
            }
            FlowPlan::RefreshAttribution => self.refresh_attribution(),
            FlowPlan::ResolveDestination => self.resolve(projection.attribution().clone()),
        }
    }

    fn refresh_attribution(&self) {
        self.publisher.publish(Event::AttributionFetchTriggered);
        let deps = self.deps.clone();
        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            deps.clock.sleep(deps.cushion).await;
            match deps.gateway.pull_attribution(&deps.device_id).await {
                Ok(fetched) => {
                    let deeplink = deps.snapshots.borrow().deeplink().clone();
                    let payload = fill_from_deeplink(fetched, &deeplink);
                    publisher.publish(Event::AttributionFetchSucceeded(payload));
                }
                Err(err) => {
                    warn!(error = %err, "attribution pull failed");
                    publisher.publish(Event::AttributionFetchFailed);
                }
            }
        });
    }

    fn resolve(&self, attribution: Payload) {
        self.publisher.publish(Event::DestinationFetchTriggered);
        let deps = self.deps.clone();
        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            let outcome = resolve_destination(
                deps.gateway.as_ref(),
                deps.clock.as_ref(),
                &deps.retry,
                &attribution,
            )
            .await;
            match outcome {
                Ok(url) => {
                    deps.timeout.cancel();
                    publisher.publish(Event::DestinationFetchSucceeded { url });
                }
                Err(err) => {
                    warn!(error = %err, code = err.code().code(), "destination resolution failed");
                    publisher.publish(Event::DestinationFetchFailed);
                }
            }
        });
    }
}

impl Subscriber<Projection> for FlowHandler {
    fn on_event(&mut self, event: &Event, projection: &Projection) {
        if projection.locked() {
            return;
        }
        match event {
            Event::ValidationSucceeded => self.run(projection),
            Event::AttributionFetchSucceeded(_) => self.resolve(projection.attribution().clone()),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PersistedData;

    fn payload(pairs: &[(&str, &str)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn projection(data: PersistedData) -> Projection {
        let mut projection = Projection::new();
        projection.seed(&data);
        projection
    }

    #[test]
    fn empty_attribution_uses_saved_url_or_home() {
        let saved = projection(PersistedData {
            url: Some("https://saved".into()),
            ..PersistedData::default()
        });
        assert_eq!(plan(&saved, None), FlowPlan::SavedUrl("https://saved".into()));
        assert_eq!(
            plan(&saved, Some("https://push")),
            FlowPlan::SavedUrl("https://saved".into())
        );
        assert_eq!(plan(&projection(PersistedData::default()), None), FlowPlan::Home);
    }

    #[test]
    fn override_beats_attribution_paths() {
        let organic = projection(PersistedData {
            attribution: payload(&[("af_status", ORGANIC)]),
            ..PersistedData::default()
        });
        assert_eq!(
            plan(&organic, Some("https://push")),
            FlowPlan::Override("https://push".into())
        );
    }

    #[test]
    fn only_fresh_organic_installs_refresh() {
        let fresh_organic = projection(PersistedData {
            attribution: payload(&[("af_status", ORGANIC)]),
            ..PersistedData::default()
        });
        assert_eq!(plan(&fresh_organic, None), FlowPlan::RefreshAttribution);

        let returning_organic = projection(PersistedData {
            attribution: payload(&[("af_status", ORGANIC)]),
            is_new_install: false,
            ..PersistedData::default()
        });
        assert_eq!(plan(&returning_organic, None), FlowPlan::ResolveDestination);

        let fresh_paid = projection(PersistedData {
            attribution: payload(&[("af_status", "Non-organic")]),
            ..PersistedData::default()
        });
        assert_eq!(plan(&fresh_paid, None), FlowPlan::ResolveDestination);
    }

    #[test]
    fn deeplink_loses_ties() {
        let filled = fill_from_deeplink(
            payload(&[("campaign", "fetched")]),
            &payload(&[("campaign", "linked"), ("sub1", "x")]),
        );
        assert_eq!(filled, payload(&[("campaign", "fetched"), ("sub1", "x")]));
    }
}
