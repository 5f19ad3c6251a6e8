//! Drive one [`LaunchScenario`] through a real [`Engine`] on tokio's paused
//! clock.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use icetrip_core::config::TimingConfig;
use icetrip_core::handlers::{Connectivity, PermissionRequester};
use icetrip_core::projection::ACTIVE_MODE;
use icetrip_core::{Engine, Event, Projection, Services, Store, Subscriber, SystemClock};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::fakes::{
    CountingRegistrar, PermissionAnswer, ScriptedGateway, ScriptedPrompter, paid_attribution,
};
use crate::oracle::{LaunchRun, TraceEntry};
use crate::scenario::{Conversion, LaunchScenario, SIM_OVERRIDE, SIM_SAVED, sim_deeplink};

/// Appends every delivered event with the snapshot it produced.
struct TraceRecorder {
    started: Instant,
    trace: Arc<Mutex<Vec<TraceEntry>>>,
}

impl Subscriber<Projection> for TraceRecorder {
    fn on_event(&mut self, event: &Event, projection: &Projection) {
        let at_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let url = match event {
            Event::DestinationFetchSucceeded { url } => Some(url.clone()),
            _ => None,
        };
        self.trace.lock().push(TraceEntry {
            at_ms,
            kind: event.kind(),
            url,
            stage: projection.stage().clone(),
            locked: projection.locked(),
            destination: projection.destination().map(str::to_string),
        });
    }
}

/// Plays the UI: answers the permission sheet the first time it opens.
struct SheetResponder {
    requester: PermissionRequester,
    answer: PermissionAnswer,
    answered: bool,
}

impl Subscriber<Projection> for SheetResponder {
    fn on_event(&mut self, _: &Event, projection: &Projection) {
        if self.answered || !projection.intents().show_permission_sheet {
            return;
        }
        self.answered = true;
        debug!(answer = ?self.answer, "answering permission sheet");
        if self.answer == PermissionAnswer::Defer {
            self.requester.defer();
        } else {
            drop(self.requester.request_permission());
        }
    }
}

/// Simulated time to keep dispatching after launch. Long enough for the
/// launch timeout, the attribution cushion and a full retry ladder.
#[must_use]
pub fn horizon(timing: &TimingConfig, scenario: &LaunchScenario) -> Duration {
    let retries: u64 = timing.retry_delays_ms.iter().sum();
    let calls = 2 + 2 * u64::try_from(timing.retry_delays_ms.len()).unwrap_or(u64::MAX);
    Duration::from_millis(
        timing.launch_timeout_ms
            + timing.merge_window_ms
            + timing.relay_delay_ms
            + timing.attribution_cushion_ms
            + scenario.conversion_delay_ms
            + retries * 2
            + calls * scenario.latency_ms
            + 60_000,
    )
}

fn seed_store(store: &Store, scenario: &LaunchScenario) -> Result<()> {
    if scenario.returning {
        store.save_attribution(&paid_attribution())?;
        store.save_url(SIM_SAVED)?;
        store.save_mode(ACTIVE_MODE)?;
        store.mark_installed()?;
    }
    if scenario.recently_asked {
        let asked = Utc::now() - TimeDelta::days(1);
        store.save_permission(false, false, asked)?;
    }
    if scenario.override_url {
        store.save_override_url(SIM_OVERRIDE)?;
    }
    Ok(())
}

/// Run `scenario` to the horizon and collect what it left behind.
///
/// Must be called on a runtime with paused time, or it takes as long as the
/// horizon in wall-clock time.
///
/// # Errors
///
/// Returns an error if the in-memory store cannot be seeded.
pub async fn simulate(scenario: &LaunchScenario, timing: &TimingConfig) -> Result<LaunchRun> {
    let store = Arc::new(Store::in_memory());
    seed_store(&store, scenario).context("seed store")?;

    let gateway = Arc::new(
        ScriptedGateway::new(Duration::from_millis(scenario.latency_ms))
            .with_liveness(scenario.liveness.clone())
            .with_attribution(scenario.attribution.clone())
            .with_destination(scenario.destination.clone()),
    );
    let registrar = Arc::new(CountingRegistrar::default());

    let mut engine = Engine::new(
        Services {
            store: Arc::clone(&store),
            gateway: Arc::clone(&gateway) as _,
            clock: Arc::new(SystemClock),
            prompter: Arc::new(ScriptedPrompter(scenario.permission)),
            registrar: Arc::clone(&registrar) as _,
            device_id: format!("sim-device-{}", scenario.seed),
        },
        timing.clone(),
    );

    let trace = Arc::new(Mutex::new(Vec::new()));
    engine.subscribe(Box::new(TraceRecorder {
        started: Instant::now(),
        trace: Arc::clone(&trace),
    }));
    let requester = engine.permission_requester();
    engine.subscribe(Box::new(SheetResponder {
        requester,
        answer: scenario.permission,
        answered: false,
    }));

    if let Some(outage) = scenario.outage {
        let (tx, rx) = watch::channel(Connectivity::Online);
        drop(engine.watch_connectivity(rx));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(outage.start_ms)).await;
            let _ = tx.send(Connectivity::Offline);
            tokio::time::sleep(Duration::from_millis(outage.length_ms)).await;
            let _ = tx.send(Connectivity::Online);
        });
    }

    engine.launch();

    let node = engine.conversion_node();
    let conversion = scenario.conversion;
    let deeplink = scenario.deeplink;
    let delay = Duration::from_millis(scenario.conversion_delay_ms);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if deeplink {
            node.receive_deeplink(sim_deeplink());
        }
        match conversion {
            Conversion::Error => node.receive_conversion_error("attribution sdk timed out"),
            Conversion::Missing => {}
            other => {
                if let Some(payload) = other.payload() {
                    node.receive_conversion(payload);
                }
            }
        }
    });

    engine
        .run_until_or(horizon(timing, scenario), |_| false)
        .await;

    let trace = std::mem::take(&mut *trace.lock());
    Ok(LaunchRun {
        trace,
        projection: engine.projection().clone(),
        persisted: store.load(),
        calls: gateway.calls(),
        attempt_budget: timing.retry_delays_ms.len(),
        registrations: registrar.count(),
    })
}
