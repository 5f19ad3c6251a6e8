//! End-to-end launches through the real engine with scripted endpoints.

use icetrip_core::config::TimingConfig;
use icetrip_core::{Decision, EventKind, GatewayError, Stage};
use icetrip_sim::fakes::{PermissionAnswer, SIM_DESTINATION};
use icetrip_sim::scenario::{Conversion, SIM_OVERRIDE};
use icetrip_sim::{CampaignConfig, LaunchOracle, LaunchRun, LaunchScenario, replay_seed, simulate};
use proptest::prelude::*;

async fn launch(scenario: LaunchScenario) -> LaunchRun {
    let run = simulate(&scenario, &TimingConfig::default())
        .await
        .expect("simulate");
    let oracle = LaunchOracle::check_all(&run);
    assert!(oracle.passed, "{:?}", oracle.violations);
    run
}

fn kinds(run: &LaunchRun) -> Vec<EventKind> {
    run.trace.iter().map(|entry| entry.kind).collect()
}

#[tokio::test(start_paused = true)]
async fn organic_fresh_install_refreshes_attribution_then_resolves() {
    let run = launch(LaunchScenario {
        conversion: Conversion::Organic,
        ..LaunchScenario::baseline(1)
    })
    .await;

    assert_eq!(
        kinds(&run)[..8],
        [
            EventKind::AppLaunched,
            EventKind::AttributionReceived,
            EventKind::ValidationTriggered,
            EventKind::ValidationSucceeded,
            EventKind::AttributionFetchTriggered,
            EventKind::AttributionFetchSucceeded,
            EventKind::DestinationFetchTriggered,
            EventKind::DestinationFetchSucceeded,
        ]
    );
    assert!(run.projection.locked());
    assert_eq!(
        run.projection.stage(),
        &Stage::Ready(SIM_DESTINATION.to_string())
    );
    assert_eq!(
        run.projection.decision(),
        Some(Decision::Destination(SIM_DESTINATION.to_string()))
    );
    assert_eq!(run.calls.attribution, 1);
    assert_eq!(run.registrations, 1);
    assert_eq!(run.persisted.url.as_deref(), Some(SIM_DESTINATION));
    assert!(!run.persisted.is_new_install);
    assert_eq!(
        run.persisted.attribution.get("af_status").map(String::as_str),
        Some("Non-organic")
    );
}

#[tokio::test(start_paused = true)]
async fn paid_second_launch_skips_attribution_fetch() {
    let run = launch(LaunchScenario {
        returning: true,
        permission: PermissionAnswer::Deny,
        ..LaunchScenario::baseline(2)
    })
    .await;

    let kinds = kinds(&run);
    assert_eq!(
        kinds[..6],
        [
            EventKind::AppLaunched,
            EventKind::AttributionReceived,
            EventKind::ValidationTriggered,
            EventKind::ValidationSucceeded,
            EventKind::DestinationFetchTriggered,
            EventKind::DestinationFetchSucceeded,
        ]
    );
    assert!(!kinds.contains(&EventKind::AttributionFetchTriggered));
    assert_eq!(run.calls.attribution, 0);
    assert_eq!(run.registrations, 0);
    assert!(run.persisted.perm_blocked);
    assert_eq!(
        run.projection.decision(),
        Some(Decision::Destination(SIM_DESTINATION.to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn failed_liveness_goes_home_without_resolving() {
    let run = launch(LaunchScenario {
        liveness: vec![Ok(false)],
        ..LaunchScenario::baseline(3)
    })
    .await;

    assert!(kinds(&run).contains(&EventKind::ValidationFailed));
    assert!(!run.projection.locked());
    assert_eq!(run.projection.decision(), Some(Decision::Home));
    assert_eq!(run.calls.destination, 0);
    assert_eq!(run.persisted.url, None);
}

#[tokio::test(start_paused = true)]
async fn push_override_wins_without_remote_resolution() {
    let run = launch(LaunchScenario {
        returning: true,
        override_url: true,
        ..LaunchScenario::baseline(4)
    })
    .await;

    assert_eq!(run.projection.destination(), Some(SIM_OVERRIDE));
    assert_eq!(run.calls.destination, 0);
    assert_eq!(run.persisted.url.as_deref(), Some(SIM_OVERRIDE));
}

#[tokio::test(start_paused = true)]
async fn missing_conversion_times_out_home() {
    let run = launch(LaunchScenario {
        conversion: Conversion::Missing,
        ..LaunchScenario::baseline(5)
    })
    .await;

    let timed_out = run
        .trace
        .iter()
        .find(|entry| entry.kind == EventKind::AppTimedOut)
        .expect("timeout fired");
    assert!((30_000..30_010).contains(&timed_out.at_ms));
    assert_eq!(run.projection.stage(), &Stage::Suspended);
    assert_eq!(run.projection.decision(), Some(Decision::Home));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fall_back_to_saved_url() {
    let timing = TimingConfig {
        launch_timeout_ms: 120_000,
        ..TimingConfig::default()
    };
    let scenario = LaunchScenario {
        returning: true,
        destination: vec![
            Err(GatewayError::Status { status: 502 }),
            Err(GatewayError::RateLimited),
            Err(GatewayError::Status { status: 502 }),
        ],
        ..LaunchScenario::baseline(6)
    };
    let run = simulate(&scenario, &timing).await.expect("simulate");
    assert!(LaunchOracle::check_all(&run).passed);

    assert!(kinds(&run).contains(&EventKind::DestinationFetchFailed));
    assert_eq!(run.calls.destination, 3);
    assert_eq!(
        run.projection.stage(),
        &Stage::Ready(icetrip_sim::scenario::SIM_SAVED.to_string())
    );
}

#[test]
fn replay_is_deterministic() {
    let config = CampaignConfig::default();
    let first = replay_seed(17, &config).expect("replay");
    let second = replay_seed(17, &config).expect("replay");
    assert_eq!(first.scenario, second.scenario);
    assert_eq!(first.run.trace, second.run.trace);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn any_seed_holds_invariants(seed in any::<u64>()) {
        let outcome = replay_seed(seed, &CampaignConfig::default()).expect("replay");
        prop_assert!(outcome.oracle.passed, "{:?}", outcome.oracle.violations);
    }
}
