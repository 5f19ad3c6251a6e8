//! Campaign runner: many seeds, one scenario each, every run checked by the
//! oracle. The first failing seed is reported for replay.

use std::ops::Range;

use anyhow::{Context, Result, bail};
use icetrip_core::config::TimingConfig;
use icetrip_core::Decision;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::driver::simulate;
use crate::oracle::{LaunchOracle, LaunchRun, OracleResult};
use crate::scenario::LaunchScenario;

/// Seed range and per-launch fault rates (percent, 0-100).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    pub returning_percent: u8,
    pub organic_percent: u8,
    pub deeplink_percent: u8,
    pub override_percent: u8,
    pub conversion_error_percent: u8,
    pub missing_conversion_percent: u8,
    pub liveness_fault_percent: u8,
    pub attribution_fault_percent: u8,
    /// Chance that each destination attempt fails.
    pub destination_fault_percent: u8,
    /// Share of destination failures that are 429s.
    pub rate_limit_percent: u8,
    pub outage_percent: u8,
    pub max_latency_ms: u64,
    pub timing: TimingConfig,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            seed_range: 0..200,
            returning_percent: 30,
            organic_percent: 40,
            deeplink_percent: 25,
            override_percent: 10,
            conversion_error_percent: 5,
            missing_conversion_percent: 5,
            liveness_fault_percent: 10,
            attribution_fault_percent: 15,
            destination_fault_percent: 35,
            rate_limit_percent: 40,
            outage_percent: 15,
            max_latency_ms: 4_000,
            timing: TimingConfig::default(),
        }
    }
}

impl CampaignConfig {
    /// No faults, no returning users; only the seed range varies.
    #[must_use]
    pub fn quiet(seed_range: Range<u64>) -> Self {
        Self {
            seed_range,
            returning_percent: 0,
            organic_percent: 0,
            deeplink_percent: 0,
            override_percent: 0,
            conversion_error_percent: 0,
            missing_conversion_percent: 0,
            liveness_fault_percent: 0,
            attribution_fault_percent: 0,
            destination_fault_percent: 0,
            rate_limit_percent: 0,
            outage_percent: 0,
            max_latency_ms: 0,
            timing: TimingConfig::default(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the seed range is empty or no retry attempts are
    /// configured.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.timing.retry_delays_ms.is_empty() {
            bail!("timing.retry_delays_ms must not be empty");
        }
        Ok(())
    }
}

/// Failure details for a single seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

/// Aggregate report produced by a campaign run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First seed that failed (for prioritized replay).
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Launches that ended on the web destination.
    pub reached_destination: usize,
    /// Launches that ended on the native home screen.
    pub reached_home: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One replayed seed with everything needed to debug it.
#[derive(Debug, Clone)]
pub struct SeedRun {
    pub scenario: LaunchScenario,
    pub run: LaunchRun,
    pub oracle: OracleResult,
}

/// Replay `seed` on a fresh paused runtime.
///
/// # Errors
///
/// Returns an error if the runtime cannot be built or the simulation cannot
/// seed its store.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<SeedRun> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .context("build simulation runtime")?;
    let scenario = LaunchScenario::generate(seed, config);
    debug!(seed, ?scenario, "replaying seed");
    let run = runtime.block_on(simulate(&scenario, &config.timing))?;
    let oracle = LaunchOracle::check_all(&run);
    Ok(SeedRun {
        scenario,
        run,
        oracle,
    })
}

/// Run every seed in the config.
///
/// # Errors
///
/// Returns an error if the config is invalid or a seed cannot be simulated.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport::default();
    for seed in config.seed_range.clone() {
        let SeedRun { run, oracle, .. } = replay_seed(seed, config)?;
        report.seeds_run += 1;

        match run.projection.decision() {
            Some(Decision::Destination(_)) => report.reached_destination += 1,
            Some(Decision::Home) => report.reached_home += 1,
            _ => {}
        }

        if oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: oracle.violations.iter().map(ToString::to_string).collect(),
            });
        }
    }
    Ok(report)
}
