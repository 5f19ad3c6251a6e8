#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use icetrip_sim::{CampaignConfig, run_campaign};

/// `itp-sim [SEEDS]`: run seeds `0..SEEDS` (default 200).
fn main() -> Result<()> {
    let mut config = CampaignConfig::default();
    if let Some(arg) = std::env::args().nth(1) {
        let seeds: u64 = arg.parse().with_context(|| format!("invalid seed count: {arg}"))?;
        config.seed_range = 0..seeds;
    }

    let report = run_campaign(&config)?;
    println!(
        "campaign complete: seeds={} passed={} destination={} home={}",
        report.seeds_run, report.seeds_passed, report.reached_destination, report.reached_home
    );

    if let Some(seed) = report.first_failure {
        for failure in &report.failures {
            for violation in &failure.violations {
                println!("  seed {}: {violation}", failure.seed);
            }
        }
        bail!("invariant violations; first failing seed {seed}");
    }
    Ok(())
}
