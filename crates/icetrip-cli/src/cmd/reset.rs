use anyhow::{Context, Result, bail};
use clap::Args;
use icetrip_core::LaunchConfig;
use serde::Serialize;

use crate::output::{OutputMode, render_mode};

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Confirm deletion of every persisted key.
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Serialize)]
struct ResetReport {
    reset: bool,
    data_dir: String,
}

pub fn run_reset(args: &ResetArgs, config: &LaunchConfig, output: OutputMode) -> Result<()> {
    if !args.yes {
        bail!("refusing to reset without --yes");
    }
    let store = super::open_store(config)?;
    store.reset().context("reset store")?;

    let report = ResetReport {
        reset: true,
        data_dir: config.store.resolved_data_dir().display().to_string(),
    };
    render_mode(
        output,
        &report,
        |r, w| writeln!(w, "reset {}", r.data_dir),
        |r, w| writeln!(w, "All launch state under {} deleted.", r.data_dir),
    )
}
