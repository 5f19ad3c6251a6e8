use anyhow::{Context, Result};
use clap::Args;
use icetrip_core::LaunchConfig;
use icetrip_core::push::extract_url;
use serde::Serialize;
use std::path::PathBuf;

use crate::output::{OutputMode, render_mode};

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Push payload JSON file, or `-` for stdin.
    payload: PathBuf,

    /// Persist the URL as the next launch's override.
    #[arg(long)]
    store: bool,
}

#[derive(Debug, Serialize)]
struct PushReport {
    url: Option<String>,
    stored: bool,
}

pub fn run_push_url(args: &PushArgs, config: &LaunchConfig, output: OutputMode) -> Result<()> {
    let payload = super::read_json_object(&args.payload)?;
    let url = extract_url(&payload);

    let stored = match (&url, args.store) {
        (Some(url), true) => {
            let store = super::open_store(config)?;
            store
                .save_override_url(url)
                .context("store push override URL")?;
            true
        }
        _ => false,
    };

    let report = PushReport { url, stored };
    render_mode(
        output,
        &report,
        |r, w| writeln!(w, "{}", r.url.as_deref().unwrap_or("")),
        |r, w| match &r.url {
            Some(url) if r.stored => writeln!(w, "{url} (stored as override)"),
            Some(url) => writeln!(w, "{url}"),
            None => writeln!(w, "No URL in payload."),
        },
    )
}
