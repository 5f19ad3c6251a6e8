use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use icetrip_core::LaunchConfig;
use icetrip_core::config::default_config_path;

use crate::output::{OutputMode, render_mode};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Show the resolved configuration
    Show,
    /// Print the default config file path
    Path,
}

pub fn run_config(args: &ConfigArgs, config: &LaunchConfig, output: OutputMode) -> Result<()> {
    match args.command {
        ConfigCommand::Show => run_show(config, output),
        ConfigCommand::Path => run_path(output),
    }
}

fn run_show(config: &LaunchConfig, output: OutputMode) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("serialize config")?;
    render_mode(
        output,
        config,
        |_, w| write!(w, "{rendered}"),
        |_, w| write!(w, "{rendered}"),
    )
}

fn run_path(output: OutputMode) -> Result<()> {
    let path = default_config_path().map(|p| p.display().to_string());
    render_mode(
        output,
        &path,
        |p, w| writeln!(w, "{}", p.as_deref().unwrap_or("")),
        |p, w| writeln!(w, "{}", p.as_deref().unwrap_or("(no config dir on this platform)")),
    )
}
