#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use icetrip_core::LaunchConfig;
use icetrip_core::config::load_launch_config;
use output::{CliError, OutputMode};
use std::env;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "itp: IceTrip launch orchestration driver",
    long_about = None
)]
struct Cli {
    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default: <config_dir>/icetrip/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Store directory; overrides [store].data_dir.
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run one launch against live endpoints",
        after_help = "EXAMPLES:\n    # Launch with a conversion payload from the attribution SDK\n    itp run --conversion conversion.json\n\n    # Paid install with a deep link, auto-granting the permission prompt\n    itp run --conversion conv.json --deeplink link.json --permission grant"
    )]
    Run(cmd::run::RunArgs),

    #[command(
        about = "Show persisted launch state",
        after_help = "EXAMPLES:\n    itp state\n    itp state --json"
    )]
    State,

    #[command(
        about = "Delete every persisted key",
        after_help = "EXAMPLES:\n    itp reset --yes"
    )]
    Reset(cmd::reset::ResetArgs),

    #[command(
        name = "push-url",
        about = "Extract the destination URL from a push payload",
        after_help = "EXAMPLES:\n    # Print the URL only\n    itp push-url payload.json\n\n    # Read from stdin and store it as the next launch's override\n    cat payload.json | itp push-url - --store"
    )]
    PushUrl(cmd::push::PushArgs),

    #[command(about = "Inspect configuration")]
    Config(cmd::config::ConfigArgs),
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let output = output::resolve_output_mode(cli.json);

    if let Err(err) = run(cli, output) {
        CliError::from_anyhow(&err).render(output);
        std::process::exit(1);
    }
}

fn run(cli: Cli, output: OutputMode) -> anyhow::Result<()> {
    let mut config: LaunchConfig = load_launch_config(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.store.data_dir = Some(dir);
    }
    debug!(data_dir = %config.store.resolved_data_dir().display(), "config resolved");

    match cli.command {
        Commands::Run(args) => cmd::run::run_launch(&args, &config, output),
        Commands::State => cmd::state::run_state(&config, output),
        Commands::Reset(args) => cmd::reset::run_reset(&args, &config, output),
        Commands::PushUrl(args) => cmd::push::run_push_url(&args, &config, output),
        Commands::Config(args) => cmd::config::run_config(&args, &config, output),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ICETRIP_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "icetrip=debug,info"
        } else {
            "icetrip=info,warn"
        })
    });

    let format = env::var("ICETRIP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}
