use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, ValueEnum};
use icetrip_core::gateway::HttpGateway;
use icetrip_core::handlers::{NoopRegistrar, PermissionPrompter, TcpProbe};
use icetrip_core::{Decision, Engine, LaunchConfig, Services, Stage, SystemClock};
use serde::Serialize;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Conversion payload (JSON object) as delivered by the attribution SDK.
    #[arg(long, value_name = "FILE")]
    conversion: Option<PathBuf>,

    /// Report a conversion failure with this description instead.
    #[arg(long, value_name = "TEXT", conflicts_with = "conversion")]
    conversion_error: Option<String>,

    /// Deep-link payload (JSON object).
    #[arg(long, value_name = "FILE")]
    deeplink: Option<PathBuf>,

    /// How to answer the permission prompt if one is shown.
    #[arg(long, value_enum, default_value = "ask")]
    permission: PermissionAnswer,

    /// Probe `host:port` for connectivity during the run.
    #[arg(long, value_name = "ADDR")]
    probe: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PermissionAnswer {
    /// Ask on the terminal.
    Ask,
    Grant,
    Deny,
    /// Dismiss without answering.
    Defer,
}

struct TerminalPrompter;

#[async_trait]
impl PermissionPrompter for TerminalPrompter {
    async fn request_authorization(&self) -> anyhow::Result<bool> {
        tokio::task::spawn_blocking(|| {
            eprint!("Allow notifications? [y/N] ");
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("read answer")?;
            Ok(matches!(line.trim(), "y" | "Y" | "yes"))
        })
        .await
        .context("prompt task")?
    }
}

struct FixedPrompter(bool);

#[async_trait]
impl PermissionPrompter for FixedPrompter {
    async fn request_authorization(&self) -> anyhow::Result<bool> {
        Ok(self.0)
    }
}

#[derive(Debug, Serialize)]
struct RunReport {
    decision: Option<Decision>,
    stage: Stage,
    locked: bool,
    destination: Option<String>,
}

pub fn run_launch(args: &RunArgs, config: &LaunchConfig, output: OutputMode) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    let report = runtime.block_on(launch(args, config))?;

    render_mode(
        output,
        &report,
        |r, w| {
            let decision = match &r.decision {
                Some(Decision::Destination(url)) => format!("destination {url}"),
                Some(Decision::PermissionPrompt(url)) => format!("prompt {url}"),
                Some(Decision::Home) => "home".to_string(),
                None => "none".to_string(),
            };
            writeln!(w, "{decision}")
        },
        |r, w| {
            pretty_section(w, "Launch result")?;
            pretty_kv(w, "Decision", format!("{:?}", r.decision))?;
            pretty_kv(w, "Stage", format!("{:?}", r.stage))?;
            pretty_kv(w, "Locked", r.locked.to_string())?;
            pretty_kv(w, "Destination", r.destination.as_deref().unwrap_or("-"))
        },
    )
}

async fn launch(args: &RunArgs, config: &LaunchConfig) -> Result<RunReport> {
    let store = Arc::new(super::open_store(config)?);
    let device_id = store
        .device_id_or_create()
        .context("create attribution device id")?;
    let gateway = HttpGateway::new(config, device_id.clone(), Arc::clone(&store))
        .context("build HTTP gateway")?;

    let prompter: Arc<dyn PermissionPrompter> = match args.permission {
        PermissionAnswer::Ask => Arc::new(TerminalPrompter),
        PermissionAnswer::Grant => Arc::new(FixedPrompter(true)),
        PermissionAnswer::Deny | PermissionAnswer::Defer => Arc::new(FixedPrompter(false)),
    };

    let mut engine = Engine::new(
        Services {
            store,
            gateway: Arc::new(gateway),
            clock: Arc::new(SystemClock),
            prompter,
            registrar: Arc::new(NoopRegistrar),
            device_id,
        },
        config.timing.clone(),
    );

    let _probe = match &args.probe {
        Some(address) => {
            let (rx, task) = TcpProbe::new(address.clone()).spawn().await;
            Some((engine.watch_connectivity(rx), task))
        }
        None => None,
    };

    engine.launch();
    let node = engine.conversion_node();
    if let Some(path) = &args.deeplink {
        node.receive_deeplink_json(&super::read_json_object(path)?);
    }
    if let Some(path) = &args.conversion {
        node.receive_conversion_json(&super::read_json_object(path)?);
    } else if let Some(description) = &args.conversion_error {
        node.receive_conversion_error(description);
    }

    // Launch timeout bounds the wait; the extra margin covers the final
    // retry sleep racing it.
    let limit = config.timing.launch_timeout() + Duration::from_secs(90);
    engine.run_until_or(limit, |p| p.decision().is_some()).await;

    if let Some(Decision::PermissionPrompt(url)) = engine.projection().decision() {
        info!(url = %url, "permission prompt pending");
        let requester = engine.permission_requester();
        if args.permission == PermissionAnswer::Defer {
            requester.defer();
        } else {
            let _ = requester.request_permission();
        }
        engine
            .run_until_or(Duration::from_secs(300), |p| {
                matches!(p.decision(), Some(Decision::Destination(_)))
            })
            .await;
    }

    let projection = engine.projection();
    Ok(RunReport {
        decision: projection.decision(),
        stage: projection.stage().clone(),
        locked: projection.locked(),
        destination: projection.destination().map(str::to_string),
    })
}
