//! icetrip-sim library.
//!
//! Deterministic fault-injection harness for the launch funnel. Each seed
//! expands into a [`scenario::LaunchScenario`], runs through a real
//! [`icetrip_core::Engine`] on tokio's paused clock with scripted endpoints,
//! and the resulting trace is checked by [`oracle::LaunchOracle`].
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod campaign;
pub mod driver;
pub mod fakes;
pub mod oracle;
pub mod rng;
pub mod scenario;

pub use campaign::{CampaignConfig, CampaignReport, SeedRun, replay_seed, run_campaign};
pub use driver::simulate;
pub use oracle::{InvariantViolation, LaunchOracle, LaunchRun, OracleResult, TraceEntry};
pub use scenario::LaunchScenario;
