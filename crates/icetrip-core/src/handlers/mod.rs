//! Orchestration handlers.
//!
//! Each handler subscribes to the bus, matches only the events it cares
//! about, and owns one slice of side effects. Async work is spawned and
//! re-enters orchestration only by publishing.

pub mod flow;
pub mod launch;
pub mod network;
pub mod permission;
pub mod persistence;
pub mod validation;

pub use flow::{FlowDeps, FlowHandler, FlowPlan};
pub use launch::{LaunchHandler, TimeoutGuard};
pub use network::{Connectivity, TcpProbe, watch_connectivity};
pub use permission::{
    NoopRegistrar, PermissionHandler, PermissionPrompter, PermissionRequester, PushRegistrar,
};
pub use persistence::PersistenceHandler;
pub use validation::ValidationHandler;
