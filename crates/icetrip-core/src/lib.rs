//! icetrip-core library.
//!
//! Launch orchestration for the IceTrip Planner app: install attribution and
//! deep-link intake, remote liveness checks, destination resolution with
//! backoff, write-through persistence, and the projection the UI reads to
//! decide between the native home screen, the web destination, or a
//! notification-permission prompt.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums at each boundary (`StoreError`,
//!   `GatewayError`); `anyhow::Result` in loaders and binaries.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).
//! - **Threading**: the [`engine::Engine`] loop is the only place the
//!   projection is mutated. Everything asynchronous re-enters it by
//!   publishing an [`event::Event`].

pub mod bus;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod gateway;
pub mod handlers;
pub mod merge;
pub mod projection;
pub mod push;
pub mod renderer;
pub mod store;

pub use bus::{EventBus, Inbox, Publisher, Subscriber, SubscriptionId};
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, LaunchConfig};
pub use engine::{Engine, Services};
pub use error::ErrorCode;
pub use event::{Event, EventKind, Payload};
pub use gateway::{GatewayError, RemoteGateway};
pub use projection::{Decision, Projection, Stage};
pub use store::{PersistedData, Store, StoreError};
