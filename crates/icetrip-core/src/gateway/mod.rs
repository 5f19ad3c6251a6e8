//! Remote services the launch funnel talks to.
//!
//! [`RemoteGateway`] is one attempt per call; the bounded backoff around
//! destination resolution lives in [`retry`] so fakes only script
//! per-attempt outcomes.

pub mod http;
pub mod retry;

use async_trait::async_trait;

use crate::error::ErrorCode;
use crate::event::Payload;

pub use http::{DestinationMeta, HttpGateway, build_destination_body};
pub use retry::{RetryPolicy, resolve_destination};

/// Gateway failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("{}: rate limited (HTTP 429)", ErrorCode::RateLimited.code())]
    RateLimited,
    #[error("{}: unexpected HTTP status {status}", ErrorCode::GatewayStatus.code())]
    Status { status: u16 },
    #[error("{}: transport failure: {0}", ErrorCode::GatewayTransport.code())]
    Transport(String),
    #[error("{}: malformed response: {0}", ErrorCode::DecodeFailure.code())]
    Decode(String),
    #[error("{}: invalid request URL {0}", ErrorCode::InvalidRequestUrl.code())]
    BadUrl(String),
    #[error("{}: no attempts configured", ErrorCode::RetryBudgetExhausted.code())]
    NoAttempts,
}

impl GatewayError {
    /// Machine-readable code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::RateLimited => ErrorCode::RateLimited,
            Self::Status { .. } => ErrorCode::GatewayStatus,
            Self::Transport(_) => ErrorCode::GatewayTransport,
            Self::Decode(_) => ErrorCode::DecodeFailure,
            Self::BadUrl(_) => ErrorCode::InvalidRequestUrl,
            Self::NoAttempts => ErrorCode::RetryBudgetExhausted,
        }
    }
}

/// One-shot remote calls.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Read the liveness document. `Ok(true)` iff it holds a non-empty,
    /// parseable URL string.
    async fn check_liveness(&self) -> Result<bool, GatewayError>;

    /// Pull install attribution for `device_id`. Values are stringified.
    async fn pull_attribution(&self, device_id: &str) -> Result<Payload, GatewayError>;

    /// One destination-resolution attempt with the full attribution map.
    async fn fetch_destination(&self, attribution: &Payload) -> Result<String, GatewayError>;
}

/// Whether `value` is an acceptable liveness marker.
#[must_use]
pub fn is_live_marker(value: &serde_json::Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| !s.is_empty() && url::Url::parse(s).is_ok())
}
