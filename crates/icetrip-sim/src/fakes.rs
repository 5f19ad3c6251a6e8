//! Scripted stand-ins for the remote endpoints and platform hooks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use icetrip_core::handlers::{PermissionPrompter, PushRegistrar};
use icetrip_core::{GatewayError, Payload, RemoteGateway};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// URL the scripted destination endpoint resolves to when not told otherwise.
pub const SIM_DESTINATION: &str = "https://dest.sim.example/landing";

/// Attribution returned by an unscripted pull.
#[must_use]
pub fn paid_attribution() -> Payload {
    Payload::from([
        ("af_status".to_string(), "Non-organic".to_string()),
        ("media_source".to_string(), "sim_network".to_string()),
        ("campaign".to_string(), "sim_campaign".to_string()),
    ])
}

/// Conversion delivered by the SDK for an organic install.
#[must_use]
pub fn organic_attribution() -> Payload {
    Payload::from([("af_status".to_string(), "Organic".to_string())])
}

/// Calls made against a [`ScriptedGateway`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCalls {
    pub liveness: usize,
    pub attribution: usize,
    pub destination: usize,
}

/// Gateway answering from per-endpoint queues.
///
/// Each call pops the next scripted outcome; an empty queue answers with
/// success. Every call first sleeps `latency` on the tokio clock.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    liveness: Mutex<VecDeque<Result<bool, GatewayError>>>,
    attribution: Mutex<VecDeque<Result<Payload, GatewayError>>>,
    destination: Mutex<VecDeque<Result<String, GatewayError>>>,
    latency: Duration,
    liveness_calls: AtomicUsize,
    attribution_calls: AtomicUsize,
    destination_calls: AtomicUsize,
}

impl ScriptedGateway {
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_liveness(
        self,
        outcomes: impl IntoIterator<Item = Result<bool, GatewayError>>,
    ) -> Self {
        self.liveness.lock().extend(outcomes);
        self
    }

    #[must_use]
    pub fn with_attribution(
        self,
        outcomes: impl IntoIterator<Item = Result<Payload, GatewayError>>,
    ) -> Self {
        self.attribution.lock().extend(outcomes);
        self
    }

    #[must_use]
    pub fn with_destination(
        self,
        outcomes: impl IntoIterator<Item = Result<String, GatewayError>>,
    ) -> Self {
        self.destination.lock().extend(outcomes);
        self
    }

    #[must_use]
    pub fn calls(&self) -> GatewayCalls {
        GatewayCalls {
            liveness: self.liveness_calls.load(Ordering::SeqCst),
            attribution: self.attribution_calls.load(Ordering::SeqCst),
            destination: self.destination_calls.load(Ordering::SeqCst),
        }
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl RemoteGateway for ScriptedGateway {
    async fn check_liveness(&self) -> Result<bool, GatewayError> {
        self.liveness_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.liveness.lock().pop_front().unwrap_or(Ok(true))
    }

    async fn pull_attribution(&self, _device_id: &str) -> Result<Payload, GatewayError> {
        self.attribution_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.attribution
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(paid_attribution()))
    }

    async fn fetch_destination(&self, _attribution: &Payload) -> Result<String, GatewayError> {
        self.destination_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.destination
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(SIM_DESTINATION.to_string()))
    }
}

/// How the simulated user answers the permission sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAnswer {
    Grant,
    Deny,
    /// Dismiss the sheet without touching the system prompt.
    Defer,
    /// The system prompt cannot be shown.
    Unavailable,
}

/// Prompter replaying one fixed [`PermissionAnswer`].
#[derive(Debug, Clone, Copy)]
pub struct ScriptedPrompter(pub PermissionAnswer);

#[async_trait]
impl PermissionPrompter for ScriptedPrompter {
    async fn request_authorization(&self) -> anyhow::Result<bool> {
        match self.0 {
            PermissionAnswer::Grant => Ok(true),
            PermissionAnswer::Deny | PermissionAnswer::Defer => Ok(false),
            PermissionAnswer::Unavailable => Err(anyhow::anyhow!("no window to present from")),
        }
    }
}

/// Registrar that counts registrations.
#[derive(Debug, Default)]
pub struct CountingRegistrar(AtomicUsize);

impl CountingRegistrar {
    #[must_use]
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl PushRegistrar for CountingRegistrar {
    fn register_for_remote_notifications(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn queues_drain_then_default_to_success() {
        let gateway = ScriptedGateway::new(Duration::from_secs(1))
            .with_destination([Err(GatewayError::RateLimited)]);

        assert_eq!(
            gateway.fetch_destination(&Payload::new()).await,
            Err(GatewayError::RateLimited)
        );
        assert_eq!(
            gateway.fetch_destination(&Payload::new()).await,
            Ok(SIM_DESTINATION.to_string())
        );
        assert_eq!(gateway.check_liveness().await, Ok(true));
        assert_eq!(
            gateway.calls(),
            GatewayCalls {
                liveness: 1,
                attribution: 0,
                destination: 2,
            }
        );
    }

    #[tokio::test]
    async fn prompter_answers() {
        assert!(ScriptedPrompter(PermissionAnswer::Grant)
            .request_authorization()
            .await
            .expect("grant"));
        assert!(ScriptedPrompter(PermissionAnswer::Unavailable)
            .request_authorization()
            .await
            .is_err());
    }
}
