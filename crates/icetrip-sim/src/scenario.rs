//! Launch scenarios: what the SDK delivers, how the endpoints misbehave and
//! how the user answers.

use icetrip_core::{GatewayError, Payload};
use serde::{Deserialize, Serialize};

use crate::campaign::CampaignConfig;
use crate::fakes::{PermissionAnswer, organic_attribution, paid_attribution};
use crate::rng::DeterministicRng;

/// Push override planted before launch.
pub const SIM_OVERRIDE: &str = "https://push.sim.example/promo";

/// Destination saved by an earlier launch.
pub const SIM_SAVED: &str = "https://saved.sim.example/home";

/// What the attribution SDK reports for this launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conversion {
    Paid,
    Organic,
    /// The SDK reports a conversion failure.
    Error,
    /// The SDK never calls back.
    Missing,
}

impl Conversion {
    #[must_use]
    pub fn payload(self) -> Option<Payload> {
        match self {
            Self::Paid => Some(paid_attribution()),
            Self::Organic => Some(organic_attribution()),
            Self::Error | Self::Missing => None,
        }
    }
}

/// A connectivity drop during the launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outage {
    pub start_ms: u64,
    pub length_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchScenario {
    pub seed: u64,
    /// A destination, attribution and install flag from an earlier launch.
    pub returning: bool,
    /// The permission prompt was deferred a day ago.
    pub recently_asked: bool,
    pub conversion: Conversion,
    pub conversion_delay_ms: u64,
    pub deeplink: bool,
    pub override_url: bool,
    pub liveness: Vec<Result<bool, GatewayError>>,
    pub attribution: Vec<Result<Payload, GatewayError>>,
    pub destination: Vec<Result<String, GatewayError>>,
    pub latency_ms: u64,
    pub outage: Option<Outage>,
    pub permission: PermissionAnswer,
}

impl LaunchScenario {
    /// Fresh paid install with healthy endpoints and a granting user.
    #[must_use]
    pub const fn baseline(seed: u64) -> Self {
        Self {
            seed,
            returning: false,
            recently_asked: false,
            conversion: Conversion::Paid,
            conversion_delay_ms: 0,
            deeplink: false,
            override_url: false,
            liveness: Vec::new(),
            attribution: Vec::new(),
            destination: Vec::new(),
            latency_ms: 0,
            outage: None,
            permission: PermissionAnswer::Grant,
        }
    }

    /// Draw a scenario for `seed` from the campaign's fault rates.
    #[must_use]
    pub fn generate(seed: u64, config: &CampaignConfig) -> Self {
        let mut rng = DeterministicRng::new(seed);
        let returning = rng.chance(config.returning_percent);
        let recently_asked = returning && rng.chance(50);

        let conversion = if rng.chance(config.missing_conversion_percent) {
            Conversion::Missing
        } else if rng.chance(config.conversion_error_percent) {
            Conversion::Error
        } else if rng.chance(config.organic_percent) {
            Conversion::Organic
        } else {
            Conversion::Paid
        };

        let mut liveness = Vec::new();
        if rng.chance(config.liveness_fault_percent) {
            liveness.push(if rng.chance(50) {
                Ok(false)
            } else {
                Err(GatewayError::Transport("connection reset by peer".into()))
            });
        }

        let mut attribution = Vec::new();
        if rng.chance(config.attribution_fault_percent) {
            attribution.push(Err(GatewayError::Status { status: 503 }));
        }

        let mut destination = Vec::new();
        for _ in 0..config.timing.retry_delays_ms.len() {
            if !rng.chance(config.destination_fault_percent) {
                break;
            }
            destination.push(Err(if rng.chance(config.rate_limit_percent) {
                GatewayError::RateLimited
            } else {
                GatewayError::Status { status: 502 }
            }));
        }

        let outage = rng.chance(config.outage_percent).then(|| Outage {
            start_ms: rng.below(20_000),
            length_ms: 1_000 + rng.below(10_000),
        });

        let permission = rng
            .pick(&[
                PermissionAnswer::Grant,
                PermissionAnswer::Deny,
                PermissionAnswer::Defer,
                PermissionAnswer::Unavailable,
            ])
            .copied()
            .unwrap_or(PermissionAnswer::Grant);

        Self {
            seed,
            returning,
            recently_asked,
            conversion,
            conversion_delay_ms: rng.below(5_000),
            deeplink: rng.chance(config.deeplink_percent),
            override_url: rng.chance(config.override_percent),
            liveness,
            attribution,
            destination,
            latency_ms: rng.below(config.max_latency_ms + 1),
            outage,
            permission,
        }
    }
}

/// Deep link the scenario delivers when `deeplink` is set.
#[must_use]
pub fn sim_deeplink() -> Payload {
    Payload::from([
        ("deep_link_value".to_string(), "trip_42".to_string()),
        ("media_source".to_string(), "deeplink_source".to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        let config = CampaignConfig::default();
        assert_eq!(
            LaunchScenario::generate(11, &config),
            LaunchScenario::generate(11, &config)
        );
    }

    #[test]
    fn destination_faults_never_exceed_attempts() {
        let config = CampaignConfig {
            destination_fault_percent: 100,
            ..CampaignConfig::default()
        };
        for seed in 0..50 {
            let scenario = LaunchScenario::generate(seed, &config);
            assert_eq!(
                scenario.destination.len(),
                config.timing.retry_delays_ms.len()
            );
        }
    }

    #[test]
    fn zero_rates_give_a_clean_launch() {
        let config = CampaignConfig::quiet(0..1);
        let scenario = LaunchScenario::generate(3, &config);
        assert!(!scenario.returning);
        assert_eq!(scenario.conversion, Conversion::Paid);
        assert!(scenario.liveness.is_empty());
        assert!(scenario.destination.is_empty());
        assert!(scenario.outage.is_none());
    }
}
