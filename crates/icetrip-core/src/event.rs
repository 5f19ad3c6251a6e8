//! Event model for the launch orchestration bus.
//!
//! Every state change in the launch funnel is an [`Event`]. Events are
//! immutable values with no identity beyond their occurrence; the
//! [`crate::projection::Projection`] is the left fold of all events
//! published so far.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Flat string map carried by attribution and deep-link events.
///
/// A `BTreeMap` keeps iteration (and therefore persisted JSON and request
/// bodies) in a stable key order.
pub type Payload = BTreeMap<String, String>;

/// Everything that can happen during launch orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    // Lifecycle
    AppLaunched,
    AppTimedOut,

    // Data arrival
    AttributionReceived(Payload),
    DeeplinkReceived(Payload),

    // Connectivity
    ConnectionRestored,
    ConnectionLost,

    // Liveness validation
    ValidationTriggered,
    ValidationSucceeded,
    ValidationFailed { reason: String },

    // Attribution refresh
    AttributionFetchTriggered,
    AttributionFetchSucceeded(Payload),
    AttributionFetchFailed,

    // Destination resolution
    DestinationFetchTriggered,
    DestinationFetchSucceeded { url: String },
    DestinationFetchFailed,

    // Notification permission
    PermissionDialogRequested,
    PermissionGranted,
    PermissionDenied,
    PermissionDeferred,

    // Navigation
    NavigateToHome,
    NavigateToDestination,
}

/// Payload-free discriminant of an [`Event`], used for logging and for
/// asserting event order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AppLaunched,
    AppTimedOut,
    AttributionReceived,
    DeeplinkReceived,
    ConnectionRestored,
    ConnectionLost,
    ValidationTriggered,
    ValidationSucceeded,
    ValidationFailed,
    AttributionFetchTriggered,
    AttributionFetchSucceeded,
    AttributionFetchFailed,
    DestinationFetchTriggered,
    DestinationFetchSucceeded,
    DestinationFetchFailed,
    PermissionDialogRequested,
    PermissionGranted,
    PermissionDenied,
    PermissionDeferred,
    NavigateToHome,
    NavigateToDestination,
}

impl Event {
    /// Discriminant of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::AppLaunched => EventKind::AppLaunched,
            Self::AppTimedOut => EventKind::AppTimedOut,
            Self::AttributionReceived(_) => EventKind::AttributionReceived,
            Self::DeeplinkReceived(_) => EventKind::DeeplinkReceived,
            Self::ConnectionRestored => EventKind::ConnectionRestored,
            Self::ConnectionLost => EventKind::ConnectionLost,
            Self::ValidationTriggered => EventKind::ValidationTriggered,
            Self::ValidationSucceeded => EventKind::ValidationSucceeded,
            Self::ValidationFailed { .. } => EventKind::ValidationFailed,
            Self::AttributionFetchTriggered => EventKind::AttributionFetchTriggered,
            Self::AttributionFetchSucceeded(_) => EventKind::AttributionFetchSucceeded,
            Self::AttributionFetchFailed => EventKind::AttributionFetchFailed,
            Self::DestinationFetchTriggered => EventKind::DestinationFetchTriggered,
            Self::DestinationFetchSucceeded { .. } => EventKind::DestinationFetchSucceeded,
            Self::DestinationFetchFailed => EventKind::DestinationFetchFailed,
            Self::PermissionDialogRequested => EventKind::PermissionDialogRequested,
            Self::PermissionGranted => EventKind::PermissionGranted,
            Self::PermissionDenied => EventKind::PermissionDenied,
            Self::PermissionDeferred => EventKind::PermissionDeferred,
            Self::NavigateToHome => EventKind::NavigateToHome,
            Self::NavigateToDestination => EventKind::NavigateToDestination,
        }
    }

    /// Whether this event reports a failure that the projection must turn
    /// into a navigation decision.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed { .. }
                | Self::AttributionFetchFailed
                | Self::DestinationFetchFailed
        )
    }
}

impl EventKind {
    /// Canonical snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppLaunched => "app_launched",
            Self::AppTimedOut => "app_timed_out",
            Self::AttributionReceived => "attribution_received",
            Self::DeeplinkReceived => "deeplink_received",
            Self::ConnectionRestored => "connection_restored",
            Self::ConnectionLost => "connection_lost",
            Self::ValidationTriggered => "validation_triggered",
            Self::ValidationSucceeded => "validation_succeeded",
            Self::ValidationFailed => "validation_failed",
            Self::AttributionFetchTriggered => "attribution_fetch_triggered",
            Self::AttributionFetchSucceeded => "attribution_fetch_succeeded",
            Self::AttributionFetchFailed => "attribution_fetch_failed",
            Self::DestinationFetchTriggered => "destination_fetch_triggered",
            Self::DestinationFetchSucceeded => "destination_fetch_succeeded",
            Self::DestinationFetchFailed => "destination_fetch_failed",
            Self::PermissionDialogRequested => "permission_dialog_requested",
            Self::PermissionGranted => "permission_granted",
            Self::PermissionDenied => "permission_denied",
            Self::PermissionDeferred => "permission_deferred",
            Self::NavigateToHome => "navigate_to_home",
            Self::NavigateToDestination => "navigate_to_destination",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttributionReceived(payload)
            | Self::DeeplinkReceived(payload)
            | Self::AttributionFetchSucceeded(payload) => {
                write!(f, "{}({} keys)", self.kind(), payload.len())
            }
            Self::ValidationFailed { reason } => write!(f, "{}({reason})", self.kind()),
            Self::DestinationFetchSucceeded { url } => write!(f, "{}({url})", self.kind()),
            _ => f.write_str(self.kind().as_str()),
        }
    }
}

/// Flatten a JSON object into a [`Payload`], stringifying every value.
///
/// Strings are taken verbatim; every other value uses its JSON text
/// (`12`, `true`, `null`, `{"a":1}`).
#[must_use]
pub fn coerce_payload(object: &serde_json::Map<String, serde_json::Value>) -> Payload {
    object
        .iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}
