//! Event fold → launch snapshot.
//!
//! The [`Projection`] is the single source of truth the UI reads. It is the
//! fold of every [`Event`] published so far, seeded once from
//! [`PersistedData`] at process start.
//!
//! # Lock-in
//!
//! The first time a destination is settled (fresh resolution or the saved
//! fallback) the stage becomes [`Stage::Ready`] and `locked` flips to
//! `true`. From then on:
//!
//! - `stage` and `destination` never change again;
//! - timeout and connectivity events are ignored;
//! - home navigation is ignored.
//!
//! Only the permission prompt outcome may still raise `go_to_destination`,
//! because the prompt sits between lock-in and showing the destination.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::event::{Event, Payload};
use crate::store::PersistedData;

/// Default cooldown before a deferred permission prompt may reappear.
pub const PERMISSION_COOLDOWN_DAYS: i64 = 3;

/// Mode persisted once a destination has been resolved.
pub const ACTIVE_MODE: &str = "Active";

/// Coarse launch stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "stage", content = "url", rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Idle,
    Launching,
    Validating,
    Validated,
    Ready(String),
    Suspended,
    NoConnection,
}

/// Mirror of the persisted destination state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedConfig {
    pub saved_url: Option<String>,
    pub mode: Option<String>,
    pub is_new_install: bool,
}

impl Default for SavedConfig {
    fn default() -> Self {
        Self {
            saved_url: None,
            mode: None,
            is_new_install: true,
        }
    }
}

/// Notification-permission bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct PermissionState {
    pub given: bool,
    pub blocked: bool,
    pub last_asked: Option<DateTime<Utc>>,
}

impl PermissionState {
    /// Whether the prompt may be shown at `now`.
    ///
    /// Never once the user granted or blocked. Otherwise only if the user
    /// was never asked, or was last asked at least `cooldown` ago.
    #[must_use]
    pub fn eligible_at(&self, now: DateTime<Utc>, cooldown: TimeDelta) -> bool {
        if self.given || self.blocked {
            return false;
        }
        self.last_asked
            .is_none_or(|asked| now.signed_duration_since(asked) >= cooldown)
    }
}

/// One-shot signals for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct UiIntents {
    pub show_permission_sheet: bool,
    pub show_no_connection_view: bool,
    pub go_to_home: bool,
    pub go_to_destination: bool,
}

/// What the UI should do next, derived from [`UiIntents`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "url", rename_all = "snake_case")]
pub enum Decision {
    Destination(String),
    PermissionPrompt(String),
    Home,
}

/// The launch snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Projection {
    stage: Stage,
    destination: Option<String>,
    locked: bool,
    attribution: Payload,
    deeplink: Payload,
    config: SavedConfig,
    permission: PermissionState,
    intents: UiIntents,
    #[serde(skip)]
    cooldown: TimeDelta,
}

impl Default for Projection {
    fn default() -> Self {
        Self::new()
    }
}

impl Projection {
    /// Fresh projection with the default permission cooldown.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cooldown(TimeDelta::days(PERMISSION_COOLDOWN_DAYS))
    }

    /// Fresh projection with a custom permission cooldown.
    #[must_use]
    pub fn with_cooldown(cooldown: TimeDelta) -> Self {
        Self {
            stage: Stage::Idle,
            destination: None,
            locked: false,
            attribution: Payload::new(),
            deeplink: Payload::new(),
            config: SavedConfig::default(),
            permission: PermissionState::default(),
            intents: UiIntents::default(),
            cooldown,
        }
    }

    /// Load persisted state. Called once, before any event is applied.
    pub fn seed(&mut self, data: &PersistedData) {
        self.config = SavedConfig {
            saved_url: data.url.clone(),
            mode: data.mode.clone(),
            is_new_install: data.is_new_install,
        };
        self.attribution.clone_from(&data.attribution);
        self.deeplink.clone_from(&data.deeplink);
        self.permission = PermissionState {
            given: data.perm_given,
            blocked: data.perm_blocked,
            last_asked: data.perm_date,
        };
    }

    /// Fold one event into the snapshot.
    pub fn apply(&mut self, event: &Event, now: DateTime<Utc>) {
        match event {
            Event::AppLaunched => self.advance(Stage::Launching),
            Event::AppTimedOut => self.suspend_to_home(),
            Event::AttributionReceived(payload) | Event::AttributionFetchSucceeded(payload) => {
                self.attribution.clone_from(payload);
            }
            Event::DeeplinkReceived(payload) => self.deeplink.clone_from(payload),
            Event::ConnectionLost => {
                if !self.locked {
                    self.stage = Stage::NoConnection;
                    self.intents.show_no_connection_view = true;
                }
            }
            Event::ConnectionRestored => {
                if !self.locked && self.stage == Stage::NoConnection {
                    self.stage = Stage::Suspended;
                    self.intents.show_no_connection_view = false;
                }
            }
            Event::ValidationTriggered => self.advance(Stage::Validating),
            Event::ValidationSucceeded => self.advance(Stage::Validated),
            Event::ValidationFailed { .. } | Event::AttributionFetchFailed => {
                self.suspend_to_home();
            }
            Event::DestinationFetchSucceeded { url } => {
                if self.locked {
                    return;
                }
                self.config.saved_url = Some(url.clone());
                self.config.mode = Some(ACTIVE_MODE.to_string());
                self.config.is_new_install = false;
                self.lock_in(url.clone(), now);
            }
            Event::DestinationFetchFailed => {
                if self.locked {
                    return;
                }
                match self.config.saved_url.clone() {
                    Some(saved) => self.lock_in(saved, now),
                    None => self.suspend_to_home(),
                }
            }
            Event::PermissionGranted => {
                self.permission.given = true;
                self.permission.last_asked = Some(now);
                self.intents.show_permission_sheet = false;
                self.intents.go_to_destination = true;
            }
            Event::PermissionDenied => {
                self.permission.blocked = true;
                self.permission.last_asked = Some(now);
                self.intents.show_permission_sheet = false;
                self.intents.go_to_destination = true;
            }
            Event::PermissionDeferred => {
                self.permission.last_asked = Some(now);
                self.intents.show_permission_sheet = false;
            }
            Event::NavigateToHome => {
                if !self.locked {
                    self.intents.go_to_home = true;
                }
            }
            Event::NavigateToDestination => {
                if self.destination.is_some() {
                    self.intents.go_to_destination = true;
                }
            }
            Event::AttributionFetchTriggered
            | Event::DestinationFetchTriggered
            | Event::PermissionDialogRequested => {}
        }
    }

    /// Move forward along the happy path. Ignored once locked, and while
    /// offline (`NoConnection` is left only by a restore or a failure).
    fn advance(&mut self, next: Stage) {
        if self.locked || self.stage == Stage::NoConnection {
            return;
        }
        self.stage = next;
    }

    fn suspend_to_home(&mut self) {
        if self.locked {
            return;
        }
        self.stage = Stage::Suspended;
        self.intents.go_to_home = true;
    }

    fn lock_in(&mut self, url: String, now: DateTime<Utc>) {
        self.destination = Some(url.clone());
        self.stage = Stage::Ready(url);
        self.locked = true;
        if self.permission_eligible(now) {
            self.intents.show_permission_sheet = true;
        } else {
            self.intents.go_to_destination = true;
        }
    }

    #[must_use]
    pub const fn stage(&self) -> &Stage {
        &self.stage
    }

    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    #[must_use]
    pub const fn locked(&self) -> bool {
        self.locked
    }

    #[must_use]
    pub const fn attribution(&self) -> &Payload {
        &self.attribution
    }

    #[must_use]
    pub const fn deeplink(&self) -> &Payload {
        &self.deeplink
    }

    #[must_use]
    pub const fn config(&self) -> &SavedConfig {
        &self.config
    }

    #[must_use]
    pub const fn permission(&self) -> &PermissionState {
        &self.permission
    }

    #[must_use]
    pub const fn intents(&self) -> &UiIntents {
        &self.intents
    }

    /// Whether the permission prompt may be shown at `now`.
    #[must_use]
    pub fn permission_eligible(&self, now: DateTime<Utc>) -> bool {
        self.permission.eligible_at(now, self.cooldown)
    }

    /// Navigation the UI should perform, if any has been decided.
    ///
    /// Destination wins over a pending prompt, which wins over home.
    #[must_use]
    pub fn decision(&self) -> Option<Decision> {
        if self.intents.go_to_destination {
            if let Some(url) = &self.destination {
                return Some(Decision::Destination(url.clone()));
            }
        }
        if self.intents.show_permission_sheet {
            if let Some(url) = &self.destination {
                return Some(Decision::PermissionPrompt(url.clone()));
            }
        }
        if self.intents.go_to_home {
            return Some(Decision::Home);
        }
        None
    }
}
