//! Durable launch state.
//!
//! Two tiers plus a hot cache:
//!
//! - **primary**: the shared container every key is written to;
//! - **fallback**: the legacy location that mirrors the destination URL
//!   only, read when the primary has no URL;
//! - **hot**: an in-process cache that every write updates synchronously,
//!   so reads within one process lifetime never go stale.
//!
//! Reads never fail: a tier error is logged and treated as a missing value.

pub mod backend;
pub mod mask;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::clock::{epoch_millis, from_epoch_millis};
use crate::error::ErrorCode;
use crate::event::Payload;

pub use backend::{FileBackend, KvBackend, MemoryBackend};

/// Storage keys.
pub mod keys {
    pub const ATTRIBUTION: &str = "itp_attribution_data";
    pub const DEEPLINK: &str = "itp_deeplink_data";
    pub const URL: &str = "itp_target_url";
    pub const MODE: &str = "itp_mode_value";
    pub const INSTALLED: &str = "itp_installed_flag";
    pub const PERM_GIVEN: &str = "itp_perm_given";
    pub const PERM_BLOCKED: &str = "itp_perm_blocked";
    pub const PERM_DATE: &str = "itp_perm_date";
    pub const OVERRIDE_URL: &str = "temp_url";
    pub const PUSH_TOKEN: &str = "push_token";
    pub const DEVICE_ID: &str = "itp_device_id";
    pub const COOKIE_PREFIX: &str = "itp_cookies_";
}

/// Store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{}: i/o failure at {}: {source}", ErrorCode::StoreWriteFailed.code(), path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: corrupt store file {}: {source}", ErrorCode::StoreReadFailed.code(), path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: lock timed out after {waited:?} at {}", ErrorCode::StoreLockContention.code(), path.display())]
    LockTimeout { path: PathBuf, waited: Duration },
    #[error("{}: cannot encode value for {key}: {source}", ErrorCode::StoreWriteFailed.code())]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Machine-readable code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Io { .. } | Self::Encode { .. } => ErrorCode::StoreWriteFailed,
            Self::Corrupt { .. } => ErrorCode::StoreReadFailed,
            Self::LockTimeout { .. } => ErrorCode::StoreLockContention,
        }
    }
}

/// Everything loaded at process start to seed the projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedData {
    pub url: Option<String>,
    pub mode: Option<String>,
    pub is_new_install: bool,
    pub attribution: Payload,
    pub deeplink: Payload,
    pub perm_given: bool,
    pub perm_blocked: bool,
    pub perm_date: Option<DateTime<Utc>>,
}

impl Default for PersistedData {
    fn default() -> Self {
        Self {
            url: None,
            mode: None,
            is_new_install: true,
            attribution: Payload::new(),
            deeplink: Payload::new(),
            perm_given: false,
            perm_blocked: false,
            perm_date: None,
        }
    }
}

/// Dual-tier key-value store with a hot cache.
pub struct Store {
    primary: Box<dyn KvBackend>,
    fallback: Box<dyn KvBackend>,
    hot: Mutex<HashMap<&'static str, String>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("hot_keys", &self.hot.lock().len())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Build a store over two tiers and preheat the cache.
    #[must_use]
    pub fn new(primary: Box<dyn KvBackend>, fallback: Box<dyn KvBackend>) -> Self {
        let store = Self {
            primary,
            fallback,
            hot: Mutex::new(HashMap::new()),
        };
        store.preheat();
        store
    }

    /// Two in-memory tiers.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()), Box::new(MemoryBackend::new()))
    }

    /// File-backed tiers under `dir` (`shared.json` + `standard.json`).
    ///
    /// # Errors
    ///
    /// Returns an error if either existing file is unreadable or corrupt.
    pub fn open_dir(dir: &Path) -> Result<Self, StoreError> {
        let primary = FileBackend::open(dir.join("shared.json"))?;
        let fallback = FileBackend::open(dir.join("standard.json"))?;
        Ok(Self::new(Box::new(primary), Box::new(fallback)))
    }

    fn preheat(&self) {
        let mut hot = self.hot.lock();
        for key in [keys::URL, keys::ATTRIBUTION] {
            if let Some(value) = read_tier(self.primary.as_ref(), key) {
                hot.insert(key, value);
            }
        }
    }

    fn write(&self, key: &'static str, value: &str) -> Result<(), StoreError> {
        self.primary.set(key, value)?;
        self.hot.lock().insert(key, value.to_string());
        Ok(())
    }

    fn read(&self, key: &'static str) -> Option<String> {
        if let Some(value) = self.hot.lock().get(key) {
            return Some(value.clone());
        }
        read_tier(self.primary.as_ref(), key)
    }

    fn read_bool(&self, key: &'static str) -> bool {
        self.read(key).is_some_and(|v| v == "true")
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Persist the attribution map as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the primary tier cannot be written.
    pub fn save_attribution(&self, payload: &Payload) -> Result<(), StoreError> {
        let json = encode_payload(keys::ATTRIBUTION, payload)?;
        self.write(keys::ATTRIBUTION, &json)
    }

    /// Persist the deep-link map, masked at rest.
    ///
    /// # Errors
    ///
    /// Returns an error if the primary tier cannot be written.
    pub fn save_deeplink(&self, payload: &Payload) -> Result<(), StoreError> {
        let json = encode_payload(keys::DEEPLINK, payload)?;
        self.write(keys::DEEPLINK, &mask::mask(&json))
    }

    /// Persist the destination URL to both tiers.
    ///
    /// # Errors
    ///
    /// Returns an error if either tier cannot be written.
    pub fn save_url(&self, url: &str) -> Result<(), StoreError> {
        self.write(keys::URL, url)?;
        self.fallback.set(keys::URL, url)
    }

    /// # Errors
    ///
    /// Returns an error if the primary tier cannot be written.
    pub fn save_mode(&self, mode: &str) -> Result<(), StoreError> {
        self.write(keys::MODE, mode)
    }

    /// Set the installed flag. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the primary tier cannot be written.
    pub fn mark_installed(&self) -> Result<(), StoreError> {
        self.write(keys::INSTALLED, "true")
    }

    /// Persist the permission outcome and when it was recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the primary tier cannot be written.
    pub fn save_permission(
        &self,
        given: bool,
        blocked: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.write(keys::PERM_GIVEN, bool_str(given))?;
        self.write(keys::PERM_BLOCKED, bool_str(blocked))?;
        self.write(keys::PERM_DATE, &epoch_millis(at).to_string())
    }

    /// Persist a push-delivered override URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the primary tier cannot be written.
    pub fn save_override_url(&self, url: &str) -> Result<(), StoreError> {
        self.write(keys::OVERRIDE_URL, url)
    }

    /// Remove and return the override URL, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the primary tier cannot be written.
    pub fn take_override_url(&self) -> Result<Option<String>, StoreError> {
        let current = self.read(keys::OVERRIDE_URL);
        if current.is_some() {
            self.primary.remove(keys::OVERRIDE_URL)?;
            self.hot.lock().remove(keys::OVERRIDE_URL);
        }
        Ok(current)
    }

    /// # Errors
    ///
    /// Returns an error if the primary tier cannot be written.
    pub fn save_push_token(&self, token: &str) -> Result<(), StoreError> {
        self.write(keys::PUSH_TOKEN, token)
    }

    /// Persist a cookie jar's serialized contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the primary tier cannot be written.
    pub fn save_cookies(&self, jar_id: &str, encoded: &str) -> Result<(), StoreError> {
        self.primary
            .set(&format!("{}{jar_id}", keys::COOKIE_PREFIX), encoded)
    }

    /// Return the persisted device id, generating and saving one on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if a new id cannot be written.
    pub fn device_id_or_create(&self) -> Result<String, StoreError> {
        if let Some(existing) = self.read(keys::DEVICE_ID) {
            return Ok(existing);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.write(keys::DEVICE_ID, &id)?;
        debug!(device_id = %id, "generated attribution device id");
        Ok(id)
    }

    /// Wipe both tiers and the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if either tier cannot be cleared.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.primary.clear()?;
        self.fallback.clear()?;
        self.hot.lock().clear();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.read_bool(keys::INSTALLED)
    }

    #[must_use]
    pub fn override_url(&self) -> Option<String> {
        self.read(keys::OVERRIDE_URL)
    }

    #[must_use]
    pub fn push_token(&self) -> Option<String> {
        self.read(keys::PUSH_TOKEN)
    }

    #[must_use]
    pub fn cookies(&self, jar_id: &str) -> Option<String> {
        read_tier(
            self.primary.as_ref(),
            &format!("{}{jar_id}", keys::COOKIE_PREFIX),
        )
    }

    /// Destination URL: hot cache, then primary, then the fallback tier.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.read(keys::URL)
            .or_else(|| read_tier(self.fallback.as_ref(), keys::URL))
    }

    /// Everything needed to seed the projection.
    #[must_use]
    pub fn load(&self) -> PersistedData {
        let attribution = self
            .read(keys::ATTRIBUTION)
            .and_then(|json| decode_payload(keys::ATTRIBUTION, &json))
            .unwrap_or_default();
        let deeplink = self
            .read(keys::DEEPLINK)
            .and_then(|masked| mask::unmask(&masked))
            .and_then(|json| decode_payload(keys::DEEPLINK, &json))
            .unwrap_or_default();
        let perm_date = self
            .read(keys::PERM_DATE)
            .and_then(|raw| raw.parse::<i64>().ok())
            .filter(|millis| *millis > 0)
            .and_then(from_epoch_millis);

        PersistedData {
            url: self.url(),
            mode: self.read(keys::MODE),
            is_new_install: !self.is_installed(),
            attribution,
            deeplink,
            perm_given: self.read_bool(keys::PERM_GIVEN),
            perm_blocked: self.read_bool(keys::PERM_BLOCKED),
            perm_date,
        }
    }
}

fn read_tier(tier: &dyn KvBackend, key: &str) -> Option<String> {
    match tier.get(key) {
        Ok(value) => value,
        Err(err) => {
            warn!(key, error = %err, "store read failed; treating as missing");
            None
        }
    }
}

const fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn encode_payload(key: &'static str, payload: &Payload) -> Result<String, StoreError> {
    serde_json::to_string(payload).map_err(|source| StoreError::Encode { key, source })
}

fn decode_payload(key: &str, json: &str) -> Option<Payload> {
    let value: serde_json::Value = match serde_json::from_str(json) {
        Ok(value) => value,
        Err(err) => {
            warn!(key, error = %err, "stored payload is not JSON; ignoring");
            return None;
        }
    };
    value.as_object().map(crate::event::coerce_payload)
}
