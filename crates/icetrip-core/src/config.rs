use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;

use crate::error::ErrorCode;

/// Config file failures. Both carry [`ErrorCode::ConfigParseError`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{}: Failed to read {}: {source}", ErrorCode::ConfigParseError.code(), path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: Failed to parse {}: {source}", ErrorCode::ConfigParseError.code(), path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } | Self::Parse { .. } => ErrorCode::ConfigParseError,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    #[serde(default)]
    pub endpoints: EndpointConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_config_url")]
    pub config_url: String,
    #[serde(default = "default_attribution_base_url")]
    pub attribution_base_url: String,
    /// Realtime-store document holding the liveness URL.
    #[serde(default = "default_liveness_url")]
    pub liveness_url: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            config_url: default_config_url(),
            attribution_base_url: default_attribution_base_url(),
            liveness_url: default_liveness_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_id")]
    pub app_id: String,
    #[serde(default)]
    pub dev_key: String,
    #[serde(default = "default_bundle_id")]
    pub bundle_id: String,
    /// Messaging sender id, sent as `firebase_project_id`.
    #[serde(default)]
    pub sender_id: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            dev_key: String::new(),
            bundle_id: default_bundle_id(),
            sender_id: String::new(),
            platform: default_platform(),
            locale: default_locale(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_launch_timeout_ms")]
    pub launch_timeout_ms: u64,
    #[serde(default = "default_merge_window_ms")]
    pub merge_window_ms: u64,
    #[serde(default = "default_relay_delay_ms")]
    pub relay_delay_ms: u64,
    #[serde(default = "default_attribution_cushion_ms")]
    pub attribution_cushion_ms: u64,
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,
    #[serde(default = "default_permission_cooldown_days")]
    pub permission_cooldown_days: i64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            launch_timeout_ms: default_launch_timeout_ms(),
            merge_window_ms: default_merge_window_ms(),
            relay_delay_ms: default_relay_delay_ms(),
            attribution_cushion_ms: default_attribution_cushion_ms(),
            retry_delays_ms: default_retry_delays_ms(),
            permission_cooldown_days: default_permission_cooldown_days(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl TimingConfig {
    #[must_use]
    pub const fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    #[must_use]
    pub const fn merge_window(&self) -> Duration {
        Duration::from_millis(self.merge_window_ms)
    }

    #[must_use]
    pub const fn relay_delay(&self) -> Duration {
        Duration::from_millis(self.relay_delay_ms)
    }

    #[must_use]
    pub const fn attribution_cushion(&self) -> Duration {
        Duration::from_millis(self.attribution_cushion_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    /// Cooldown as a `TimeDelta`; out-of-range values clamp to the default.
    #[must_use]
    pub fn permission_cooldown(&self) -> TimeDelta {
        TimeDelta::try_days(self.permission_cooldown_days)
            .unwrap_or_else(|| TimeDelta::days(default_permission_cooldown_days()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for `shared.json` / `standard.json`. `None` uses the
    /// platform data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolved data directory.
    #[must_use]
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("icetrip")
        })
    }
}

/// Default config path: `<config_dir>/icetrip/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("icetrip/config.toml"))
}

/// Load from `explicit` if given (it must exist), else the default path if
/// present, else defaults.
///
/// # Errors
///
/// Returns an error if the chosen file cannot be read or parsed.
pub fn load_launch_config(explicit: Option<&Path>) -> Result<LaunchConfig> {
    if let Some(path) = explicit {
        return read_config(path);
    }
    let Some(path) = default_config_path() else {
        return Ok(LaunchConfig::default());
    };
    if !path.exists() {
        return Ok(LaunchConfig::default());
    }
    read_config(&path)
}

fn read_config(path: &Path) -> Result<LaunchConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config = toml::from_str::<LaunchConfig>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(config)
}

fn default_config_url() -> String {
    "https://guidetripsplanner.com/config.php".to_string()
}

fn default_attribution_base_url() -> String {
    "https://gcdsdk.appsflyer.com".to_string()
}

fn default_liveness_url() -> String {
    "https://icetrip-default-rtdb.firebaseio.com/users/log/data.json".to_string()
}

fn default_app_id() -> String {
    "6758891568".to_string()
}

fn default_bundle_id() -> String {
    "com.icetrip.planner".to_string()
}

fn default_platform() -> String {
    "iOS".to_string()
}

fn default_locale() -> String {
    locale_from_lang(env::var("LANG").ok().as_deref())
}

fn default_user_agent() -> String {
    format!("icetrip/{}", env!("CARGO_PKG_VERSION"))
}

const fn default_launch_timeout_ms() -> u64 {
    30_000
}

const fn default_merge_window_ms() -> u64 {
    2_500
}

const fn default_relay_delay_ms() -> u64 {
    2_500
}

const fn default_attribution_cushion_ms() -> u64 {
    5_000
}

fn default_retry_delays_ms() -> Vec<u64> {
    vec![9_000, 18_000, 36_000]
}

const fn default_permission_cooldown_days() -> i64 {
    crate::projection::PERMISSION_COOLDOWN_DAYS
}

const fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Two-letter upper-case language code from a `LANG`-style value
/// (`de_DE.UTF-8` → `DE`). Falls back to `EN`.
#[must_use]
pub fn locale_from_lang(lang: Option<&str>) -> String {
    lang.map(str::trim)
        .filter(|raw| raw.len() >= 2 && raw.is_char_boundary(2))
        .map(|raw| &raw[..2])
        .filter(|prefix| prefix.chars().all(|c| c.is_ascii_alphabetic()))
        .map_or_else(|| "EN".to_string(), str::to_ascii_uppercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_file_yields_defaults() {
        let config: LaunchConfig = toml::from_str("").expect("parse");
        assert_eq!(config.timing.launch_timeout_ms, 30_000);
        assert_eq!(config.timing.retry_delays_ms, vec![9_000, 18_000, 36_000]);
        assert_eq!(config.timing.permission_cooldown(), TimeDelta::days(3));
        assert_eq!(config.app.platform, "iOS");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: LaunchConfig = toml::from_str(
            r#"
[timing]
merge_window_ms = 100

[app]
dev_key = "abc"
"#,
        )
        .expect("parse");
        assert_eq!(config.timing.merge_window(), Duration::from_millis(100));
        assert_eq!(config.timing.relay_delay_ms, 2_500);
        assert_eq!(config.app.dev_key, "abc");
        assert_eq!(config.app.app_id, "6758891568");
    }

    #[test]
    fn explicit_path_must_parse() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[timing\n").expect("write");
        let err = load_launch_config(Some(&path)).expect_err("bad toml");
        assert!(err.to_string().contains("Failed to parse"));
        let config_err = err.downcast_ref::<ConfigError>().expect("typed error");
        assert!(matches!(config_err, ConfigError::Parse { .. }));
        assert_eq!(config_err.code(), ErrorCode::ConfigParseError);
    }

    #[test]
    fn explicit_path_overrides_store_dir() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store]\ndata_dir = \"/tmp/itp\"\n").expect("write");
        let config = load_launch_config(Some(&path)).expect("load");
        assert_eq!(config.store.resolved_data_dir(), PathBuf::from("/tmp/itp"));
    }

    #[test]
    fn locale_is_two_upper_letters() {
        assert_eq!(locale_from_lang(Some("de_DE.UTF-8")), "DE");
        assert_eq!(locale_from_lang(Some("C")), "EN");
        assert_eq!(locale_from_lang(None), "EN");
        assert_eq!(locale_from_lang(Some("C.UTF-8")), "EN");
    }
}
