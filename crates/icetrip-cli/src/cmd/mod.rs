pub mod config;
pub mod push;
pub mod reset;
pub mod run;
pub mod state;

use anyhow::{Context, Result};
use icetrip_core::{LaunchConfig, Store};
use serde_json::{Map, Value};
use std::io::Read;
use std::path::Path;

/// Open the file-backed store under the configured data dir.
pub fn open_store(config: &LaunchConfig) -> Result<Store> {
    let dir = config.store.resolved_data_dir();
    Store::open_dir(&dir).with_context(|| format!("open store at {}", dir.display()))
}

/// Read a JSON object from `path`, or stdin when `path` is `-`.
pub fn read_json_object(path: &Path) -> Result<Map<String, Value>> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
    };
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("parse JSON from {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("expected a JSON object in {}, got {other}", path.display()),
    }
}
