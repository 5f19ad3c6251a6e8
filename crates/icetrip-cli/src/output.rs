//! Shared output layer: pretty for humans, compact text for pipes, JSON for
//! machines.
//!
//! Precedence (highest wins):
//! 1. `--json` flag
//! 2. `FORMAT` env var → `"pretty"` | `"text"` | `"json"`
//! 3. Default: pretty if stdout is a TTY, text if piped.

use icetrip_core::{ConfigError, ErrorCode, GatewayError, StoreError};
use serde::Serialize;
use std::io::{self, IsTerminal, Write};

/// Shared width for pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 60;

pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Left-aligned key/value line.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<16} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Pretty,
    Text,
    Json,
}

impl OutputMode {
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

fn resolve_output_mode_inner(
    json_flag: bool,
    format_env: Option<&str>,
    is_tty: bool,
) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    if let Some(val) = format_env {
        match val.to_lowercase().as_str() {
            "json" => return OutputMode::Json,
            "text" => return OutputMode::Text,
            "pretty" => return OutputMode::Pretty,
            _ => {}
        }
    }

    if is_tty {
        OutputMode::Pretty
    } else {
        OutputMode::Text
    }
}

pub fn resolve_output_mode(json_flag: bool) -> OutputMode {
    let env_val = std::env::var("FORMAT").ok();
    let is_tty = io::stdout().is_terminal();
    resolve_output_mode_inner(json_flag, env_val.as_deref(), is_tty)
}

/// Render a serializable value with explicit text and pretty renderers.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Text => text_fn(value, &mut out)?,
        OutputMode::Pretty => pretty_fn(value, &mut out)?,
    }
    Ok(())
}

fn error_code(cause: &(dyn std::error::Error + 'static)) -> Option<ErrorCode> {
    if let Some(err) = cause.downcast_ref::<StoreError>() {
        return Some(err.code());
    }
    if let Some(err) = cause.downcast_ref::<GatewayError>() {
        return Some(err.code());
    }
    cause.downcast_ref::<ConfigError>().map(ConfigError::code)
}

/// Structured error printed on failure.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
}

impl CliError {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let code = err.chain().find_map(error_code);
        Self {
            error: format!("{err:#}"),
            code: code.map(ErrorCode::code),
            summary: code.map(ErrorCode::message),
            hint: code.and_then(ErrorCode::hint),
        }
    }

    pub fn render(&self, mode: OutputMode) {
        let stderr = io::stderr();
        let mut err = stderr.lock();
        if mode.is_json() {
            let _ = serde_json::to_writer(&mut err, self);
            let _ = writeln!(err);
            return;
        }
        let _ = match (self.code, self.summary) {
            (Some(code), Some(summary)) => {
                writeln!(err, "error[{code}]: {summary}\n  {}", self.error)
            }
            _ => writeln!(err, "error: {}", self.error),
        };
        if let Some(hint) = self.hint {
            let _ = writeln!(err, "hint: {hint}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_wins() {
        assert_eq!(
            resolve_output_mode_inner(true, Some("pretty"), true),
            OutputMode::Json
        );
    }

    #[test]
    fn env_then_tty() {
        assert_eq!(
            resolve_output_mode_inner(false, Some("TEXT"), true),
            OutputMode::Text
        );
        assert_eq!(
            resolve_output_mode_inner(false, Some("bogus"), true),
            OutputMode::Pretty
        );
        assert_eq!(resolve_output_mode_inner(false, None, false), OutputMode::Text);
    }

    #[test]
    fn cli_error_picks_up_config_code() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[timing\n").expect("write");
        let err = icetrip_core::config::load_launch_config(Some(&path)).expect_err("bad toml");

        let rendered = CliError::from_anyhow(&err);
        assert_eq!(rendered.code, Some("E1001"));
        assert_eq!(rendered.summary, Some("Config file parse error"));
        assert_eq!(rendered.hint, ErrorCode::ConfigParseError.hint());
    }

    #[test]
    fn cli_error_picks_up_store_code() {
        let store_err = StoreError::LockTimeout {
            path: "/tmp/x.lock".into(),
            waited: std::time::Duration::from_secs(2),
        };
        let err = anyhow::Error::new(store_err).context("open store");
        let rendered = CliError::from_anyhow(&err);
        assert_eq!(rendered.code, Some("E2003"));
        assert!(rendered.hint.is_some());
        assert!(rendered.error.starts_with("open store"));
    }
}
