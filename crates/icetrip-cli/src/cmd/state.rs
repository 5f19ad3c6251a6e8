use anyhow::Result;
use icetrip_core::{LaunchConfig, Payload, Store};
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Debug, Serialize)]
pub struct StateView {
    pub url: Option<String>,
    pub mode: Option<String>,
    pub is_new_install: bool,
    pub attribution: Payload,
    pub deeplink: Payload,
    pub perm_given: bool,
    pub perm_blocked: bool,
    pub perm_date: Option<String>,
    pub override_url: Option<String>,
    pub push_token: Option<String>,
}

impl StateView {
    pub fn from_store(store: &Store) -> Self {
        let data = store.load();
        Self {
            url: data.url,
            mode: data.mode,
            is_new_install: data.is_new_install,
            attribution: data.attribution,
            deeplink: data.deeplink,
            perm_given: data.perm_given,
            perm_blocked: data.perm_blocked,
            perm_date: data.perm_date.map(|at| at.to_rfc3339()),
            override_url: store.override_url(),
            push_token: store.push_token(),
        }
    }
}

fn opt(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

pub fn run_state(config: &LaunchConfig, output: OutputMode) -> Result<()> {
    let store = super::open_store(config)?;
    let view = StateView::from_store(&store);
    render_mode(
        output,
        &view,
        |v, w| {
            writeln!(w, "url={}", opt(v.url.as_deref()))?;
            writeln!(w, "mode={}", opt(v.mode.as_deref()))?;
            writeln!(w, "new_install={}", v.is_new_install)?;
            writeln!(w, "attribution_keys={}", v.attribution.len())?;
            writeln!(w, "deeplink_keys={}", v.deeplink.len())?;
            writeln!(w, "perm_given={} perm_blocked={}", v.perm_given, v.perm_blocked)?;
            writeln!(w, "override_url={}", opt(v.override_url.as_deref()))
        },
        |v, w| {
            pretty_section(w, "Launch state")?;
            pretty_kv(w, "Destination", opt(v.url.as_deref()))?;
            pretty_kv(w, "Mode", opt(v.mode.as_deref()))?;
            pretty_kv(w, "New install", v.is_new_install.to_string())?;
            pretty_kv(w, "Override URL", opt(v.override_url.as_deref()))?;
            pretty_kv(w, "Push token", opt(v.push_token.as_deref()))?;
            writeln!(w)?;
            pretty_section(w, "Permission")?;
            pretty_kv(w, "Given", v.perm_given.to_string())?;
            pretty_kv(w, "Blocked", v.perm_blocked.to_string())?;
            pretty_kv(w, "Last asked", opt(v.perm_date.as_deref()))?;
            for (heading, map) in [("Attribution", &v.attribution), ("Deep link", &v.deeplink)] {
                if map.is_empty() {
                    continue;
                }
                writeln!(w)?;
                pretty_section(w, heading)?;
                for (key, value) in map {
                    pretty_kv(w, key, value)?;
                }
            }
            Ok(())
        },
    )
}
