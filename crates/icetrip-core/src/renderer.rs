//! Policy for the embedded destination surface.
//!
//! The surface itself is a collaborator behind [`DestinationRenderer`];
//! this module only owns the redirect-loop guard and cookie persistence.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::{Store, StoreError};

/// Redirect hops tolerated before the chain is treated as a loop.
pub const MAX_REDIRECTS: u32 = 70;

/// What the surface collaborator loads and reports back.
pub trait DestinationRenderer {
    /// Start loading `url`.
    fn load(&mut self, url: &str);
}

/// Guard decision for one navigation callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectAction {
    /// Let the navigation proceed.
    Follow,
    /// Abort and reload this URL.
    Reload(String),
}

/// Counts redirect hops and remembers the last URL that finished loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectGuard {
    hops: u32,
    last_good: Option<String>,
    previous: Option<String>,
}

impl RedirectGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn hops(&self) -> u32 {
        self.hops
    }

    #[must_use]
    pub fn last_good(&self) -> Option<&str> {
        self.last_good.as_deref()
    }

    /// A server redirect to `to` was observed.
    ///
    /// Past [`MAX_REDIRECTS`] hops the counter resets and the last good URL
    /// is reloaded. With no good URL yet the redirect is followed.
    pub fn on_redirect(&mut self, to: &str) -> RedirectAction {
        self.hops += 1;
        if self.hops <= MAX_REDIRECTS {
            return RedirectAction::Follow;
        }
        self.hops = 0;
        match &self.last_good {
            Some(good) => {
                warn!(to, reload = %good, "redirect chain capped; reloading last good URL");
                RedirectAction::Reload(good.clone())
            }
            None => RedirectAction::Follow,
        }
    }

    /// A page finished loading at `url`.
    pub fn on_loaded(&mut self, url: &str) {
        self.hops = 0;
        if self.last_good.as_deref() != Some(url) {
            self.previous = self.last_good.replace(url.to_string());
        }
    }

    /// The surface reported a too-many-redirects error. Reload the URL
    /// before the current one, if known.
    pub fn on_too_many_redirects(&mut self) -> Option<String> {
        self.hops = 0;
        let target = self.previous.clone().or_else(|| self.last_good.clone());
        debug!(target = ?target, "too many redirects");
        target
    }
}

/// One stored cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "/".to_string()
}

/// Named cookie jar persisted through the [`Store`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    #[must_use]
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// Insert or replace by (`name`, `domain`, `path`).
    pub fn set(&mut self, cookie: Cookie) {
        match self.cookies.iter_mut().find(|c| {
            c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path
        }) {
            Some(existing) => *existing = cookie,
            None => self.cookies.push(cookie),
        }
    }

    /// Restore jar `jar_id`; a missing or unreadable jar is empty.
    #[must_use]
    pub fn restore(store: &Store, jar_id: &str) -> Self {
        let Some(raw) = store.cookies(jar_id) else {
            return Self::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(jar_id, error = %err, "discarding unreadable cookie jar");
            Self::default()
        })
    }

    /// Persist this jar under `jar_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the jar cannot be encoded or written.
    pub fn persist(&self, store: &Store, jar_id: &str) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(self).map_err(|source| StoreError::Encode {
            key: crate::store::keys::COOKIE_PREFIX,
            source,
        })?;
        store.save_cookies(jar_id, &encoded)
    }
}
