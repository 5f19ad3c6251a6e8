//! Blocking `ureq` transport run on tokio's blocking pool.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::{GatewayError, RemoteGateway, is_live_marker};
use crate::config::LaunchConfig;
use crate::event::{Payload, coerce_payload};
use crate::store::Store;

/// Metadata merged into every destination request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationMeta {
    pub os: String,
    pub af_id: String,
    pub bundle_id: String,
    pub firebase_project_id: String,
    pub store_id: String,
    pub push_token: Option<String>,
    pub locale: String,
}

/// Attribution map plus metadata. Metadata keys overwrite attribution keys
/// of the same name; `push_token` is omitted when unknown.
#[must_use]
pub fn build_destination_body(attribution: &Payload, meta: &DestinationMeta) -> Value {
    let mut body: Map<String, Value> = attribution
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    body.insert("os".into(), Value::String(meta.os.clone()));
    body.insert("af_id".into(), Value::String(meta.af_id.clone()));
    body.insert("bundle_id".into(), Value::String(meta.bundle_id.clone()));
    body.insert(
        "firebase_project_id".into(),
        Value::String(meta.firebase_project_id.clone()),
    );
    body.insert("store_id".into(), Value::String(meta.store_id.clone()));
    if let Some(token) = &meta.push_token {
        body.insert("push_token".into(), Value::String(token.clone()));
    }
    body.insert("locale".into(), Value::String(meta.locale.clone()));
    Value::Object(body)
}

#[derive(Debug, Deserialize)]
struct DestinationResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    url: Option<String>,
}

/// Live gateway over HTTP.
pub struct HttpGateway {
    agent: ureq::Agent,
    config_url: url::Url,
    attribution_url: url::Url,
    liveness_url: url::Url,
    dev_key: String,
    user_agent: String,
    meta: DestinationMeta,
    store: Arc<Store>,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("config_url", &self.config_url.as_str())
            .field("attribution_url", &self.attribution_url.as_str())
            .field("liveness_url", &self.liveness_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpGateway {
    /// Build a gateway from config. `device_id` is the persisted
    /// attribution id; the push token is read from `store` per request.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::BadUrl`] if any configured endpoint does not
    /// parse.
    pub fn new(
        config: &LaunchConfig,
        device_id: String,
        store: Arc<Store>,
    ) -> Result<Self, GatewayError> {
        let parse = |raw: &str| url::Url::parse(raw).map_err(|_| GatewayError::BadUrl(raw.into()));
        let config_url = parse(&config.endpoints.config_url)?;
        let liveness_url = parse(&config.endpoints.liveness_url)?;
        let base = config.endpoints.attribution_base_url.trim_end_matches('/');
        let attribution_url = parse(&format!(
            "{base}/install_data/v4.0/id{}",
            config.app.app_id
        ))?;

        let agent = ureq::AgentBuilder::new()
            .timeout(config.timing.request_timeout())
            .build();

        Ok(Self {
            agent,
            config_url,
            attribution_url,
            liveness_url,
            dev_key: config.app.dev_key.clone(),
            user_agent: config.app.user_agent.clone(),
            meta: DestinationMeta {
                os: config.app.platform.clone(),
                af_id: device_id,
                bundle_id: config.app.bundle_id.clone(),
                firebase_project_id: config.app.sender_id.clone(),
                store_id: format!("id{}", config.app.app_id),
                push_token: None,
                locale: config.app.locale.clone(),
            },
            store,
        })
    }

    /// Request metadata with the current push token.
    #[must_use]
    pub fn destination_meta(&self) -> DestinationMeta {
        DestinationMeta {
            push_token: self.store.push_token(),
            ..self.meta.clone()
        }
    }
}

fn map_ureq(err: ureq::Error) -> GatewayError {
    match err {
        ureq::Error::Status(429, _) => GatewayError::RateLimited,
        ureq::Error::Status(status, _) => GatewayError::Status { status },
        ureq::Error::Transport(transport) => GatewayError::Transport(transport.to_string()),
    }
}

async fn blocking<T, F>(work: F) -> Result<T, GatewayError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, GatewayError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|join| GatewayError::Transport(format!("request task failed: {join}")))?
}

fn read_json(response: ureq::Response) -> Result<Value, GatewayError> {
    response
        .into_json::<Value>()
        .map_err(|e| GatewayError::Decode(e.to_string()))
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    #[instrument(skip(self), fields(url = %self.liveness_url))]
    async fn check_liveness(&self) -> Result<bool, GatewayError> {
        let agent = self.agent.clone();
        let url = self.liveness_url.clone();
        let value = blocking(move || {
            let response = agent.get(url.as_str()).call().map_err(map_ureq)?;
            read_json(response)
        })
        .await?;
        let live = is_live_marker(&value);
        debug!(live, "liveness document read");
        Ok(live)
    }

    #[instrument(skip(self))]
    async fn pull_attribution(&self, device_id: &str) -> Result<Payload, GatewayError> {
        let agent = self.agent.clone();
        let url = self.attribution_url.clone();
        let dev_key = self.dev_key.clone();
        let device_id = device_id.to_string();
        let value = blocking(move || {
            let response = agent
                .get(url.as_str())
                .query("devkey", &dev_key)
                .query("device_id", &device_id)
                .set("Accept", "application/json")
                .call()
                .map_err(map_ureq)?;
            read_json(response)
        })
        .await?;

        value
            .as_object()
            .map(coerce_payload)
            .ok_or_else(|| GatewayError::Decode("attribution body is not an object".into()))
    }

    #[instrument(skip(self, attribution), fields(keys = attribution.len()))]
    async fn fetch_destination(&self, attribution: &Payload) -> Result<String, GatewayError> {
        let body = build_destination_body(attribution, &self.destination_meta());
        let agent = self.agent.clone();
        let url = self.config_url.clone();
        let user_agent = self.user_agent.clone();
        let response: DestinationResponse = blocking(move || {
            let response = agent
                .post(url.as_str())
                .set("Content-Type", "application/json")
                .set("User-Agent", &user_agent)
                .send_json(body)
                .map_err(map_ureq)?;
            response
                .into_json::<DestinationResponse>()
                .map_err(|e| GatewayError::Decode(e.to_string()))
        })
        .await?;

        match response {
            DestinationResponse {
                ok: true,
                url: Some(url),
            } if !url.is_empty() => Ok(url),
            DestinationResponse { ok, .. } => Err(GatewayError::Decode(format!(
                "destination response not usable (ok={ok})"
            ))),
        }
    }
}
