//! # Remote Secrets Loader
//!
//! Downloads every secret of a Doppler config and keeps the ones matching
//! the config's env prefix, nested with the same `__` convention as
//! environment variables.

use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde_json::Value as JsonValue;

use errors::SourceError;

use crate::env::Env;
use crate::provenance::{Origin, TraceTree};
use crate::registry::{LoadContext, Loaded, Loader};
use crate::value::{Map, Value, bury};

/// Source id the remote secrets loader is registered under.
pub const DOPPLER_SOURCE: &str = "doppler";

/// Variable holding the service token.
pub const DOPPLER_TOKEN_VAR: &str = "DOPPLER_TOKEN";

/// Secrets download endpoint.
pub const DOPPLER_API_URL: &str =
    "https://api.doppler.com/v3/configs/config/secrets/download?format=json";

/// Loader backed by the Doppler secrets-download API.
///
/// Secrets are downloaded afresh on every load.
///
/// # Async Runtimes
/// Requests go through `reqwest::blocking`, which panics when called from
/// inside an async runtime. Hosts running on tokio must load configs that
/// include this source from a blocking context, e.g.
/// `tokio::task::spawn_blocking`.
#[derive(Clone)]
pub struct DopplerLoader {
    token: String,
    endpoint: String,
}

impl std::fmt::Debug for DopplerLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DopplerLoader")
            .field("endpoint", &self.endpoint)
            .field("token", &"***")
            .finish()
    }
}

impl DopplerLoader {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            endpoint: DOPPLER_API_URL.to_string(),
        }
    }

    /// Loader using the token found in `env`.
    pub fn from_env(env: &Env) -> Result<Self, SourceError> {
        env.var(DOPPLER_TOKEN_VAR)
            .filter(|token| !token.is_empty())
            .map(Self::new)
            .ok_or_else(|| SourceError::MissingToken {
                var: DOPPLER_TOKEN_VAR.to_string(),
            })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Every secret of the config, as returned by the API.
    pub fn fetch(&self) -> Result<serde_json::Map<String, JsonValue>, SourceError> {
        let transport = |e: reqwest::Error| SourceError::Transport {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        };

        let response = Client::new()
            .get(&self.endpoint)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json")
            .send()
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().map_err(transport)?;

        if !status.is_success() {
            return Err(SourceError::Remote {
                status: status.as_u16(),
                messages: error_messages(&text),
            });
        }

        match serde_json::from_str(&text) {
            Ok(JsonValue::Object(secrets)) => Ok(secrets),
            Ok(other) => Err(SourceError::Transport {
                endpoint: self.endpoint.clone(),
                reason: format!("expected a JSON object, got {other}"),
            }),
            Err(e) => Err(SourceError::Transport {
                endpoint: self.endpoint.clone(),
                reason: format!("invalid JSON body: {e}"),
            }),
        }
    }
}

fn error_messages(text: &str) -> String {
    let Ok(body) = serde_json::from_str::<JsonValue>(text) else {
        return text.to_string();
    };
    match body.get("messages") {
        Some(JsonValue::Array(messages)) => messages
            .iter()
            .map(|m| m.as_str().map_or_else(|| m.to_string(), str::to_string))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
        None => body.to_string(),
    }
}

impl Loader for DopplerLoader {
    fn load(&self, ctx: &LoadContext) -> Result<Loaded, SourceError> {
        let secrets = self.fetch()?;
        let match_prefix = format!("{}_", ctx.env_prefix.to_lowercase());

        let mut matched: Vec<(String, JsonValue)> = secrets
            .into_iter()
            .filter(|(key, _)| key.to_lowercase().starts_with(&match_prefix))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));

        let mut values = Map::new();
        let mut trace = TraceTree::new();
        for (key, raw) in matched {
            let path: Vec<String> = key.to_lowercase()[match_prefix.len()..]
                .split("__")
                .map(str::to_string)
                .collect();
            let value = Value::from(raw);

            if ctx.tracing_enabled {
                if let Some((last, parents)) = path.split_last() {
                    let origin = Origin::remote(DOPPLER_SOURCE, &self.endpoint, key.as_str());
                    trace.record_value(&value, parents, last, &origin);
                }
            }
            bury(&mut values, &path, value);
        }

        tracing::debug!(keys = values.len(), "Fetched remote secrets");
        if !ctx.tracing_enabled {
            return Ok(values.into());
        }
        Ok(Loaded::traced(values, trace))
    }
}
