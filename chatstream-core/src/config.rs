use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::delta::ProviderFormat;
use crate::model::Message;

/// Per-conversation options.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatOptions {
    /// Endpoint override; `/api/chat` when unset.
    pub api: Option<String>,
    /// Conversation key override; generated when unset.
    pub id: Option<String>,
    pub initial_messages: Vec<Message>,
    pub initial_input: String,
}

pub const DEFAULT_API: &str = "/api/chat";

/// How the endpoint encodes its reply.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Server-sent events carrying provider JSON, ended by `[DONE]`.
    #[default]
    EventStream,
    /// Text that was already assembled upstream.
    PlainText,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EndpointCfg {
    /// Base URL that relative `api` paths are resolved against.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api")]
    pub api: String,
    #[serde(default)]
    pub format: ResponseFormat,
    #[serde(default)]
    pub provider: ProviderFormat,
}

impl Default for EndpointCfg {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api: default_api(),
            format: ResponseFormat::default(),
            provider: ProviderFormat::default(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_api() -> String {
    DEFAULT_API.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds. None = no limit; a stream runs until done or stopped.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: None,
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RelayCfg {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_upstream_base")]
    pub upstream_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable that contains the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for RelayCfg {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            upstream_base: default_upstream_base(),
            model: default_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_upstream_base() -> String {
    "https://api.openai.com".to_string()
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub endpoint: EndpointCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub relay: RelayCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::ChatError::from)?;
        let s =
            std::str::from_utf8(&bytes).map_err(|e| crate::error::ChatError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::ChatError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::ChatError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::ChatError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::ChatError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }
}
