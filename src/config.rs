//! Application configuration.
//!
//! Read from the YAML file named by `TRICKLE_CONFIG` (default
//! `trickle.yaml`). Every section and field has a default, so a missing
//! file or a partial one is fine. `LISTEN` overrides the listen address.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::http::client::{ClientOptions, FramingPolicy};

pub const CONFIG_ENV: &str = "TRICKLE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "trickle.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub proxy: Option<ProxyConfig>,
    pub timezone: TimezoneConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Directory served by the static file handler.
    pub static_root: PathBuf,
    pub settings_path: PathBuf,
    /// Entries kept by the in-memory log ring.
    pub log_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:80".to_string(),
            static_root: PathBuf::from("www"),
            settings_path: PathBuf::from("settings.json"),
            log_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Require `HTTP/1.1` in upstream status lines.
    pub strict_version: bool,
    pub framing: FramingPolicy,
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            strict_version: false,
            framing: FramingPolicy::Lenient,
            connect_timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    pub fn options(&self) -> ClientOptions {
        ClientOptions {
            strict_version: self.strict_version,
            framing: self.framing,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

/// Forward proxy route. Absent means no proxy is mounted.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_route")]
    pub route: String,
    /// Upstream URL; the query parameter is appended to it.
    pub upstream: String,
    /// Name of the caller's query parameter to forward.
    #[serde(default = "default_query_param")]
    pub query_param: String,
}

fn default_proxy_route() -> String {
    "/proxy".to_string()
}

fn default_query_param() -> String {
    "q".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimezoneConfig {
    pub enabled: bool,
    pub url: String,
    pub interval_secs: u64,
    pub backoff_secs: u64,
}

impl Default for TimezoneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://worldtimeapi.org/api/ip".to_string(),
            interval_secs: 3600,
            backoff_secs: 30,
        }
    }
}

impl TimezoneConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut cfg = match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_yaml_str(&text).with_context(|| format!("parsing {path}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path, "no config file, using defaults");
                Self::default()
            }
            Err(e) => return Err(e).with_context(|| format!("reading {path}")),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.server.listen_addr = listen_addr;
        }
        Ok(cfg)
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Self = serde_yaml::from_str(text)?;
        Ok(cfg)
    }
}
