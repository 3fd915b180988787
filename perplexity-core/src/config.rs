//! Configuration for the Perplexity MCP server.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! explicit config file -> environment. CLI flags are applied by the binary on
//! top of the extracted value.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::research::{WaitBounds, WaitOptions};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerplexityConfig {
    pub api: ApiConfig,
    pub research: ResearchConfig,
    pub server: ServerConfig,
}

/// Remote API access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the Perplexity API, without a trailing path.
    pub base_url: String,
    /// API key given directly. Prefer `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Timeout for a single HTTP request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: crate::client::DEFAULT_BASE_URL.to_string(),
            api_key: None,
            api_key_env: "PERPLEXITY_API_KEY".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolve the API key from `api_key` or the `api_key_env` variable.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                std::env::var(&self.api_key_env)
                    .ok()
                    .filter(|k| !k.is_empty())
            })
            .ok_or_else(|| ConfigError::MissingApiKey {
                var: self.api_key_env.clone(),
            })
    }
}

/// Polling policy for async research jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Seconds between status polls while waiting.
    pub poll_interval_secs: u64,
    /// Wait timeout used when the caller gives none (or a non-positive one).
    pub default_wait_secs: u64,
    /// Hard ceiling for any caller-requested wait.
    pub max_wait_secs: u64,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            default_wait_secs: 300,
            max_wait_secs: 600,
        }
    }
}

impl ResearchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn wait_bounds(&self) -> WaitBounds {
        WaitBounds {
            default: Duration::from_secs(self.default_wait_secs),
            max: Duration::from_secs(self.max_wait_secs),
        }
    }

    /// Wait options for a caller-requested timeout in seconds.
    pub fn wait_options(&self, requested_secs: Option<i64>) -> WaitOptions {
        WaitOptions {
            poll_interval: self.poll_interval(),
            timeout: self.wait_bounds().clamp(requested_secs),
        }
    }
}

/// How the MCP server talks to its client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// NDJSON over stdin/stdout.
    #[default]
    Stdio,
    /// JSON-RPC over HTTP POST.
    Http,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Stdio => write!(f, "stdio"),
            TransportMode::Http => write!(f, "http"),
        }
    }
}

impl FromStr for TransportMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(TransportMode::Stdio),
            "http" => Ok(TransportMode::Http),
            other => Err(ConfigError::Invalid {
                message: format!("mode must be 'stdio' or 'http', got: {}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub mode: TransportMode,
    /// Listen address for HTTP mode.
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Stdio,
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl PerplexityConfig {
    /// Check values that would make the server misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(invalid("api.base_url must not be empty"));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(invalid("api.request_timeout_secs must be positive"));
        }
        if self.research.poll_interval_secs == 0 {
            return Err(invalid("research.poll_interval_secs must be positive"));
        }
        if self.research.default_wait_secs == 0 || self.research.max_wait_secs == 0 {
            return Err(invalid("research wait bounds must be positive"));
        }
        if self.research.default_wait_secs > self.research.max_wait_secs {
            return Err(invalid(
                "research.default_wait_secs must not exceed research.max_wait_secs",
            ));
        }
        if self.server.mode == TransportMode::Http && self.server.listen_addr.trim().is_empty() {
            return Err(invalid("server.listen_addr is required in http mode"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid {
        message: message.to_string(),
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `PERPLEXITY_MCP_`, nested with `__`)
/// 2. Explicit config file (`--config`)
/// 3. User config (`~/.config/perplexity-mcp/config.toml`)
/// 4. Built-in defaults
pub fn load_config(config_file: Option<&Path>) -> Result<PerplexityConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(PerplexityConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("ai", "perplexity", "perplexity-mcp") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(ConfigError::Invalid {
                message: format!("configuration file not found: {}", path.display()),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // PERPLEXITY_MCP_SERVER__MODE, PERPLEXITY_MCP_RESEARCH__POLL_INTERVAL_SECS, ...
    figment = figment.merge(Env::prefixed("PERPLEXITY_MCP_").split("__"));

    let config: PerplexityConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
