//! Application settings and configuration management

use crate::backend::http::AdapterOptions;
use crate::backend::traits::{BackendId, RateLimitPolicy};
use crate::error::{AppError, Result};
use crate::queue::dispatcher::DispatcherConfig;
use crate::queue::poller::JobPoller;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
    #[serde(default)]
    pub poller: PollerSettings,
    #[serde(default)]
    pub prompt: PromptSettings,
    #[serde(default)]
    pub backends: Vec<BackendSettings>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration for the HTTP API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_keys: vec![],
        }
    }
}

fn default_true() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Dispatch loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherSettings {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Unset means queued requests wait for a slot indefinitely
    #[serde(default)]
    pub max_queue_residency_ms: Option<u64>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            max_queue_size: default_max_queue_size(),
            max_queue_residency_ms: None,
        }
    }
}

impl DispatcherSettings {
    pub fn to_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            max_queue_size: self.max_queue_size,
            max_queue_residency: self.max_queue_residency_ms.map(Duration::from_millis),
        }
    }
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_max_queue_size() -> usize {
    1000
}

/// Remote job polling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollerSettings {
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl PollerSettings {
    pub fn to_poller(&self) -> JobPoller {
        JobPoller::new(Duration::from_millis(self.interval_ms), self.max_attempts)
    }
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    60
}

/// Prompt enhancement configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PromptSettings {
    /// Appended to every text prompt, before any style preset
    #[serde(default)]
    pub base_enhancement: Option<String>,
}

/// Per-backend configuration. Backends without an entry are registered with defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendSettings {
    pub id: BackendId,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Falls back to the backend's conventional environment variable
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Skip the validation round-trip for the configured key
    #[serde(default = "default_true")]
    pub trust_api_key: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Replaces the backend's declared limit
    #[serde(default)]
    pub rate_limit: Option<RateLimitPolicy>,
}

impl BackendSettings {
    pub fn new(id: BackendId) -> Self {
        Self {
            id,
            enabled: true,
            api_key: None,
            trust_api_key: true,
            base_url: None,
            timeout_ms: default_timeout(),
            rate_limit: None,
        }
    }

    pub fn adapter_options(&self) -> AdapterOptions {
        AdapterOptions {
            base_url: self.base_url.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }

    /// Configured key, else the conventional environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(self.id.credential_env_var()).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

fn default_timeout() -> u64 {
    120000
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("auth.enabled", true)?
            .set_default("dispatcher.tick_interval_ms", 1000)?
            .set_default("poller.interval_ms", 1000)?
            .set_default("poller.max_attempts", 60)?
            .add_source(File::with_name(path.as_ref().to_str().unwrap_or("config/default")).required(false))
            // Environment overrides, e.g. IMAGE_DISPATCH__SERVER__PORT=9000
            .add_source(
                Environment::with_prefix("IMAGE_DISPATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Settings for one backend, or defaults when it has no entry
    pub fn backend(&self, id: BackendId) -> BackendSettings {
        self.backends
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .unwrap_or_else(|| BackendSettings::new(id))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0"));
        }
        if self.dispatcher.tick_interval_ms == 0 {
            return Err(invalid("Dispatcher tick interval must be greater than 0"));
        }
        if self.dispatcher.max_queue_size == 0 {
            return Err(invalid("Dispatcher queue size must be greater than 0"));
        }
        if self.poller.interval_ms == 0 {
            return Err(invalid("Poll interval must be greater than 0"));
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.id) {
                return Err(invalid(&format!("Backend '{}' is configured more than once", backend.id)));
            }
            if let Some(limit) = backend.rate_limit {
                if limit.requests_per_window == 0 || limit.window_ms == 0 || limit.images_per_request == 0 {
                    return Err(invalid(&format!(
                        "Backend '{}' has a rate limit with a zero value",
                        backend.id
                    )));
                }
            }
        }

        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(message.to_string()))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
            dispatcher: DispatcherSettings::default(),
            poller: PollerSettings::default(),
            prompt: PromptSettings::default(),
            backends: vec![],
        }
    }
}
