// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates limits and secrets and provides defaults for everything optional
use crate::dispatcher::DispatcherConfig;
use crate::pool::PoolConfig;
use anyhow::{Context, Result};
use redibot_store::ConnectorRegistry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
}

// ─── SlackConfig ────────────────────────────────────────────────

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Bot token (xoxb-...), used for the Web API
    #[serde(default)]
    pub bot_token: String,
    /// App-level token (xapp-...), used to open the Socket Mode connection
    #[serde(default)]
    pub app_token: String,
}

// Custom Debug impl to redact app_token and bot_token
impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("bot_token", &"[REDACTED]")
            .field("app_token", &"[REDACTED]")
            .finish()
    }
}

// ─── StoreConfig ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend type: "redis" or "memory"
    #[serde(rename = "type", default = "default_store_backend")]
    pub backend: String,
    /// Backend-specific options handed to the connector factory
    #[serde(default)]
    pub options: serde_json::Value,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            options: serde_json::Value::Null,
        }
    }
}

fn default_store_backend() -> String {
    "redis".to_string()
}

// ─── PoolSettings ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_active: default_max_active(),
            max_idle: default_max_idle(),
            idle_timeout_secs: default_idle_timeout_secs(),
            dial_timeout_secs: default_dial_timeout_secs(),
            io_timeout_secs: default_io_timeout_secs(),
        }
    }
}

impl PoolSettings {
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_active: self.max_active,
            max_idle: self.max_idle,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            dial_timeout: Duration::from_secs(self.dial_timeout_secs),
            io_timeout: Duration::from_secs(self.io_timeout_secs),
        }
    }
}

fn default_max_active() -> usize {
    500
}

fn default_max_idle() -> usize {
    500
}

fn default_idle_timeout_secs() -> u64 {
    5
}

fn default_dial_timeout_secs() -> u64 {
    300 // 5 minutes
}

fn default_io_timeout_secs() -> u64 {
    300 // 5 minutes
}

// ─── HealthConfig ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_health_host")]
    pub host: String,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_health_host(),
            port: default_health_port(),
        }
    }
}

impl HealthConfig {
    /// "host:port" for binding
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_true() -> bool {
    true
}

fn default_health_host() -> String {
    "0.0.0.0".to_string()
}

fn default_health_port() -> u16 {
    8080
}

// ─── DispatcherSettings ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// Consecutive transport read failures tolerated before giving up
    #[serde(default = "default_max_read_failures")]
    pub max_read_failures: u32,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// User ids allowed to issue commands. Empty allows everyone.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            max_read_failures: default_max_read_failures(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            allowed_users: Vec::new(),
        }
    }
}

impl DispatcherSettings {
    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_read_failures: self.max_read_failures,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            allowed_users: self.allowed_users.clone(),
        }
    }
}

fn default_max_read_failures() -> u32 {
    10
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default config location under the XDG config dir (~/.config/redibot/config.toml)
pub fn default_config_file() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "redibot")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. REDIBOT_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory - for development)
    /// 3. ~/.config/redibot/config.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("REDIBOT_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        default_config_file().filter(|path| path.exists())
    }

    /// Load configuration from the first config file found, with environment overrides
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from `path` (must exist) or, when `None`, from the
    /// search path. Environment overrides are applied and the result validated.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_file(),
        };

        let mut config = match config_path {
            Some(config_path) => {
                tracing::info!(path = %config_path.display(), "Loading configuration from file");
                let content = std::fs::read_to_string(&config_path)
                    .with_context(|| format!("Failed to read {}", config_path.display()))?;
                Self::parse(&content)
                    .with_context(|| format!("Failed to parse {}", config_path.display()))?
            }
            None => {
                tracing::info!("No config file found, using environment variables and defaults");
                Config::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without env overrides or validation
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str::<Config>(content)?)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        // The lowercase name is what older deployments export
        let bot_token = std::env::var("REDIBOT_TOKEN")
            .or_else(|_| std::env::var("redibot_token"))
            .ok();
        if let Some(val) = bot_token {
            self.slack.get_or_insert_with(SlackConfig::default).bot_token = val;
        }
        if let Ok(val) = std::env::var("REDIBOT_APP_TOKEN") {
            self.slack.get_or_insert_with(SlackConfig::default).app_token = val;
        }
        if let Ok(val) = std::env::var("REDIBOT_ALLOWED_USERS") {
            self.dispatcher.allowed_users = split_list(&val);
        }
        if let Ok(val) = std::env::var("REDIBOT_STORE_BACKEND") {
            self.store.backend = val;
        }
        if let Ok(val) = std::env::var("HEALTH_HOST") {
            self.health.host = val;
        }
        if let Ok(val) = std::env::var("HEALTH_PORT") {
            self.health.port = val.parse().with_context(|| {
                format!("HEALTH_PORT must be a valid port number, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("REDIBOT_MAX_READ_FAILURES") {
            self.dispatcher.max_read_failures = val.parse().with_context(|| {
                format!("REDIBOT_MAX_READ_FAILURES must be a valid number, got: {}", val)
            })?;
        }
        Ok(())
    }

    /// Check limits and names that would otherwise fail at runtime
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_active == 0 {
            anyhow::bail!("pool.max_active must be at least 1");
        }
        if self.dispatcher.max_read_failures == 0 {
            anyhow::bail!("dispatcher.max_read_failures must be at least 1");
        }

        let registry = ConnectorRegistry::default();
        let available = registry.available();
        if !available.iter().any(|name| *name == self.store.backend) {
            anyhow::bail!(
                "Unknown store backend '{}'. Available: {}",
                self.store.backend,
                available.join(", ")
            );
        }
        Ok(())
    }

    /// Get the Slack config, returning an error if it is missing or incomplete.
    /// Call sites that run the Slack transport require both tokens.
    pub fn slack_config(&self) -> Result<&SlackConfig> {
        let slack = self.slack.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "Slack configuration is required (set [slack] in config.toml or REDIBOT_TOKEN)"
            )
        })?;
        if slack.bot_token.trim().is_empty() {
            anyhow::bail!(
                "please set the redibot_token (your Slack bot access token) and try again"
            );
        }
        if slack.app_token.trim().is_empty() {
            anyhow::bail!(
                "slack.app_token is required for Socket Mode (set in config.toml or REDIBOT_APP_TOKEN)"
            );
        }
        Ok(slack)
    }
}
