//! Configuration management for Source Archiver
//!
//! This module provides unified configuration management with automatic
//! first-run initialization, multi-source loading, and zero-config defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::{
    ClientConfig, CoordinatorConfig, EgressRoute, ProcessorSettings, ProxyConfig,
    RateLimitConfig,
};
use crate::constants::{coordinator, env, files, limits, watch};
use crate::errors::{AppError, ConfigError, Result};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP session settings shared by every route
    pub client: ClientConfig,
    /// Request gates
    pub rate_limit: RateLimitSection,
    /// Outbound routes
    pub egress: EgressConfig,
    /// Queue drain settings
    pub coordinator: CoordinatorConfig,
    /// Where files and state live
    pub storage: StorageConfig,
    /// Watch mode
    pub watch: WatchConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Rate limits: a default plus per-module overrides
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RateLimitSection {
    /// Applied to modules without an override or a built-in limit
    pub default: Option<RateLimitConfig>,
    /// Keyed by module key
    pub modules: HashMap<String, RateLimitConfig>,
}

/// Egress routes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    /// Use the direct connection as the first route
    pub include_direct: bool,
    /// Proxy routes, in order
    pub routes: Vec<ProxyConfig>,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            include_direct: true,
            routes: Vec::new(),
        }
    }
}

/// Storage locations; unset paths resolve under the user data directory
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub download_dir: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Time between visits
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: watch::DEFAULT_INTERVAL,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level used when no verbosity flag is given
    pub level: String,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            colored_output: true,
        }
    }
}

impl StorageConfig {
    /// Download root, falling back to `<data_dir>/source-archiver/downloads`
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| default_data_dir().join("downloads"))
    }

    /// State file, falling back to `<data_dir>/source-archiver/state.json`
    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| default_data_dir().join(files::STATE_FILE_NAME))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(files::APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl AppConfig {
    /// Load configuration with multi-source precedence:
    /// 1. Default values
    /// 2. Config file (if exists)
    /// 3. Environment variables
    pub async fn load(config_file_override: Option<PathBuf>) -> Result<Self> {
        let mut config = Self::default();

        let config_path = if let Some(ref path) = config_file_override {
            Some(path.clone())
        } else {
            Self::find_config_file()?
        };

        if let Some(path) = config_path {
            if path.exists() {
                debug!("Loading config from: {}", path.display());
                config = Self::load_from_file(&path).await?;
            } else if config_file_override.is_some() {
                return Err(ConfigError::NotFound { path }.into());
            }
        }

        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `SOURCE_ARCHIVER_*` overrides read through `lookup`
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(env::DOWNLOAD_DIR).filter(|v| !v.is_empty()) {
            debug!("Download directory overridden by {}", env::DOWNLOAD_DIR);
            self.storage.download_dir = Some(PathBuf::from(dir));
        }
        if let Some(file) = lookup(env::STATE_FILE).filter(|v| !v.is_empty()) {
            debug!("State file overridden by {}", env::STATE_FILE);
            self.storage.state_file = Some(PathBuf::from(file));
        }
    }

    /// Reject values that would fail later at run time
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.client
            .validate()
            .map_err(|e| invalid("client", "", e.to_string()))?;

        let limits = self
            .rate_limit
            .default
            .iter()
            .map(|limit| ("rate_limit.default".to_string(), limit))
            .chain(
                self.rate_limit
                    .modules
                    .iter()
                    .map(|(key, limit)| (format!("rate_limit.modules.{}", key), limit)),
            );
        for (field, limit) in limits {
            if limit.burst == 0 {
                return Err(invalid(field, "0", "burst must be at least 1"));
            }
            if limit.interval.is_zero() {
                return Err(invalid(field, "0s", "interval must be non-zero"));
            }
        }

        for (i, proxy) in self.egress.routes.iter().enumerate() {
            if !proxy.enable {
                continue;
            }
            if proxy.host.trim().is_empty() {
                return Err(invalid(
                    format!("egress.routes[{}].host", i),
                    "",
                    "enabled proxies need a host",
                ));
            }
            if proxy.port == 0 {
                return Err(invalid(
                    format!("egress.routes[{}].port", i),
                    "0",
                    "enabled proxies need a port",
                ));
            }
        }
        if self.routes().is_empty() {
            return Err(invalid(
                "egress",
                "",
                "include_direct is off and no proxy route is enabled",
            ));
        }

        self.coordinator
            .validate()
            .map_err(|reason| invalid("coordinator", "", reason))?;
        if self.watch.interval.is_zero() {
            return Err(invalid("watch.interval", "0s", "interval must be non-zero"));
        }
        Ok(())
    }

    /// Egress routes in pool order: direct first when included, then enabled proxies
    pub fn routes(&self) -> Vec<EgressRoute> {
        let direct = self.egress.include_direct.then_some(EgressRoute::Direct);
        direct
            .into_iter()
            .chain(
                self.egress
                    .routes
                    .iter()
                    .filter(|proxy| proxy.enable)
                    .cloned()
                    .map(EgressRoute::Proxy),
            )
            .collect()
    }

    /// Convert to the settings the source processor runs with
    pub fn to_processor_settings(&self) -> ProcessorSettings {
        let mut client = self.client.clone();
        if self.rate_limit.default.is_some() {
            client.rate_limit = self.rate_limit.default;
        }

        ProcessorSettings {
            download_root: self.storage.download_dir(),
            client,
            rate_limits: self.rate_limit.modules.clone(),
            routes: self.routes(),
            coordinator: self.coordinator.clone(),
            max_queue_restarts: coordinator::MAX_QUEUE_RESTARTS,
        }
    }

    /// Initialize configuration on first run
    ///
    /// Creates a default config file if none exists and notifies the user
    pub async fn initialize_first_run() -> Result<Option<PathBuf>> {
        let config_path = Self::get_default_config_path()?;

        if config_path.exists() {
            return Ok(Some(config_path));
        }

        info!("Creating default configuration file...");
        Self::write_default_config(&config_path).await?;

        println!("📁 Created default configuration file:");
        println!("   {}", config_path.display());
        println!("   You can customize settings by editing this file.");
        println!();

        Ok(Some(config_path))
    }

    /// Write the commented default configuration to `path`
    pub async fn write_default_config(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tokio::fs::write(path, Self::generate_default_config_content())
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(())
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Result<Option<PathBuf>> {
        let search_paths = vec![
            PathBuf::from("./source-archiver.toml"),
            PathBuf::from("./config.toml"),
            Self::get_default_config_path()?,
        ];

        for path in search_paths {
            if path.exists() {
                debug!("Found config file: {}", path.display());
                return Ok(Some(path));
            }
        }

        debug!("No config file found in standard locations");
        Ok(None)
    }

    /// Get the default config file path for the current user
    pub fn get_default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::generic("Could not determine user config directory"))?;

        Ok(config_dir.join(files::APP_DIR_NAME).join("config.toml"))
    }

    /// Load configuration from a TOML file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let config: AppConfig = toml::from_str(&content).map_err(ConfigError::InvalidFormat)?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Generate default configuration content with helpful comments
    fn generate_default_config_content() -> String {
        let data_dir = default_data_dir();

        format!(
            r#"# Source Archiver Configuration
# This file was automatically generated on first run.
# You can customize any of these settings to suit your needs.
# Durations accept values like "500ms", "30s", "10m" or "1h".

[client]
request_timeout = "30s"
download_timeout = "10m"
connect_timeout = "30s"
pool_idle_timeout = "90s"
pool_max_per_host = 8
# Attempts per page/API request and per file download
max_retries = {max_retries}
max_download_retries = {max_download_retries}
# Attempt n waits (n + 1) units before the next try
retry_delay_unit = "1s"
# Pause applied when a server answers 429
throttle_cooldown = "60s"

[rate_limit]
# Applied to every module without its own limit (unset = unlimited)
# default = {{ interval = "500ms", burst = 1 }}

# Per-module overrides
# [rate_limit.modules.json_feed]
# interval = "1s"
# burst = 2

[egress]
# Use the direct connection as the first route
include_direct = true

# Extra routes; each one adds a session to the pool
# [[egress.routes]]
# enable = true
# host = "127.0.0.1"
# port = 1080
# type = "socks5"  # http, https (default) or socks5
# username = ""
# password = ""

[coordinator]
# "multi_egress" spreads items over every route; "simple" downloads one at a time
mode = "multi_egress"
poll_interval = "100ms"

[storage]
# Defaults: {downloads}
#           {state}
# download_dir = "/path/to/archive"
# state_file = "/path/to/state.json"

[watch]
# Time between visits with `run --watch`
interval = "1h"

[logging]
level = "warn"  # error, warn, info, debug, trace
colored_output = true
"#,
            max_retries = limits::MAX_RETRIES,
            max_download_retries = limits::MAX_DOWNLOAD_RETRIES,
            downloads = data_dir.join("downloads").display(),
            state = data_dir.join(files::STATE_FILE_NAME).display(),
        )
    }
}

fn invalid(
    field: impl Into<String>,
    value: impl Into<String>,
    reason: impl Into<String>,
) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        value: value.into(),
        reason: reason.into(),
    }
}
