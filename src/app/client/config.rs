//! HTTP client configuration and building logic
//!
//! One [`ClientConfig`] describes every session in a pool; the egress route and the
//! cookie jar are supplied separately when each session's `reqwest::Client` is built.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::{Client, Proxy};
use serde::{Deserialize, Serialize};

use super::rate_limit::RateLimitConfig;
use crate::app::models::EgressRoute;
use crate::constants::{http, limits};
use crate::errors::{DownloadError, DownloadResult};

/// Configuration shared by every session of a source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout for get/post/execute calls
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Timeout for one file download attempt, including the body
    #[serde(with = "humantime_serde")]
    pub download_timeout: Duration,
    /// Connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Connection pool idle timeout
    #[serde(with = "humantime_serde")]
    pub pool_idle_timeout: Duration,
    /// Maximum idle connections per host
    pub pool_max_per_host: usize,
    /// User agent sent with every request
    pub user_agent: String,
    /// Attempts per request
    pub max_retries: u32,
    /// Attempts per file download
    pub max_download_retries: u32,
    /// Attempt `n` sleeps `(n + 1)` of these before the next try
    #[serde(with = "humantime_serde")]
    pub retry_delay_unit: Duration,
    /// Cool-down applied on HTTP 429
    #[serde(with = "humantime_serde")]
    pub throttle_cooldown: Duration,
    /// Request gate; `None` disables rate limiting
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: http::DEFAULT_TIMEOUT,
            download_timeout: http::DOWNLOAD_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            pool_idle_timeout: http::POOL_IDLE_TIMEOUT,
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            user_agent: http::USER_AGENT.to_string(),
            max_retries: limits::MAX_RETRIES,
            max_download_retries: limits::MAX_DOWNLOAD_RETRIES,
            retry_delay_unit: limits::RETRY_DELAY_UNIT,
            throttle_cooldown: limits::THROTTLE_COOLDOWN,
            rate_limit: None,
        }
    }
}

impl ClientConfig {
    /// Validate retry counts and limits
    pub fn validate(&self) -> DownloadResult<()> {
        if self.max_retries == 0 {
            return Err(DownloadError::ConfigurationError(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.max_download_retries == 0 {
            return Err(DownloadError::ConfigurationError(
                "max_download_retries must be at least 1".to_string(),
            ));
        }
        if let Some(limit) = &self.rate_limit {
            if limit.burst == 0 || limit.interval.is_zero() {
                return Err(DownloadError::ConfigurationError(
                    "rate limit interval and burst must be non-zero".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Delay before attempt `attempt + 1`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay_unit * (attempt + 1)
    }

    /// Builds the HTTP client for one egress route
    ///
    /// Cookies live in `jar` rather than the client so a session can be rebuilt for
    /// another route without losing its authenticated state.
    pub fn build_http_client(&self, route: &EgressRoute, jar: Arc<Jar>) -> DownloadResult<Client> {
        let mut builder = Client::builder()
            .cookie_provider(jar)
            .connect_timeout(self.connect_timeout)
            .user_agent(&self.user_agent)
            .tcp_nodelay(true)
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_per_host);

        if let EgressRoute::Proxy(proxy) = route {
            let mut resolved = Proxy::all(proxy.address()).map_err(|e| {
                DownloadError::ConfigurationError(format!(
                    "Invalid proxy {}: {}",
                    proxy.address(),
                    e
                ))
            })?;
            if proxy.has_credentials() {
                resolved = resolved.basic_auth(&proxy.username, &proxy.password);
            }
            builder = builder.proxy(resolved);
        }

        builder.build().map_err(DownloadError::Http)
    }
}
