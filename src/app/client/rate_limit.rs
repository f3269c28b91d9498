//! Token-bucket request gate
//!
//! Each session owns one limiter. Callers wait in `acquire` until a token is free;
//! nobody is dropped. A session built without a rate limit gets a disabled limiter
//! whose `acquire` returns immediately.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::constants::limits;
use crate::errors::{DownloadError, DownloadResult};

type DirectLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limit settings: one token every `interval`, up to `burst` saved tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_burst() -> u32 {
    limits::DEFAULT_BURST
}

impl RateLimitConfig {
    /// One request per `interval`, no burst
    pub fn per(interval: Duration) -> Self {
        Self {
            interval,
            burst: limits::DEFAULT_BURST,
        }
    }

    fn quota(&self) -> DownloadResult<Quota> {
        let burst = NonZeroU32::new(self.burst).ok_or_else(|| {
            DownloadError::ConfigurationError("Rate limit burst must be non-zero".to_string())
        })?;
        let quota = Quota::with_period(self.interval).ok_or_else(|| {
            DownloadError::ConfigurationError("Rate limit interval must be non-zero".to_string())
        })?;
        Ok(quota.allow_burst(burst))
    }
}

/// Per-session request gate
#[derive(Debug)]
pub struct RateLimiter {
    inner: Option<DirectLimiter>,
}

impl RateLimiter {
    /// Build a limiter; `None` disables limiting
    pub fn new(config: Option<RateLimitConfig>) -> DownloadResult<Self> {
        let inner = match config {
            Some(config) => Some(DirectLimiter::direct(config.quota()?)),
            None => None,
        };
        Ok(Self { inner })
    }

    /// A limiter that never waits
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Whether `acquire` can block
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Wait until one token is available
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::Cancelled` if `cancel` fires while waiting.
    pub async fn acquire(&self, cancel: &CancellationToken) -> DownloadResult<()> {
        let Some(limiter) = &self.inner else {
            return Ok(());
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DownloadError::Cancelled),
            _ = limiter.until_ready() => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_disabled_limiter_is_noop() {
        let limiter = RateLimiter::disabled();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire(&cancel).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
        assert!(!limiter.is_enabled());
    }

    #[test]
    fn test_zero_burst_fails() {
        let config = RateLimitConfig {
            interval: Duration::from_millis(100),
            burst: 0,
        };
        assert!(RateLimiter::new(Some(config)).is_err());
    }

    #[test]
    fn test_zero_interval_fails() {
        let config = RateLimitConfig::per(Duration::ZERO);
        assert!(RateLimiter::new(Some(config)).is_err());
    }

    #[tokio::test]
    async fn test_limiter_spaces_requests() {
        let limiter = RateLimiter::new(Some(RateLimitConfig::per(Duration::from_millis(100))))
            .unwrap();
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire(&cancel).await.unwrap();
        }
        // first token is immediate, the next three wait one interval each
        assert!(start.elapsed() >= Duration::from_millis(280));
    }

    #[tokio::test]
    async fn test_cancelled_while_waiting() {
        let limiter =
            RateLimiter::new(Some(RateLimitConfig::per(Duration::from_secs(60)))).unwrap();
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let waiter_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waiter_cancel.cancel();
        });

        let result = limiter.acquire(&cancel).await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
        handle.await.unwrap();
    }

    #[test]
    fn test_config_deserializes_humantime() {
        let config: RateLimitConfig = toml::from_str("interval = \"500ms\"").unwrap();
        assert_eq!(config.interval, Duration::from_millis(500));
        assert_eq!(config.burst, 1);
    }
}
