//! Core HTTP operations with rate limiting, classification and retry
//!
//! Every request goes through [`HttpHandler::send`]: acquire a rate-limit token,
//! perform the call, classify the outcome, and either return, stop on a fatal
//! verdict, or sleep a linearly growing delay and try again. A throttle verdict
//! adds its cool-down in front of that delay. Every wait ends early on
//! cancellation.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Request, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::classifier::{Attempt, ClassifierChain, ErrorClassifier};
use super::rate_limit::RateLimiter;
use crate::errors::{DownloadError, DownloadResult};

/// Retry settings for one handler
#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub delay_unit: Duration,
}

impl RetrySettings {
    fn backoff(&self, attempt: u32) -> Duration {
        self.delay_unit * (attempt + 1)
    }
}

/// HTTP operations handler with resilience patterns
#[derive(Debug)]
pub struct HttpHandler {
    client: Client,
    rate_limiter: Arc<RateLimiter>,
    classifiers: ClassifierChain,
    retry: RetrySettings,
    cancel: CancellationToken,
}

impl HttpHandler {
    pub fn new(
        client: Client,
        rate_limiter: Arc<RateLimiter>,
        classifiers: ClassifierChain,
        retry: RetrySettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            rate_limiter,
            classifiers,
            retry,
            cancel,
        }
    }

    /// Sends a request built fresh for every attempt
    ///
    /// `build` is called once per attempt because a `reqwest::Request` is consumed by
    /// `execute`. A build error (bad URL, unreplayable body) is returned immediately.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error, or the last retryable error once
    /// `max_attempts` attempts have been made.
    pub async fn send<F>(
        &self,
        extra: &[Arc<dyn ErrorClassifier>],
        mut build: F,
    ) -> DownloadResult<Response>
    where
        F: FnMut(&Client) -> DownloadResult<Request>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry.max_attempts {
            self.rate_limiter.acquire(&self.cancel).await?;

            let request = build(&self.client)?;
            let url = request.url().to_string();
            debug!("Attempt {}/{}: {} {}", attempt, self.retry.max_attempts, request.method(), url);

            let (error, fatal, cooldown) = match self.client.execute(request).await {
                Ok(response) => {
                    let verdict = self
                        .classifiers
                        .classify_with(extra, &Attempt::Response(&response))
                        .await;
                    match verdict.error {
                        None => return Ok(response),
                        Some(error) => (error, verdict.fatal, verdict.cooldown),
                    }
                }
                Err(transport) => {
                    let verdict = self
                        .classifiers
                        .classify_with(extra, &Attempt::Transport(&transport))
                        .await;
                    (
                        verdict.error.unwrap_or(DownloadError::Http(transport)),
                        verdict.fatal,
                        verdict.cooldown,
                    )
                }
            };

            if fatal {
                warn!("Fatal failure for {} on attempt {}: {}", url, attempt, error);
                return Err(if error.is_fatal() {
                    error
                } else {
                    DownloadError::Fatal {
                        source: Box::new(error),
                    }
                });
            }

            if attempt < self.retry.max_attempts {
                if let Some(cooldown) = cooldown {
                    debug!("Cooling down {:?} before retrying {}", cooldown, url);
                    self.sleep(cooldown).await?;
                }
                let delay = self.retry.backoff(attempt);
                warn!(
                    "Request failed (attempt {}/{}): {}. Retrying in {}ms",
                    attempt,
                    self.retry.max_attempts,
                    error,
                    delay.as_millis()
                );
                self.sleep(delay).await?;
            } else {
                error!(
                    "Request to {} failed after {} attempts: {}",
                    url, self.retry.max_attempts, error
                );
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| {
            DownloadError::ConfigurationError("max_retries must be at least 1".to_string())
        }))
    }

    /// Replays a prepared request; the body must be cloneable
    pub async fn execute(
        &self,
        request: Request,
        extra: &[Arc<dyn ErrorClassifier>],
    ) -> DownloadResult<Response> {
        self.send(extra, |_| {
            request
                .try_clone()
                .ok_or_else(|| DownloadError::UnreplayableRequest {
                    url: request.url().to_string(),
                })
        })
        .await
    }

    /// Sleep that wakes early when the run is cancelled
    pub async fn sleep(&self, delay: Duration) -> DownloadResult<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Delay after failed attempt `attempt`; the same schedule is used for downloads
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry.backoff(attempt)
    }

    /// Get a reference to the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Swap the underlying client, keeping limiter and classifiers
    pub fn set_client(&mut self, client: Client) {
        self.client = client;
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn classifiers(&self) -> &ClassifierChain {
        &self.classifiers
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}
