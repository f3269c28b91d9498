//! Retrying HTTP session
//!
//! A [`Session`] is the one capability set every source module talks to: `get`,
//! `post`, `execute` and `download_file`, plus cookie access and egress route
//! switching. Each call is gated by the session's rate limiter and judged by its
//! classifier chain, with optional per-call classifiers layered on top.
//!
//! The module is organized into specialized components:
//! - `config`: client configuration and per-route `reqwest::Client` building
//! - `rate_limit`: token-bucket request gate
//! - `classifier`: failure classification rules and the chain that runs them
//! - `http`: the attempt/classify/back-off loop
//! - `download`: streaming downloads with integrity checks and atomic writes

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Request, Response};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::app::models::{EgressRoute, StoredCookie};
use crate::errors::{DownloadError, DownloadResult};

pub mod classifier;
pub mod config;
pub mod download;
pub mod http;
pub mod rate_limit;

pub use classifier::{
    Attempt, BlockingStatusClassifier, Classification, ClassifierChain, ErrorClassifier,
    StatusClassifier, ThrottleClassifier, TransportBanClassifier,
};
pub use config::ClientConfig;
pub use download::DownloadedFile;
pub use rate_limit::{RateLimitConfig, RateLimiter};

use download::DownloadHandler;
use http::{HttpHandler, RetrySettings};

/// HTTP session bound to one egress route
#[derive(Debug)]
pub struct Session {
    handler: HttpHandler,
    jar: Arc<Jar>,
    config: ClientConfig,
    route: EgressRoute,
    download_root: Option<PathBuf>,
}

/// Builder for [`Session`]
#[derive(Debug)]
pub struct SessionBuilder {
    config: ClientConfig,
    route: EgressRoute,
    classifiers: Vec<Arc<dyn ErrorClassifier>>,
    cancel: CancellationToken,
    download_root: Option<PathBuf>,
    jar: Option<Arc<Jar>>,
}

impl SessionBuilder {
    /// Route for the underlying client; defaults to direct
    pub fn route(mut self, route: EgressRoute) -> Self {
        self.route = route;
        self
    }

    /// Session-level classifiers, run before the generic status rule
    pub fn classifiers(mut self, classifiers: Vec<Arc<dyn ErrorClassifier>>) -> Self {
        self.classifiers = classifiers;
        self
    }

    /// Token that interrupts rate-limit waits and back-off sleeps
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Directories below this root get their times refreshed after downloads
    pub fn download_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.download_root = Some(root.into());
        self
    }

    /// Start from an existing cookie jar instead of an empty one
    pub fn jar(mut self, jar: Arc<Jar>) -> Self {
        self.jar = Some(jar);
        self
    }

    /// # Errors
    ///
    /// Returns `DownloadError::ConfigurationError` for invalid retry or rate limit
    /// settings, or if the client cannot be built for the route.
    pub fn build(self) -> DownloadResult<Session> {
        self.config.validate()?;
        let chain = ClassifierChain::with_defaults(self.classifiers, self.config.throttle_cooldown);
        Session::assemble(
            self.config,
            self.route,
            chain,
            self.cancel,
            self.download_root,
            self.jar.unwrap_or_default(),
        )
    }
}

impl Session {
    pub fn builder(config: ClientConfig) -> SessionBuilder {
        SessionBuilder {
            config,
            route: EgressRoute::Direct,
            classifiers: Vec::new(),
            cancel: CancellationToken::new(),
            download_root: None,
            jar: None,
        }
    }

    /// Direct session with default classifiers
    pub fn new(config: ClientConfig) -> DownloadResult<Self> {
        Self::builder(config).build()
    }

    fn assemble(
        config: ClientConfig,
        route: EgressRoute,
        classifiers: ClassifierChain,
        cancel: CancellationToken,
        download_root: Option<PathBuf>,
        jar: Arc<Jar>,
    ) -> DownloadResult<Self> {
        let client = config.build_http_client(&route, Arc::clone(&jar))?;
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit)?);
        let retry = RetrySettings {
            max_attempts: config.max_retries,
            delay_unit: config.retry_delay_unit,
        };
        let handler = HttpHandler::new(client, rate_limiter, classifiers, retry, cancel);

        debug!("Created session on route {}", route);
        Ok(Self {
            handler,
            jar,
            config,
            route,
            download_root,
        })
    }

    /// A sibling session on another route
    ///
    /// Shares configuration, classifiers and cancellation but gets its own client,
    /// rate limiter and an empty cookie jar; cookies are copied separately.
    pub fn for_route(&self, route: EgressRoute) -> DownloadResult<Self> {
        Self::assemble(
            self.config.clone(),
            route,
            self.handler.classifiers().clone(),
            self.handler.cancellation().clone(),
            self.download_root.clone(),
            Arc::new(Jar::default()),
        )
    }

    /// GET `uri`
    pub async fn get(
        &self,
        uri: &str,
        extra: &[Arc<dyn ErrorClassifier>],
    ) -> DownloadResult<Response> {
        let timeout = self.config.request_timeout;
        self.handler
            .send(extra, |client| {
                client
                    .get(uri)
                    .timeout(timeout)
                    .build()
                    .map_err(|e| invalid_url(uri, e))
            })
            .await
    }

    /// GET `uri` and read the body as text
    pub async fn get_text(
        &self,
        uri: &str,
        extra: &[Arc<dyn ErrorClassifier>],
    ) -> DownloadResult<String> {
        let response = self.get(uri, extra).await?;
        Ok(response.text().await?)
    }

    /// GET `uri` and decode the body as JSON
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        uri: &str,
        extra: &[Arc<dyn ErrorClassifier>],
    ) -> DownloadResult<T> {
        let response = self.get(uri, extra).await?;
        Ok(response.json::<T>().await?)
    }

    /// POST `form` url-encoded to `uri`
    pub async fn post(
        &self,
        uri: &str,
        form: &[(String, String)],
        extra: &[Arc<dyn ErrorClassifier>],
    ) -> DownloadResult<Response> {
        let timeout = self.config.request_timeout;
        self.handler
            .send(extra, |client| {
                client
                    .post(uri)
                    .form(form)
                    .timeout(timeout)
                    .build()
                    .map_err(|e| invalid_url(uri, e))
            })
            .await
    }

    /// Send a prepared request; its body must be cloneable
    pub async fn execute(
        &self,
        request: Request,
        extra: &[Arc<dyn ErrorClassifier>],
    ) -> DownloadResult<Response> {
        self.handler.execute(request, extra).await
    }

    /// Stream `uri` into `destination`
    pub async fn download_file(
        &self,
        destination: &Path,
        uri: &str,
        extra: &[Arc<dyn ErrorClassifier>],
    ) -> DownloadResult<DownloadedFile> {
        DownloadHandler::new(
            &self.handler,
            self.config.max_download_retries,
            self.config.download_timeout,
            self.download_root.as_deref(),
        )
        .download_file(destination, uri, extra)
        .await
    }

    /// Rebuild the client for another route; cookies are kept
    pub fn set_route(&mut self, route: EgressRoute) -> DownloadResult<()> {
        let client = self
            .config
            .build_http_client(&route, Arc::clone(&self.jar))?;
        self.handler.set_client(client);
        debug!("Session switched from {} to {}", self.route, route);
        self.route = route;
        Ok(())
    }

    /// Cookies the jar would send to `url`
    pub fn cookies(&self, url: &Url) -> Vec<StoredCookie> {
        let Some(header) = self.jar.cookies(url) else {
            return Vec::new();
        };
        let Ok(header) = header.to_str() else {
            return Vec::new();
        };
        header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                if name.is_empty() {
                    return None;
                }
                Some(StoredCookie::new(name, value))
            })
            .collect()
    }

    /// Add cookies to the jar as if `url` had set them
    pub fn set_cookies(&self, url: &Url, cookies: &[StoredCookie]) {
        for cookie in cookies {
            self.jar.add_cookie_str(&cookie.to_set_cookie(), url);
        }
    }

    /// Copy cookies for each of `urls` into `other`
    pub fn copy_cookies_to(&self, other: &Session, urls: &[Url]) {
        for url in urls {
            other.set_cookies(url, &self.cookies(url));
        }
    }

    pub fn route(&self) -> &EgressRoute {
        &self.route
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        self.handler.rate_limiter()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.handler.cancellation()
    }

    pub fn download_root(&self) -> Option<&Path> {
        self.download_root.as_deref()
    }
}

fn invalid_url(uri: &str, error: reqwest::Error) -> DownloadError {
    DownloadError::InvalidUrl {
        url: uri.to_string(),
        error: error.to_string(),
    }
}
