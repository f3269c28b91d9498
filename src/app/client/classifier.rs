//! Failure classification for session requests
//!
//! After every attempt the session runs a chain of classifiers over the outcome. Each
//! classifier may produce a normalized error and may mark the outcome fatal. The chain
//! stops at the first classifier that produces an error; the fatal flag is the OR of
//! every classifier that ran.
//!
//! Per-call classifiers run before the session defaults, and the generic
//! [`StatusClassifier`] always runs last, so a specific rule (a blocking status, a
//! throttle signal) wins over the generic "any status >= 400 is retryable" rule.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Response;
use tracing::warn;

use crate::constants::limits;
use crate::errors::DownloadError;

/// Outcome of one network call
#[derive(Debug)]
pub enum Attempt<'a> {
    /// A response was received (any status)
    Response(&'a Response),
    /// No response; the transport failed
    Transport(&'a reqwest::Error),
}

impl Attempt<'_> {
    /// Status code, if a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Attempt::Response(response) => Some(response.status().as_u16()),
            Attempt::Transport(_) => None,
        }
    }

    /// URL the attempt was made against
    pub fn url(&self) -> String {
        match self {
            Attempt::Response(response) => response.url().to_string(),
            Attempt::Transport(error) => error
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "<unknown>".to_string()),
        }
    }
}

/// Verdict of one classifier
#[derive(Debug, Default)]
pub struct Classification {
    pub error: Option<DownloadError>,
    pub fatal: bool,
    /// Pause the session observes before the next attempt
    pub cooldown: Option<Duration>,
}

impl Classification {
    /// Nothing wrong as far as this classifier can tell
    pub fn pass() -> Self {
        Self::default()
    }

    /// Error worth another attempt
    pub fn retry(error: DownloadError) -> Self {
        Self {
            error: Some(error),
            fatal: false,
            cooldown: None,
        }
    }

    /// Retryable error that asks the session to back off for `cooldown` first
    pub fn throttled(error: DownloadError, cooldown: Duration) -> Self {
        Self {
            error: Some(error),
            fatal: false,
            cooldown: Some(cooldown),
        }
    }

    /// Error that ends the retry loop
    pub fn fatal(error: DownloadError) -> Self {
        Self {
            error: Some(error),
            fatal: true,
            cooldown: None,
        }
    }
}

/// Decides whether an attempt succeeded, should be retried, or must stop
#[async_trait]
pub trait ErrorClassifier: Send + Sync + fmt::Debug {
    async fn classify(&self, attempt: &Attempt<'_>) -> Classification;
}

/// Ordered set of classifiers
#[derive(Debug, Clone, Default)]
pub struct ClassifierChain {
    classifiers: Vec<Arc<dyn ErrorClassifier>>,
}

impl ClassifierChain {
    pub fn new(classifiers: Vec<Arc<dyn ErrorClassifier>>) -> Self {
        Self { classifiers }
    }

    /// Session defaults: the given rules followed by the generic status rule
    pub fn with_defaults(classifiers: Vec<Arc<dyn ErrorClassifier>>, cooldown: Duration) -> Self {
        let mut all = classifiers;
        all.push(Arc::new(StatusClassifier::new(cooldown)));
        Self::new(all)
    }

    pub fn len(&self) -> usize {
        self.classifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classifiers.is_empty()
    }

    /// Run `extra` first, then this chain
    pub async fn classify_with(
        &self,
        extra: &[Arc<dyn ErrorClassifier>],
        attempt: &Attempt<'_>,
    ) -> Classification {
        let mut fatal = false;
        for classifier in extra.iter().chain(self.classifiers.iter()) {
            let verdict = classifier.classify(attempt).await;
            fatal |= verdict.fatal;
            if let Some(error) = verdict.error {
                return Classification {
                    error: Some(error),
                    fatal,
                    cooldown: verdict.cooldown,
                };
            }
        }
        Classification {
            error: None,
            fatal,
            cooldown: None,
        }
    }

    pub async fn classify(&self, attempt: &Attempt<'_>) -> Classification {
        self.classify_with(&[], attempt).await
    }
}

/// Generic status rule
///
/// Status < 400 passes, 429 asks for the cool-down and returns a retryable
/// `Throttled`, anything else >= 400 is a retryable `Status`. Transport errors pass
/// through untouched; the session keeps the original error in that case.
#[derive(Debug, Clone)]
pub struct StatusClassifier {
    cooldown: Duration,
}

impl StatusClassifier {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }
}

impl Default for StatusClassifier {
    fn default() -> Self {
        Self::new(limits::THROTTLE_COOLDOWN)
    }
}

#[async_trait]
impl ErrorClassifier for StatusClassifier {
    async fn classify(&self, attempt: &Attempt<'_>) -> Classification {
        let Some(status) = attempt.status() else {
            return Classification::pass();
        };
        if status < 400 {
            return Classification::pass();
        }

        let url = attempt.url();
        if status == limits::THROTTLE_STATUS {
            warn!(
                "Throttled by server (HTTP {}) at {}; cooling down for {:?}",
                status, url, self.cooldown
            );
            return Classification::throttled(
                DownloadError::Throttled { status, url },
                self.cooldown,
            );
        }

        Classification::retry(DownloadError::Status { status, url })
    }
}

/// Statuses that mean "stop, this will never work"
#[derive(Debug, Clone)]
pub struct BlockingStatusClassifier {
    statuses: BTreeSet<u16>,
}

impl BlockingStatusClassifier {
    pub fn new(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ErrorClassifier for BlockingStatusClassifier {
    async fn classify(&self, attempt: &Attempt<'_>) -> Classification {
        match attempt.status() {
            Some(status) if status >= 400 && self.statuses.contains(&status) => {
                Classification::fatal(DownloadError::Blocked {
                    status,
                    url: attempt.url(),
                })
            }
            _ => Classification::pass(),
        }
    }
}

/// Source-specific throttling statuses (for example 503 used as "slow down")
#[derive(Debug, Clone)]
pub struct ThrottleClassifier {
    statuses: BTreeSet<u16>,
    cooldown: Duration,
}

impl ThrottleClassifier {
    pub fn new(statuses: impl IntoIterator<Item = u16>, cooldown: Duration) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            cooldown,
        }
    }
}

#[async_trait]
impl ErrorClassifier for ThrottleClassifier {
    async fn classify(&self, attempt: &Attempt<'_>) -> Classification {
        match attempt.status() {
            Some(status) if status >= 400 && self.statuses.contains(&status) => {
                let url = attempt.url();
                warn!(
                    "Throttle signal HTTP {} from {}; cooling down for {:?}",
                    status, url, self.cooldown
                );
                Classification::throttled(DownloadError::Throttled { status, url }, self.cooldown)
            }
            _ => Classification::pass(),
        }
    }
}

/// Predicate deciding whether a transport error means the route is banned
pub type BanPredicate = dyn Fn(&reqwest::Error) -> bool + Send + Sync;

/// Marks matching transport errors as a ban of the whole egress route
pub struct TransportBanClassifier {
    reason: String,
    predicate: Box<BanPredicate>,
}

impl TransportBanClassifier {
    pub fn new(
        reason: impl Into<String>,
        predicate: impl Fn(&reqwest::Error) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            reason: reason.into(),
            predicate: Box::new(predicate),
        }
    }

    /// Treat refused connections as a ban; typical for firewalled proxy exits
    pub fn connection_refused() -> Self {
        Self::new("connection refused", |e| {
            e.is_connect() && error_chain_contains(e, "refused")
        })
    }
}

impl fmt::Debug for TransportBanClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportBanClassifier")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ErrorClassifier for TransportBanClassifier {
    async fn classify(&self, attempt: &Attempt<'_>) -> Classification {
        match attempt {
            Attempt::Transport(error) if (self.predicate)(error) => {
                Classification::fatal(DownloadError::EgressBanned {
                    reason: format!("{} ({})", self.reason, attempt.url()),
                })
            }
            _ => Classification::pass(),
        }
    }
}

/// Whether any error in the source chain mentions `needle` (case-insensitive)
fn error_chain_contains(error: &(dyn std::error::Error + 'static), needle: &str) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if err.to_string().to_ascii_lowercase().contains(needle) {
            return true;
        }
        current = err.source();
    }
    false
}
