//! One visit to a tracked source
//!
//! Wires the pieces together: store, module, primary session, login, egress pool,
//! discovery and the coordinator. When signed file links expire mid-run the queue
//! is rediscovered from the committed cursor and drained again, a bounded number
//! of times.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::app::client::{ClientConfig, RateLimitConfig, Session};
use crate::app::coordinator::{CoordinatorConfig, DownloadCoordinator, ItemEvent, RunSummary};
use crate::app::cursor::ProgressCursor;
use crate::app::discovery::{ModuleRegistry, SourceModule};
use crate::app::egress::EgressPool;
use crate::app::models::{EgressRoute, TrackedSource};
use crate::app::paths;
use crate::app::store::SourceStore;
use crate::constants::coordinator::MAX_QUEUE_RESTARTS;
use crate::errors::{AuthError, CoordinatorError, DownloadError, Result};

/// Everything a visit needs besides the source itself
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub download_root: PathBuf,
    pub client: ClientConfig,
    /// Per-module rate limits, overriding module defaults
    pub rate_limits: HashMap<String, RateLimitConfig>,
    /// Egress routes; the first one carries discovery and login
    pub routes: Vec<EgressRoute>,
    pub coordinator: CoordinatorConfig,
    pub max_queue_restarts: u32,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            download_root: PathBuf::from("downloads"),
            client: ClientConfig::default(),
            rate_limits: HashMap::new(),
            routes: vec![EgressRoute::Direct],
            coordinator: CoordinatorConfig::default(),
            max_queue_restarts: MAX_QUEUE_RESTARTS,
        }
    }
}

/// Result of one successful visit
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub source_key: String,
    /// Items found by the last discovery pass
    pub discovered: usize,
    pub summary: RunSummary,
    /// Times the queue was rediscovered after link expiry
    pub restarts: u32,
    /// Discovery reported the source finished
    pub exhausted: bool,
}

/// Visits tracked sources
pub struct SourceProcessor {
    store: Arc<dyn SourceStore>,
    registry: Arc<ModuleRegistry>,
    settings: ProcessorSettings,
    events: Option<mpsc::Sender<ItemEvent>>,
    cancel: CancellationToken,
}

impl SourceProcessor {
    pub fn new(
        store: Arc<dyn SourceStore>,
        registry: Arc<ModuleRegistry>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            store,
            registry,
            settings,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, tx: mpsc::Sender<ItemEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Visit one source: discover new items and download them
    ///
    /// # Errors
    ///
    /// Returns the first error from the store, login, discovery or the coordinator.
    /// The cursor keeps whatever prefix was committed before the failure.
    pub async fn process(&self, key: &str) -> Result<ProcessOutcome> {
        let source = self.store.get_source(key).await?;
        let module = self.registry.get(&source.module_key)?;
        info!("Visiting {} ({})", source.key, module.key());

        let pool = Arc::new(self.build_pool(module.as_ref(), &source).await?);
        let mut coordinator =
            DownloadCoordinator::new(self.settings.coordinator.clone(), Arc::clone(&pool))
                .with_cancellation(self.cancel.clone());
        if let Some(tx) = &self.events {
            coordinator = coordinator.with_events(tx.clone());
        }

        let mut restarts = 0;
        loop {
            let source = self.store.get_source(key).await?;
            let primary = pool
                .primary()
                .ok_or(CoordinatorError::EmptyPool)?
                .session();
            let discovery = module.discover(primary, &source).await?;
            let discovered = discovery.items.len();

            let cursor = ProgressCursor::load(Arc::clone(&self.store), key).await?;
            let adapter = module.adapter(&source, &self.settings.download_root);

            match coordinator.run(discovery.items, adapter, cursor).await {
                Ok(summary) => {
                    if discovery.exhausted {
                        info!("Source {} reports no further items", key);
                        self.store.set_complete(key, true).await?;
                    }
                    self.store.touch_checked(key, Utc::now()).await?;
                    return Ok(ProcessOutcome {
                        source_key: key.to_string(),
                        discovered,
                        summary,
                        restarts,
                        exhausted: discovery.exhausted,
                    });
                }
                Err(e) if link_expired(&e) && restarts < self.settings.max_queue_restarts => {
                    restarts += 1;
                    warn!(
                        "File links for {} expired, rediscovering from the cursor (restart {}/{})",
                        key, restarts, self.settings.max_queue_restarts
                    );
                    pool.reset_all().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Visit every source not marked complete, in key order
    ///
    /// A failing source is logged and does not stop the others.
    pub async fn process_all(&self) -> Result<Vec<(String, Result<ProcessOutcome>)>> {
        let sources = self.store.list_sources().await?;
        let mut results = Vec::new();

        for source in sources.into_iter().filter(|s| !s.complete) {
            if self.cancel.is_cancelled() {
                info!("Cancellation requested, skipping remaining sources");
                break;
            }
            let result = self.process(&source.key).await;
            if let Err(e) = &result {
                error!("Source {} failed ({}): {}", source.key, e.category(), e);
            }
            results.push((source.key, result));
        }

        Ok(results)
    }

    /// Primary session with restored cookies and login, replicated onto every route
    async fn build_pool(
        &self,
        module: &dyn SourceModule,
        source: &TrackedSource,
    ) -> Result<EgressPool> {
        let module_key = module.key();
        let mut config = self.settings.client.clone();
        config.rate_limit = self
            .settings
            .rate_limits
            .get(module_key)
            .copied()
            .or_else(|| module.rate_limit())
            .or(config.rate_limit);

        let route = self
            .settings
            .routes
            .first()
            .cloned()
            .unwrap_or_default();
        let primary = Session::builder(config)
            .route(route)
            .classifiers(module.classifiers())
            .cancellation(self.cancel.clone())
            .download_root(paths::module_root(&self.settings.download_root, module_key))
            .build()?;

        let cookie_urls = module.cookie_urls(source);
        let saved = self.store.get_cookies(module_key).await?;
        if !saved.is_empty() {
            for url in &cookie_urls {
                primary.set_cookies(url, &saved);
            }
        }

        let credentials = self.store.get_account(module_key).await?;
        if module.requires_account() && credentials.is_none() {
            return Err(AuthError::MissingCredentials {
                source_key: module_key.to_string(),
            }
            .into());
        }
        module
            .authenticate(&primary, source, credentials.as_ref())
            .await?;

        if let Some(url) = cookie_urls.first() {
            let cookies = primary.cookies(url);
            if !cookies.is_empty() {
                self.store.set_cookies(module_key, cookies).await?;
            }
        }

        Ok(EgressPool::initialize(
            primary,
            &self.settings.routes,
            &cookie_urls,
        )?)
    }
}

fn link_expired(error: &CoordinatorError) -> bool {
    error
        .download_error()
        .map(|e| matches!(e.root(), DownloadError::LinkExpired { .. }))
        .unwrap_or(false)
}
