//! Source modules: discovery and content adapters
//!
//! A module knows one kind of source. It turns a tracked source into an ordered
//! queue of items newer than the cursor, and supplies the adapter that maps one
//! queue item to the file download(s) performed on an egress session.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use url::Url;

use crate::app::client::{ErrorClassifier, RateLimitConfig, Session};
use crate::app::egress::EgressSession;
use crate::app::models::{QueueItem, TrackedSource};
use crate::auth::Credentials;
use crate::errors::{AuthResult, DiscoveryError, DiscoveryResult, DownloadError, DownloadResult};

/// Output of one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Items strictly newer than the cursor, oldest first
    pub items: Vec<QueueItem>,
    /// Newest item ID seen, if any
    pub cursor_hint: Option<String>,
    /// The source reported that nothing will ever follow
    pub exhausted: bool,
}

/// Downloads one queue item on the session it was assigned
#[async_trait]
pub trait ContentAdapter: Send + Sync {
    async fn download(&self, session: &EgressSession, item: &QueueItem) -> DownloadResult<()>;
}

/// One kind of content source
#[async_trait]
pub trait SourceModule: Send + Sync {
    /// Registry key, also the first path segment under the download root
    fn key(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Session-level classifiers for every request to this source
    fn classifiers(&self) -> Vec<Arc<dyn ErrorClassifier>> {
        Vec::new()
    }

    /// Module default rate limit; configuration may override it
    fn rate_limit(&self) -> Option<RateLimitConfig> {
        None
    }

    fn requires_account(&self) -> bool {
        false
    }

    /// URLs whose cookies are copied onto every egress route
    fn cookie_urls(&self, source: &TrackedSource) -> Vec<Url> {
        source.url().ok().into_iter().collect()
    }

    /// Log the primary session in; the default does nothing
    async fn authenticate(
        &self,
        _session: &Session,
        _source: &TrackedSource,
        _credentials: Option<&Credentials>,
    ) -> AuthResult<()> {
        Ok(())
    }

    /// Items newer than `source.current_item_cursor`, oldest first
    async fn discover(&self, session: &Session, source: &TrackedSource)
        -> DiscoveryResult<Discovery>;

    /// Adapter writing below `download_root`
    fn adapter(&self, source: &TrackedSource, download_root: &Path) -> Arc<dyn ContentAdapter>;
}

/// Lookup from module key to implementation, built once at startup
#[derive(Default, Clone)]
pub struct ModuleRegistry {
    modules: BTreeMap<&'static str, Arc<dyn SourceModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every module shipped with the crate
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::app::modules::JsonFeedModule::new()));
        registry
    }

    /// Add or replace a module under its key
    pub fn register(&mut self, module: Arc<dyn SourceModule>) {
        self.modules.insert(module.key(), module);
    }

    /// # Errors
    ///
    /// Returns `DiscoveryError::UnknownModule` if nothing is registered under `key`.
    pub fn get(&self, key: &str) -> DiscoveryResult<Arc<dyn SourceModule>> {
        self.modules
            .get(key)
            .cloned()
            .ok_or_else(|| DiscoveryError::UnknownModule {
                key: key.to_string(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.modules.contains_key(key)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Arc<dyn SourceModule>> {
        self.modules.values()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.modules.keys()).finish()
    }
}

/// Turns `DeletedUpstream` into a logged skip; every other error passes through
pub fn skip_deleted(result: DownloadResult<()>, item: &QueueItem) -> DownloadResult<()> {
    match result {
        Err(DownloadError::DeletedUpstream { item_id }) => {
            warn!("Skipping item {}: deleted upstream", item_id);
            Ok(())
        }
        Err(DownloadError::Fatal { source })
            if matches!(*source, DownloadError::DeletedUpstream { .. }) =>
        {
            warn!("Skipping item {}: deleted upstream", item.item_id);
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = ModuleRegistry::with_builtin();
        assert!(registry.contains("json_feed"));
        assert!(registry.get("json_feed").is_ok());
        assert!(matches!(
            registry.get("nope"),
            Err(DiscoveryError::UnknownModule { .. })
        ));
        assert_eq!(registry.modules().count(), 1);
    }

    #[test]
    fn test_skip_deleted_only_converts_deleted() {
        let item = QueueItem::new("5", "https://example.com/5.png", "5.png");

        let deleted = Err(DownloadError::DeletedUpstream {
            item_id: "5".to_string(),
        });
        assert!(skip_deleted(deleted, &item).is_ok());

        let wrapped = Err(DownloadError::Fatal {
            source: Box::new(DownloadError::DeletedUpstream {
                item_id: "5".to_string(),
            }),
        });
        assert!(skip_deleted(wrapped, &item).is_ok());

        let other = Err(DownloadError::Status {
            status: 500,
            url: item.file_uri.clone(),
        });
        assert!(skip_deleted(other, &item).is_err());
    }
}
