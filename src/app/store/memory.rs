//! In-memory store for tests and embedding

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{SourceStore, StoreState};
use crate::app::models::{StoredCookie, TrackedSource};
use crate::auth::Credentials;
use crate::errors::StoreResult;

/// Store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `sources`
    pub fn with_sources(sources: impl IntoIterator<Item = TrackedSource>) -> Self {
        let mut state = StoreState::default();
        for source in sources {
            state.upsert(source);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> StoreState {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn get_source(&self, key: &str) -> StoreResult<TrackedSource> {
        self.state.read().await.source(key).cloned()
    }

    async fn list_sources(&self) -> StoreResult<Vec<TrackedSource>> {
        Ok(self.state.read().await.sources.values().cloned().collect())
    }

    async fn upsert_source(&self, source: TrackedSource) -> StoreResult<()> {
        self.state.write().await.upsert(source);
        Ok(())
    }

    async fn remove_source(&self, key: &str) -> StoreResult<bool> {
        Ok(self.state.write().await.sources.remove(key).is_some())
    }

    async fn get_cursor(&self, key: &str) -> StoreResult<String> {
        Ok(self
            .state
            .read()
            .await
            .source(key)?
            .current_item_cursor
            .clone())
    }

    async fn set_cursor(&self, key: &str, item_id: &str) -> StoreResult<()> {
        self.state.write().await.source_mut(key)?.current_item_cursor = item_id.to_string();
        Ok(())
    }

    async fn set_complete(&self, key: &str, complete: bool) -> StoreResult<()> {
        self.state.write().await.source_mut(key)?.complete = complete;
        Ok(())
    }

    async fn touch_checked(&self, key: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.state.write().await.source_mut(key)?.last_checked = Some(at);
        Ok(())
    }

    async fn get_account(&self, module_key: &str) -> StoreResult<Option<Credentials>> {
        Ok(self.state.read().await.accounts.get(module_key).cloned())
    }

    async fn set_account(&self, module_key: &str, credentials: Credentials) -> StoreResult<()> {
        self.state
            .write()
            .await
            .accounts
            .insert(module_key.to_string(), credentials);
        Ok(())
    }

    async fn get_cookies(&self, module_key: &str) -> StoreResult<Vec<StoredCookie>> {
        Ok(self
            .state
            .read()
            .await
            .cookies
            .get(module_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_cookies(&self, module_key: &str, cookies: Vec<StoredCookie>) -> StoreResult<()> {
        self.state
            .write()
            .await
            .cookies
            .insert(module_key.to_string(), cookies);
        Ok(())
    }
}
