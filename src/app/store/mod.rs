//! Persistence of tracked sources, accounts and cookies
//!
//! The coordinator only needs the cursor operations; the processor and the CLI use
//! the rest. Accounts and cookies are keyed by module key since one login covers
//! every source of a site.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::models::{StoredCookie, TrackedSource};
use crate::auth::Credentials;
use crate::errors::{StoreError, StoreResult};

pub mod json;
pub mod memory;

pub use json::JsonStore;
pub use memory::MemoryStore;

/// Repository of tracked-source state
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn get_source(&self, key: &str) -> StoreResult<TrackedSource>;

    /// All sources, ordered by key
    async fn list_sources(&self) -> StoreResult<Vec<TrackedSource>>;

    /// Insert or replace a source
    async fn upsert_source(&self, source: TrackedSource) -> StoreResult<()>;

    /// Returns whether a source was removed
    async fn remove_source(&self, key: &str) -> StoreResult<bool>;

    async fn get_cursor(&self, key: &str) -> StoreResult<String>;

    async fn set_cursor(&self, key: &str, item_id: &str) -> StoreResult<()>;

    async fn set_complete(&self, key: &str, complete: bool) -> StoreResult<()>;

    async fn touch_checked(&self, key: &str, at: DateTime<Utc>) -> StoreResult<()>;

    async fn get_account(&self, module_key: &str) -> StoreResult<Option<Credentials>>;

    async fn set_account(&self, module_key: &str, credentials: Credentials) -> StoreResult<()>;

    async fn get_cookies(&self, module_key: &str) -> StoreResult<Vec<StoredCookie>>;

    async fn set_cookies(&self, module_key: &str, cookies: Vec<StoredCookie>) -> StoreResult<()>;
}

/// Everything a store persists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub sources: BTreeMap<String, TrackedSource>,
    #[serde(default)]
    pub accounts: BTreeMap<String, Credentials>,
    #[serde(default)]
    pub cookies: BTreeMap<String, Vec<StoredCookie>>,
}

impl StoreState {
    pub fn source(&self, key: &str) -> StoreResult<&TrackedSource> {
        self.sources
            .get(key)
            .ok_or_else(|| StoreError::SourceNotFound {
                key: key.to_string(),
            })
    }

    pub fn source_mut(&mut self, key: &str) -> StoreResult<&mut TrackedSource> {
        self.sources
            .get_mut(key)
            .ok_or_else(|| StoreError::SourceNotFound {
                key: key.to_string(),
            })
    }

    pub fn upsert(&mut self, source: TrackedSource) {
        self.sources.insert(source.key.clone(), source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_source_error() {
        let mut state = StoreState::default();
        assert!(matches!(
            state.source("nope"),
            Err(StoreError::SourceNotFound { .. })
        ));
        state.upsert(TrackedSource::new("a", "json_feed", "https://example.com/a"));
        assert!(state.source_mut("a").is_ok());
    }

    #[test]
    fn test_state_tolerates_missing_sections() {
        let state: StoreState = serde_json::from_str("{}").unwrap();
        assert!(state.sources.is_empty());
        assert!(state.accounts.is_empty());
    }
}
