//! Single-file JSON store
//!
//! The whole state is rewritten on every change: serialized, written to a temporary
//! file in the same directory, synced, then renamed over the old file. The file
//! holds account passwords, so on Unix it is created owner read/write only.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{SourceStore, StoreState};
use crate::app::models::{StoredCookie, TrackedSource};
use crate::auth::Credentials;
use crate::errors::{StoreError, StoreResult};

/// Store backed by one JSON file
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonStore {
    /// Open `path`, starting empty if it does not exist yet
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the file cannot be read and
    /// `StoreError::Corrupted` if it is not valid state JSON.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupted {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state file at {}, starting fresh", path.display());
                StoreState::default()
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };

        debug!(
            "Loaded {} tracked source(s) from {}",
            state.sources.len(),
            path.display()
        );
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read<R>(&self, f: impl FnOnce(&StoreState) -> StoreResult<R>) -> StoreResult<R> {
        let state = self.state.lock().await;
        f(&state)
    }

    /// Apply `f` to a copy, persist it, then swap it in
    async fn mutate<R>(
        &self,
        f: impl FnOnce(&mut StoreState) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *state = next;
        Ok(out)
    }

    async fn persist(&self, state: &StoreState) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(state).map_err(|source| StoreError::Corrupted {
            path: self.path.clone(),
            source,
        })?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let mut temp = NamedTempFile::new_in(dir).map_err(io_err)?;
    temp.write_all(bytes).map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        use crate::constants::files::STATE_FILE_PERMISSIONS;
        let perms = std::fs::Permissions::from_mode(STATE_FILE_PERMISSIONS);
        std::fs::set_permissions(temp.path(), perms).map_err(io_err)?;
    }

    temp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[async_trait]
impl SourceStore for JsonStore {
    async fn get_source(&self, key: &str) -> StoreResult<TrackedSource> {
        self.read(|state| state.source(key).cloned()).await
    }

    async fn list_sources(&self) -> StoreResult<Vec<TrackedSource>> {
        self.read(|state| Ok(state.sources.values().cloned().collect()))
            .await
    }

    async fn upsert_source(&self, source: TrackedSource) -> StoreResult<()> {
        self.mutate(|state| {
            state.upsert(source);
            Ok(())
        })
        .await
    }

    async fn remove_source(&self, key: &str) -> StoreResult<bool> {
        self.mutate(|state| Ok(state.sources.remove(key).is_some()))
            .await
    }

    async fn get_cursor(&self, key: &str) -> StoreResult<String> {
        self.read(|state| Ok(state.source(key)?.current_item_cursor.clone()))
            .await
    }

    async fn set_cursor(&self, key: &str, item_id: &str) -> StoreResult<()> {
        self.mutate(|state| {
            state.source_mut(key)?.current_item_cursor = item_id.to_string();
            Ok(())
        })
        .await
    }

    async fn set_complete(&self, key: &str, complete: bool) -> StoreResult<()> {
        self.mutate(|state| {
            state.source_mut(key)?.complete = complete;
            Ok(())
        })
        .await
    }

    async fn touch_checked(&self, key: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.mutate(|state| {
            state.source_mut(key)?.last_checked = Some(at);
            Ok(())
        })
        .await
    }

    async fn get_account(&self, module_key: &str) -> StoreResult<Option<Credentials>> {
        self.read(|state| Ok(state.accounts.get(module_key).cloned()))
            .await
    }

    async fn set_account(&self, module_key: &str, credentials: Credentials) -> StoreResult<()> {
        self.mutate(|state| {
            state.accounts.insert(module_key.to_string(), credentials);
            Ok(())
        })
        .await
    }

    async fn get_cookies(&self, module_key: &str) -> StoreResult<Vec<StoredCookie>> {
        self.read(|state| Ok(state.cookies.get(module_key).cloned().unwrap_or_default()))
            .await
    }

    async fn set_cookies(&self, module_key: &str, cookies: Vec<StoredCookie>) -> StoreResult<()> {
        self.mutate(|state| {
            state.cookies.insert(module_key.to_string(), cookies);
            Ok(())
        })
        .await
    }
}
