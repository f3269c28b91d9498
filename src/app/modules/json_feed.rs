//! Paginated JSON feed source
//!
//! A feed page looks like
//!
//! ```json
//! {
//!   "items": [{"id": "12", "url": "https://cdn.example/12.png",
//!              "fallback_url": "https://mirror.example/12.png",
//!              "tag": "2024/06", "file_name": "12.png"}],
//!   "next": "?page=2",
//!   "complete": false
//! }
//! ```
//!
//! Pages list items newest first. Discovery walks pages until it meets an item at
//! or before the cursor, then returns everything newer, oldest first. `next` may be
//! relative to the current page.
//!
//! Feeds behind a login take the stored account as a form POST to `/login` on the
//! feed's host; the session cookie it sets is then shared with every egress route.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info, warn};
use url::Url;

use crate::app::client::{BlockingStatusClassifier, ErrorClassifier, Session};
use crate::app::discovery::{skip_deleted, ContentAdapter, Discovery, SourceModule};
use crate::app::egress::EgressSession;
use crate::app::models::{compare_item_ids, QueueItem, TrackedSource};
use crate::app::paths;
use crate::auth::Credentials;
use crate::constants::discovery::MAX_PAGES;
use crate::errors::{
    AuthError, AuthResult, DiscoveryError, DiscoveryResult, DownloadError, DownloadResult,
};

const NOT_FOUND: u16 = 404;
const FORBIDDEN: u16 = 403;
const GONE: u16 = 410;
const UNAUTHORIZED: u16 = 401;
const LOGIN_PATH: &str = "/login";

#[derive(Debug, Deserialize)]
struct FeedPage {
    #[serde(default)]
    items: Vec<FeedItem>,
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    complete: bool,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    url: String,
    #[serde(default)]
    fallback_url: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

impl FeedItem {
    fn into_queue_item(self) -> QueueItem {
        let file_name = self
            .file_name
            .filter(|name| !name.trim().is_empty())
            .or_else(|| file_name_from_url(&self.url))
            .unwrap_or_else(|| self.id.clone());

        let mut item = QueueItem::new(self.id, self.url, file_name);
        if let Some(tag) = self.tag {
            item = item.with_tag(tag);
        }
        if let Some(fallback) = self.fallback_url {
            item = item.with_fallback(fallback);
        }
        item
    }
}

fn login_url(source: &TrackedSource, module_key: &str) -> AuthResult<Url> {
    source.url()?.join(LOGIN_PATH).map_err(|e| AuthError::LoginFailed {
        source_key: module_key.to_string(),
        reason: e.to_string(),
    })
}

fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.last()?;
    (!last.is_empty()).then(|| last.to_string())
}

/// Module for paginated JSON feeds
#[derive(Debug, Default)]
pub struct JsonFeedModule;

impl JsonFeedModule {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceModule for JsonFeedModule {
    fn key(&self) -> &'static str {
        "json_feed"
    }

    fn description(&self) -> &'static str {
        "Paginated JSON feed of downloadable items"
    }

    async fn authenticate(
        &self,
        session: &Session,
        source: &TrackedSource,
        credentials: Option<&Credentials>,
    ) -> AuthResult<()> {
        let Some(credentials) = credentials else {
            return Ok(());
        };

        let login_url = login_url(source, self.key())?;
        let rejected: Vec<Arc<dyn ErrorClassifier>> = vec![Arc::new(
            BlockingStatusClassifier::new([UNAUTHORIZED, FORBIDDEN]),
        )];
        match session
            .post(login_url.as_str(), &credentials.form(), &rejected)
            .await
        {
            Ok(_) => {
                info!("Logged in to {} as {}", login_url, credentials.username);
                Ok(())
            }
            Err(e) => match e.status() {
                Some(status @ (UNAUTHORIZED | FORBIDDEN)) => Err(AuthError::LoginFailed {
                    source_key: self.key().to_string(),
                    reason: format!("credentials rejected with HTTP {}", status),
                }),
                _ => Err(AuthError::Request(e)),
            },
        }
    }

    async fn discover(
        &self,
        session: &Session,
        source: &TrackedSource,
    ) -> DiscoveryResult<Discovery> {
        let mut page_url = source.url()?;
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        let mut exhausted = false;
        let mut pages = 0;

        loop {
            if pages >= MAX_PAGES {
                return Err(DiscoveryError::TooManyPages {
                    url: source.uri.clone(),
                    max_pages: MAX_PAGES,
                });
            }
            pages += 1;

            let body = session.get_text(page_url.as_str(), &[]).await?;
            let page: FeedPage =
                serde_json::from_str(&body).map_err(|e| DiscoveryError::Parse {
                    url: page_url.to_string(),
                    reason: e.to_string(),
                })?;
            exhausted |= page.complete;

            let mut reached_cursor = false;
            for entry in page.items {
                if !source.is_newer(&entry.id) {
                    reached_cursor = true;
                    continue;
                }
                if seen.insert(entry.id.clone()) {
                    items.push(entry.into_queue_item());
                }
            }

            debug!(
                "Feed page {} of {}: {} new item(s) so far",
                pages,
                source.key,
                items.len()
            );

            if reached_cursor {
                break;
            }
            match page.next.filter(|next| !next.is_empty()) {
                Some(next) => {
                    page_url = page_url.join(&next).map_err(|e| DiscoveryError::Parse {
                        url: page_url.to_string(),
                        reason: format!("bad next link '{}': {}", next, e),
                    })?;
                }
                None => break,
            }
        }

        items.sort_by(|a, b| compare_item_ids(&a.item_id, &b.item_id));
        let cursor_hint = items.last().map(|item| item.item_id.clone());

        info!(
            "Discovered {} new item(s) for {} across {} page(s)",
            items.len(),
            source.key,
            pages
        );
        Ok(Discovery {
            items,
            cursor_hint,
            exhausted,
        })
    }

    fn adapter(&self, source: &TrackedSource, download_root: &Path) -> Arc<dyn ContentAdapter> {
        Arc::new(JsonFeedAdapter::new(source.clone(), download_root))
    }
}

/// Downloads feed items, with fallback and deletion handling
#[derive(Debug)]
pub struct JsonFeedAdapter {
    source: TrackedSource,
    root: PathBuf,
    classifiers: Vec<Arc<dyn ErrorClassifier>>,
}

impl JsonFeedAdapter {
    pub fn new(source: TrackedSource, root: &Path) -> Self {
        Self {
            source,
            root: root.to_path_buf(),
            classifiers: vec![Arc::new(BlockingStatusClassifier::new([
                FORBIDDEN, NOT_FOUND, GONE,
            ]))],
        }
    }

    async fn fetch(&self, session: &Session, path: &Path, item: &QueueItem) -> DownloadResult<()> {
        let error = match session
            .download_file(path, &item.file_uri, &self.classifiers)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        match (error.status(), item.fallback_uri.as_deref()) {
            (Some(NOT_FOUND), Some(fallback)) => {
                info!("Item {} not found, trying fallback {}", item.item_id, fallback);
                session
                    .download_file(path, fallback, &self.classifiers)
                    .await
                    .map(|_| ())
                    .map_err(|e| self.map_status(e, item))
            }
            _ => Err(self.map_status(error, item)),
        }
    }

    fn map_status(&self, error: DownloadError, item: &QueueItem) -> DownloadError {
        match error.status() {
            Some(GONE) => DownloadError::DeletedUpstream {
                item_id: item.item_id.clone(),
            },
            Some(FORBIDDEN) => {
                warn!("File link for item {} was refused, treating it as expired", item.item_id);
                DownloadError::LinkExpired {
                    url: item.file_uri.clone(),
                }
            }
            _ => error,
        }
    }
}

#[async_trait]
impl ContentAdapter for JsonFeedAdapter {
    async fn download(&self, session: &EgressSession, item: &QueueItem) -> DownloadResult<()> {
        let path = paths::target_path(&self.root, &self.source, item);
        let result = self.fetch(session.session(), &path, item).await;
        skip_deleted(result, item)
    }
}
