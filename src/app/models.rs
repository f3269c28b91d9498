//! Data models for Source Archiver
//!
//! This module defines the core data structures shared by discovery, the egress pool,
//! the coordinator and the persistence layer: queued items, tracked sources, proxy
//! routes and stored cookies.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::DIRECT_ROUTE;
use crate::errors::{DownloadError, DownloadResult};

/// One downloadable item produced by discovery
///
/// Items are immutable once queued. The coordinator only relies on their position in
/// the queue; `item_id` is what gets written to the persisted cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Opaque ID, monotonically comparable within one source
    pub item_id: String,
    /// Primary download location
    pub file_uri: String,
    /// Alternate location used when the primary is gone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_uri: Option<String>,
    /// Logical sub-path below the source folder
    #[serde(default)]
    pub download_tag: String,
    /// Target file name
    pub file_name: String,
}

impl QueueItem {
    /// Create an item without fallback or tag
    pub fn new(
        item_id: impl Into<String>,
        file_uri: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            file_uri: file_uri.into(),
            fallback_uri: None,
            download_tag: String::new(),
            file_name: file_name.into(),
        }
    }

    /// Set the download tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.download_tag = tag.into();
        self
    }

    /// Set the fallback URI
    pub fn with_fallback(mut self, uri: impl Into<String>) -> Self {
        self.fallback_uri = Some(uri.into());
        self
    }
}

/// A remote location watched for new content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSource {
    /// Key the source is stored under
    pub key: String,
    /// Listing location handed to discovery
    pub uri: String,
    /// ID of the last durably downloaded item; empty means no progress yet
    #[serde(default)]
    pub current_item_cursor: String,
    /// Folder below the module directory
    #[serde(default)]
    pub sub_folder: String,
    /// Set once discovery reports the source is exhausted
    #[serde(default)]
    pub complete: bool,
    /// Key of the module that knows how to read this source
    pub module_key: String,
    /// Time of the last visit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
}

impl TrackedSource {
    /// Create a source with no progress
    pub fn new(
        key: impl Into<String>,
        module_key: impl Into<String>,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            uri: uri.into(),
            current_item_cursor: String::new(),
            sub_folder: String::new(),
            complete: false,
            module_key: module_key.into(),
            last_checked: None,
        }
    }

    /// Set the sub folder
    pub fn with_sub_folder(mut self, sub_folder: impl Into<String>) -> Self {
        self.sub_folder = sub_folder.into();
        self
    }

    /// Whether any item has been committed yet
    pub fn has_progress(&self) -> bool {
        !self.current_item_cursor.is_empty()
    }

    /// Whether `item_id` is newer than the persisted cursor
    pub fn is_newer(&self, item_id: &str) -> bool {
        !self.has_progress() || compare_item_ids(item_id, &self.current_item_cursor).is_gt()
    }

    /// Parsed listing URL
    pub fn url(&self) -> DownloadResult<Url> {
        Url::parse(&self.uri).map_err(|e| DownloadError::InvalidUrl {
            url: self.uri.clone(),
            error: e.to_string(),
        })
    }
}

/// Compare two item IDs from the same source
///
/// IDs that both parse as unsigned integers compare numerically so that `"10"` sorts
/// after `"9"`; everything else falls back to length-then-lexicographic order, which
/// keeps zero-padded and hex-like IDs stable.
pub fn compare_item_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u128>(), b.parse::<u128>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

/// Proxy protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Http,
    #[default]
    Https,
    Socks5,
}

impl ProxyType {
    /// URL scheme used when building the proxy address
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks5 => "socks5",
        }
    }

    /// Parse a configured type; an empty string means https
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "https" => Some(ProxyType::Https),
            "http" => Some(ProxyType::Http),
            "socks5" | "socks" => Some(ProxyType::Socks5),
            _ => None,
        }
    }
}

fn deserialize_proxy_type<'de, D>(deserializer: D) -> Result<ProxyType, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    ProxyType::parse(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unknown proxy type '{}'", raw)))
}

/// Proxy configuration for one egress route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Disabled proxies are skipped when the pool is built
    #[serde(default = "default_true")]
    pub enable: bool,
    pub host: String,
    pub port: u16,
    #[serde(default, rename = "type", deserialize_with = "deserialize_proxy_type")]
    pub proxy_type: ProxyType,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_true() -> bool {
    true
}

impl ProxyConfig {
    /// Proxy address without credentials
    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.proxy_type.scheme(), self.host, self.port)
    }

    /// Whether basic auth should be attached
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

/// An outbound network path
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EgressRoute {
    #[default]
    Direct,
    Proxy(ProxyConfig),
}

impl EgressRoute {
    /// Short label for logs and errors; never includes credentials
    pub fn label(&self) -> String {
        match self {
            EgressRoute::Direct => DIRECT_ROUTE.to_string(),
            EgressRoute::Proxy(proxy) => proxy.address(),
        }
    }
}

impl fmt::Display for EgressRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A cookie persisted for a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    /// Domain the cookie is sent to; empty means the source host
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "/".to_string()
}

impl StoredCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: default_path(),
        }
    }

    /// Render as a `Set-Cookie` header value for the cookie jar
    pub fn to_set_cookie(&self) -> String {
        let mut header = format!("{}={}; Path={}", self.name, self.value, self.path);
        if !self.domain.is_empty() {
            header.push_str("; Domain=");
            header.push_str(&self.domain);
        }
        header
    }
}
