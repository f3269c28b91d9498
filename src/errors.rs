//! Error types for Source Archiver
//!
//! Errors are grouped by the component that raises them. Session-level failures
//! (`DownloadError`) carry enough detail for the retry loop to decide whether to try
//! again, and the coordinator wraps them with the item and egress route that failed.

use std::path::PathBuf;
use thiserror::Error;

/// Authentication-related errors
#[derive(Error, Debug)]
pub enum AuthError {
    /// No account stored for a source that requires one
    #[error("No account configured for source '{source_key}'. Run 'account set {source_key}'")]
    MissingCredentials { source_key: String },

    /// HTTP request failed during authentication
    #[error("HTTP request failed during authentication")]
    Http(#[from] reqwest::Error),

    /// A session request failed during authentication
    #[error("Request failed during authentication")]
    Request(#[from] DownloadError),

    /// Login was rejected by the remote service
    #[error("Login failed for source '{source_key}': {reason}")]
    LoginFailed { source_key: String, reason: String },

    /// Invalid username format
    #[error("Invalid username format: {reason}")]
    InvalidUsername { reason: String },

    /// Reading the password from the terminal failed
    #[error("Failed to read password from terminal")]
    Prompt(#[from] std::io::Error),
}

/// HTTP session and file download errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Transport-level failure (connection reset, timeout, DNS, body read)
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// I/O error during file operations
    #[error("File I/O error")]
    Io(#[from] std::io::Error),

    /// Invalid URL provided
    #[error("Invalid URL: {url} - {error}")]
    InvalidUrl { url: String, error: String },

    /// Server returned an error status that may succeed on retry
    #[error("Server error: HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Server signalled throttling; a cool-down was applied before returning
    #[error("Throttled by server: HTTP {status} for {url}")]
    Throttled { status: u16, url: String },

    /// Status in the source's blocking set; never retried
    #[error("Blocked: HTTP {status} for {url}")]
    Blocked { status: u16, url: String },

    /// The egress route itself looks banned; fatal for the whole source
    #[error("Egress route banned: {reason}")]
    EgressBanned { reason: String },

    /// A classifier marked an otherwise retryable error as fatal
    #[error("Unrecoverable failure: {source}")]
    Fatal {
        #[source]
        source: Box<DownloadError>,
    },

    /// Body was empty
    #[error("Downloaded file is empty: {path}")]
    EmptyDownload { path: PathBuf },

    /// Written byte count disagrees with Content-Length
    #[error("Incomplete download: received {received} bytes, expected {expected} bytes")]
    IncompleteDownload { received: u64, expected: u64 },

    /// Atomic rename of the temporary file failed
    #[error("Atomic file operation failed: could not rename {temp_path} to {final_path}")]
    AtomicOperationFailed {
        temp_path: PathBuf,
        final_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Request body could not be replayed for another attempt
    #[error("Request for {url} cannot be retried because its body is a stream")]
    UnreplayableRequest { url: String },

    /// Content was removed upstream; adapters may turn this into a skip
    #[error("Item {item_id} was deleted upstream")]
    DeletedUpstream { item_id: String },

    /// A signed file link expired; the whole queue should be rediscovered
    #[error("Download link expired: {url}")]
    LinkExpired { url: String },

    /// The persisted cursor could not be advanced
    #[error("Failed to commit cursor to item {item_id}: {reason}")]
    CursorCommit { item_id: String, reason: String },

    /// The run was cancelled while waiting
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid session configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Generic error for other issues
    #[error("{0}")]
    Other(String),
}

impl DownloadError {
    /// Errors that must not be retried at any level
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DownloadError::Blocked { .. }
                | DownloadError::EgressBanned { .. }
                | DownloadError::Fatal { .. }
                | DownloadError::InvalidUrl { .. }
                | DownloadError::UnreplayableRequest { .. }
                | DownloadError::DeletedUpstream { .. }
                | DownloadError::LinkExpired { .. }
                | DownloadError::Cancelled
                | DownloadError::ConfigurationError(_)
        )
    }

    /// Unwraps classifier-imposed `Fatal` wrappers
    pub fn root(&self) -> &DownloadError {
        match self {
            DownloadError::Fatal { source } => source.root(),
            other => other,
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self.root() {
            DownloadError::Status { status, .. }
            | DownloadError::Throttled { status, .. }
            | DownloadError::Blocked { status, .. } => Some(*status),
            DownloadError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Persistence collaborator errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Tracked source does not exist
    #[error("Tracked source not found: {key}")]
    SourceNotFound { key: String },

    /// I/O error reading or writing the state file
    #[error("State file I/O error: {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// State file is not valid JSON
    #[error("State file is corrupted: {path}")]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Background persistence task failed
    #[error("State persistence task failed: {0}")]
    Task(String),
}

/// Discovery collaborator errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Fetching a listing page failed
    #[error("Failed to fetch listing page")]
    Fetch(#[from] DownloadError),

    /// Listing page could not be parsed
    #[error("Failed to parse listing page {url}: {reason}")]
    Parse { url: String, reason: String },

    /// No module registered under the key
    #[error("Unknown module '{key}'")]
    UnknownModule { key: String },

    /// Pagination did not terminate
    #[error("Pagination exceeded {max_pages} pages for {url}")]
    TooManyPages { url: String, max_pages: usize },
}

/// Download coordinator errors
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// An item failed on an egress route; the run was aborted after draining
    #[error("Item {item_id} failed on egress route {route}")]
    ItemFailed {
        item_id: String,
        route: String,
        #[source]
        source: DownloadError,
    },

    /// A worker task panicked or was aborted
    #[error("Download worker terminated unexpectedly: {reason}")]
    WorkerPanic { reason: String },

    /// The pool has no sessions to dispatch to
    #[error("Egress pool is empty")]
    EmptyPool,

    /// The run was cancelled before the queue was drained
    #[error("Run cancelled after {dispatched} of {total} items were dispatched")]
    Cancelled { dispatched: usize, total: usize },

    /// Final cursor commit failed
    #[error("Failed to commit cursor")]
    Commit(#[from] StoreError),
}

impl CoordinatorError {
    /// The session error behind an item failure
    pub fn download_error(&self) -> Option<&DownloadError> {
        match self {
            CoordinatorError::ItemFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Configuration file could not be read or written
    #[error("Configuration file I/O error: {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Authentication error
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Download error
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Persistence error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Discovery error
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Coordinator error
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is worth retrying on the next visit
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Download(e) => !e.is_fatal(),
            AppError::Coordinator(CoordinatorError::ItemFailed { source, .. }) => {
                !source.is_fatal()
            }
            AppError::Discovery(DiscoveryError::Fetch(e)) => !e.is_fatal(),
            AppError::Auth(AuthError::Http(_)) => true,
            AppError::Auth(AuthError::Request(e)) => !e.is_fatal(),
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "authentication",
            AppError::Download(_) => "download",
            AppError::Store(_) => "store",
            AppError::Discovery(_) => "discovery",
            AppError::Coordinator(_) => "coordinator",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Authentication result type alias
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Download result type alias
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Store result type alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Discovery result type alias
pub type DiscoveryResult<T> = std::result::Result<T, DiscoveryError>;

/// Coordinator result type alias
pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;

/// Config result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let blocked = DownloadError::Blocked {
            status: 403,
            url: "https://example.com/a".to_string(),
        };
        assert!(blocked.is_fatal());
        assert_eq!(blocked.status(), Some(403));

        let retryable = DownloadError::Status {
            status: 503,
            url: "https://example.com/a".to_string(),
        };
        assert!(!retryable.is_fatal());

        let wrapped = DownloadError::Fatal {
            source: Box::new(retryable),
        };
        assert!(wrapped.is_fatal());
        assert_eq!(wrapped.status(), Some(503));
    }

    #[test]
    fn test_integrity_errors_are_retryable() {
        let short = DownloadError::IncompleteDownload {
            received: 10,
            expected: 100,
        };
        assert!(!short.is_fatal());
        let empty = DownloadError::EmptyDownload {
            path: PathBuf::from("/tmp/x"),
        };
        assert!(!empty.is_fatal());
    }

    #[test]
    fn test_app_error_category() {
        let err = AppError::from(StoreError::SourceNotFound {
            key: "gallery".to_string(),
        });
        assert_eq!(err.category(), "store");
        assert!(!err.is_recoverable());

        let err = AppError::from(CoordinatorError::ItemFailed {
            item_id: "7".to_string(),
            route: "direct".to_string(),
            source: DownloadError::Status {
                status: 500,
                url: "https://example.com".to_string(),
            },
        });
        assert_eq!(err.category(), "coordinator");
        assert!(err.is_recoverable());
    }
}
