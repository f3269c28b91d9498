//! Application constants for Source Archiver
//!
//! This module centralizes all constants used throughout the application,
//! organized by functional domain.

use std::time::Duration;

/// Environment variable names
pub mod env {
    /// Overrides the download root directory
    pub const DOWNLOAD_DIR: &str = "SOURCE_ARCHIVER_DOWNLOAD_DIR";

    /// Overrides the state file location
    pub const STATE_FILE: &str = "SOURCE_ARCHIVER_STATE_FILE";
}

/// Account constants
pub mod auth {
    /// Minimum username length
    pub const MIN_USERNAME_LENGTH: usize = 1;

    /// Maximum username length
    pub const MAX_USERNAME_LENGTH: usize = 128;
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = "Source-Archiver/0.1.0";

    /// Timeout for page and API fetches
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Timeout for a single file download
    pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum idle connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 8;
}

/// Retry and throttling configuration
pub mod limits {
    use super::Duration;

    /// Attempts per request before giving up
    pub const MAX_RETRIES: u32 = 5;

    /// Attempts per file download before giving up
    pub const MAX_DOWNLOAD_RETRIES: u32 = 3;

    /// Backoff unit; attempt `n` sleeps `(n + 1)` units
    pub const RETRY_DELAY_UNIT: Duration = Duration::from_secs(1);

    /// Cool-down applied by the classifier when the server throttles
    pub const THROTTLE_COOLDOWN: Duration = Duration::from_secs(60);

    /// HTTP status used by servers to signal throttling
    pub const THROTTLE_STATUS: u16 = 429;

    /// Default rate-limit burst size
    pub const DEFAULT_BURST: u32 = 1;
}

/// File operation constants
pub mod files {
    /// Temporary file suffix for atomic writes
    pub const TEMP_FILE_SUFFIX: &str = ".part";

    /// Maximum bytes in one path component on common filesystems
    pub const MAX_COMPONENT_BYTES: usize = 255;

    /// Default state file name
    pub const STATE_FILE_NAME: &str = "state.json";

    /// Application directory name under the user's config/data dirs
    pub const APP_DIR_NAME: &str = "source-archiver";

    /// File permissions for the state file (Unix only) - owner read/write only
    #[cfg(unix)]
    pub const STATE_FILE_PERMISSIONS: u32 = 0o600;
}

/// Egress pool and coordinator constants
pub mod coordinator {
    use super::Duration;

    /// Upper bound on one wait for a free egress session
    pub const FREE_SESSION_POLL: Duration = Duration::from_millis(100);

    /// Label used for the route without a proxy
    pub const DIRECT_ROUTE: &str = "direct";

    /// Times a queue may be rediscovered after link expiry in one visit
    pub const MAX_QUEUE_RESTARTS: u32 = 2;

    /// Buffer size for progress event channels
    pub const EVENT_CHANNEL_SIZE: usize = 256;
}

/// Discovery constants
pub mod discovery {
    /// Hard stop for pagination loops
    pub const MAX_PAGES: usize = 500;
}

/// Watch mode constants
pub mod watch {
    use super::Duration;

    /// Default time between visits in watch mode
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);
}

// Re-export commonly used constants for convenience
pub use coordinator::DIRECT_ROUTE;
pub use http::USER_AGENT;
pub use limits::{MAX_DOWNLOAD_RETRIES, MAX_RETRIES};
