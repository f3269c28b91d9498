//! Prelude module for Source Archiver Library
//!
//! This module re-exports the most commonly used items from the library,
//! providing a convenient way to import everything needed for typical usage
//! with a single `use source_archiver::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use source_archiver::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let store: Arc<dyn SourceStore> = Arc::new(JsonStore::open("state.json").await?);
//!     let processor = SourceProcessor::new(
//!         store,
//!         Arc::new(ModuleRegistry::with_builtin()),
//!         ProcessorSettings::default(),
//!     );
//!     for (key, result) in processor.process_all().await? {
//!         println!("{}: {}", key, if result.is_ok() { "ok" } else { "failed" });
//!     }
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

// Sessions and the pool
pub use crate::app::{
    ClientConfig, EgressPool, EgressRoute, EgressSession, ErrorClassifier, ProxyConfig,
    RateLimitConfig, Session,
};

// Queue drain
pub use crate::app::{
    ContentAdapter, CoordinatorConfig, DispatchMode, DownloadCoordinator, ItemEvent,
    ProgressCursor, QueueItem, RunSummary,
};

// Sources, modules and persistence
pub use crate::app::{
    Discovery, JsonStore, MemoryStore, ModuleRegistry, ProcessOutcome, ProcessorSettings,
    SourceModule, SourceProcessor, SourceStore, TrackedSource,
};

// Configuration
pub use crate::config::AppConfig;

// Error types for detailed error handling
pub use crate::errors::{
    AuthError, ConfigError, CoordinatorError, DiscoveryError, DownloadError, StoreError,
};
