//! Built-in source modules

pub mod json_feed;

pub use json_feed::{JsonFeedAdapter, JsonFeedModule};
