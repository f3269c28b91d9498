//! Account management for sources behind a login
//!
//! Login flows themselves belong to each source module; this module only owns the
//! credential type, its validation, and the interactive prompt used by
//! `account set`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use source_archiver::auth::prompt_credentials;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = prompt_credentials("json_feed", Some("alice"))?;
//! assert_eq!(credentials.username, "alice");
//! # Ok(())
//! # }
//! ```

pub mod credentials;

pub use credentials::{prompt_credentials, prompt_username, validate_username, Credentials};
