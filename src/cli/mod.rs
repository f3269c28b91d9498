//! Command-line interface components
//!
//! This module contains CLI-specific code for the Source Archiver application,
//! including argument parsing, progress display, and command handlers.

pub mod args;
pub mod commands;
pub mod progress;

pub use args::{
    AccountAction, AccountArgs, Cli, Commands, GlobalArgs, RunArgs, SourceAction, SourceArgs,
};
pub use commands::{handle_account, handle_modules, handle_run, handle_source, CommandContext};
pub use progress::{ProgressConfig, ProgressDisplay, ProgressTally};
