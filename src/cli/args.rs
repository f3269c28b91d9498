//! Command-line argument parsing for Source Archiver
//!
//! This module defines the CLI structure using clap derive macros: running visits
//! (once or in watch mode), managing tracked sources and accounts, and listing the
//! available source modules.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

/// Source Archiver - Mirror remote sources into a local archive
#[derive(Parser, Debug)]
#[command(
    name = "source_archiver",
    version,
    about = "Resumable, multi-route downloader for tracked remote sources",
    long_about = "Keeps a local archive of remote sources up to date.
Each visit discovers items newer than the saved cursor, downloads them over every configured
route, and advances the cursor only past items that are safely on disk."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// State file path (overrides configuration)
    #[arg(long, global = true, value_name = "FILE")]
    pub state_file: Option<PathBuf>,

    /// Download directory (overrides configuration)
    #[arg(long, global = true, value_name = "DIR")]
    pub download_dir: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Visit tracked sources and download new items
    Run(RunArgs),

    /// Manage tracked sources
    Source(SourceArgs),

    /// Manage site accounts
    Account(AccountArgs),

    /// List available source modules
    Modules,
}

/// Arguments for the run command
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Visit only this source (complete sources included)
    #[arg(short, long, value_name = "KEY")]
    pub source: Option<String>,

    /// Keep visiting on an interval until interrupted
    #[arg(short, long)]
    pub watch: bool,

    /// Time between visits in watch mode, e.g. "30m" (overrides configuration)
    #[arg(short, long, value_parser = parse_duration, requires = "watch")]
    pub interval: Option<Duration>,

    /// Download one item at a time and commit the cursor only at the end
    #[arg(long)]
    pub simple: bool,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for source management
#[derive(Args, Debug)]
pub struct SourceArgs {
    #[command(subcommand)]
    pub action: SourceAction,
}

/// Source management actions
#[derive(Subcommand, Debug)]
pub enum SourceAction {
    /// Start tracking a source
    Add {
        /// Key the source is stored under
        key: String,

        /// Listing URL handed to the module
        uri: String,

        /// Module that reads this source
        #[arg(short, long, default_value = "json_feed")]
        module: String,

        /// Folder below the module directory (defaults to the key)
        #[arg(long)]
        sub_folder: Option<String>,

        /// Replace an existing source with the same key
        #[arg(short, long)]
        force: bool,
    },

    /// List tracked sources with their cursors
    List,

    /// Stop tracking a source (downloaded files are kept)
    Remove {
        key: String,
    },

    /// Clear the cursor and completion flag so the next visit starts over
    Reset {
        key: String,
    },
}

/// Arguments for account management
#[derive(Args, Debug)]
pub struct AccountArgs {
    #[command(subcommand)]
    pub action: AccountAction,
}

/// Account management actions
#[derive(Subcommand, Debug)]
pub enum AccountAction {
    /// Store credentials for a module (password is prompted)
    Set {
        /// Module key
        module: String,

        /// Username; prompted when omitted
        #[arg(short, long)]
        username: Option<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    let duration = humantime_serde::re::humantime::parse_duration(value)
        .map_err(|e| format!("invalid duration '{}': {}", value, e))?;
    if duration.is_zero() {
        return Err("interval must be non-zero".to_string());
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parsing() {
        let cli = Cli::try_parse_from([
            "source_archiver",
            "run",
            "--source",
            "gallery",
            "--watch",
            "--interval",
            "15m",
        ])
        .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.source.as_deref(), Some("gallery"));
                assert!(args.watch);
                assert_eq!(args.interval, Some(Duration::from_secs(15 * 60)));
                assert!(!args.simple);
            }
            other => panic!("Expected run command, got {:?}", other),
        }
    }

    #[test]
    fn test_interval_requires_watch() {
        let result = Cli::try_parse_from(["source_archiver", "run", "--interval", "1h"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_interval_rejects_garbage() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("0s").is_err());
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_source_add_defaults() {
        let cli = Cli::try_parse_from([
            "source_archiver",
            "source",
            "add",
            "gallery",
            "https://example.com/feed.json",
        ])
        .unwrap();

        match cli.command {
            Commands::Source(SourceArgs {
                action:
                    SourceAction::Add {
                        key,
                        module,
                        sub_folder,
                        force,
                        ..
                    },
            }) => {
                assert_eq!(key, "gallery");
                assert_eq!(module, "json_feed");
                assert!(sub_folder.is_none());
                assert!(!force);
            }
            other => panic!("Expected source add, got {:?}", other),
        }
    }

    #[test]
    fn test_log_level() {
        let cli_quiet = Cli::try_parse_from(["source_archiver", "-q", "modules"]).unwrap();
        let cli_verbose = Cli::try_parse_from(["source_archiver", "modules", "-v"]).unwrap();
        let cli_debug =
            Cli::try_parse_from(["source_archiver", "--very-verbose", "modules"]).unwrap();
        let cli_default = Cli::try_parse_from(["source_archiver", "modules"]).unwrap();

        assert_eq!(cli_quiet.log_level(), tracing::Level::ERROR);
        assert_eq!(cli_verbose.log_level(), tracing::Level::INFO);
        assert_eq!(cli_debug.log_level(), tracing::Level::DEBUG);
        assert_eq!(cli_default.log_level(), tracing::Level::WARN);
    }
}
