//! Source Archiver CLI application
//!
//! Command-line interface for keeping a local archive of tracked remote sources.
//! Features multi-route downloads, a crash-safe cursor per source, and watch mode.

use std::process;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use source_archiver::app::{ModuleRegistry, SignalHandler};
use source_archiver::cli::{
    handle_account, handle_modules, handle_run, handle_source, Cli, CommandContext, Commands,
};
use source_archiver::config::{AppConfig, LoggingConfig};
use source_archiver::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    let registry = Arc::new(ModuleRegistry::with_builtin());
    if let Commands::Modules = cli.command {
        init_logging(&cli, &LoggingConfig::default());
        return handle_modules(&registry);
    }

    if cli.global.config.is_none() {
        AppConfig::initialize_first_run().await?;
    }
    let ctx = CommandContext::load(&cli.global, registry).await?;
    init_logging(&cli, &ctx.config.logging);

    info!("Source Archiver v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run(args) => {
            info!("Executing run command");
            let cancel = CancellationToken::new();
            let signals = SignalHandler::new(cancel.clone()).setup();
            let result = handle_run(&ctx, args, cancel.clone()).await;
            // stops the signal task if no signal arrived
            cancel.cancel();
            let _ = signals.await;
            result
        }
        Commands::Source(args) => {
            info!("Executing source command");
            handle_source(&ctx, args).await
        }
        Commands::Account(args) => {
            info!("Executing account command");
            handle_account(&ctx, args).await
        }
        Commands::Modules => handle_modules(&ctx.registry),
    }
}

/// Initialize logging from CLI verbosity, falling back to the configured level
fn init_logging(cli: &Cli, logging: &LoggingConfig) {
    let flags = &cli.global;
    let log_level = if flags.quiet || flags.verbose || flags.very_verbose {
        cli.log_level().to_string().to_lowercase()
    } else {
        logging.level.clone()
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("source_archiver={}", log_level).parse() {
        filter = filter.add_directive(directive);
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(logging.colored_output)
        .with_level(cli.global.very_verbose) // Show levels only in very verbose mode
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
