//! Command handlers for Source Archiver CLI
//!
//! This module implements the command handlers that connect CLI arguments to the
//! configuration, the state file and the source processor.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::app::{
    DispatchMode, JsonStore, ModuleRegistry, ProcessOutcome, SourceProcessor, SourceStore,
    TrackedSource,
};
use crate::auth::prompt_credentials;
use crate::cli::{
    AccountAction, AccountArgs, GlobalArgs, ProgressConfig, ProgressDisplay, RunArgs,
    SourceAction, SourceArgs,
};
use crate::config::AppConfig;
use crate::errors::{AppError, CoordinatorError, DiscoveryError, Result};

/// Loaded configuration and state shared by every command
pub struct CommandContext {
    pub config: AppConfig,
    pub store: Arc<JsonStore>,
    pub registry: Arc<ModuleRegistry>,
}

impl CommandContext {
    /// Load configuration, apply CLI overrides and open the state file
    pub async fn load(global: &GlobalArgs, registry: Arc<ModuleRegistry>) -> Result<Self> {
        let mut config = AppConfig::load(global.config.clone()).await?;
        if let Some(dir) = &global.download_dir {
            config.storage.download_dir = Some(dir.clone());
        }
        if let Some(file) = &global.state_file {
            config.storage.state_file = Some(file.clone());
        }

        let state_file = config.storage.state_file();
        debug!("Using state file {}", state_file.display());
        let store = Arc::new(JsonStore::open(state_file).await?);

        Ok(Self {
            config,
            store,
            registry,
        })
    }
}

/// Handle the run command
///
/// Visits one source or every incomplete source, once or repeatedly in watch mode.
/// In single-visit mode any failed source makes the command fail; in watch mode
/// failures are reported and the next visit is scheduled anyway.
pub async fn handle_run(ctx: &CommandContext, args: RunArgs, cancel: CancellationToken) -> Result<()> {
    let mut settings = ctx.config.to_processor_settings();
    if args.simple {
        settings.coordinator.mode = DispatchMode::Simple;
    }
    info!(
        "Downloading into {} over {} route(s)",
        settings.download_root.display(),
        settings.routes.len()
    );

    let display = ProgressDisplay::new(ProgressConfig {
        enable_progress_bars: !args.no_progress,
        ..Default::default()
    });
    let (events, progress) = display.start();

    let store: Arc<dyn SourceStore> = ctx.store.clone();
    let processor = SourceProcessor::new(store, Arc::clone(&ctx.registry), settings)
        .with_events(events)
        .with_cancellation(cancel.clone());

    let interval = args.interval.unwrap_or(ctx.config.watch.interval);
    let failed = loop {
        let failed = visit(&processor, args.source.as_deref()).await?;
        if !args.watch || cancel.is_cancelled() {
            break failed;
        }

        println!(
            "💤 Next visit in {}",
            humantime_serde::re::humantime::format_duration(round_secs(interval))
        );
        tokio::select! {
            _ = cancel.cancelled() => break failed,
            _ = tokio::time::sleep(interval) => {}
        }
    };

    drop(processor);
    let tally = progress.await.unwrap_or_default();
    println!();
    println!("📊 Run Summary:");
    println!("   Items queued: {}", tally.queued);
    println!("   Downloaded: {}", tally.finished);
    println!("   Failed: {}", tally.failed);

    if cancel.is_cancelled() {
        println!("⏹️  Interrupted; committed progress is saved");
        return Ok(());
    }
    if failed > 0 && !args.watch {
        return Err(AppError::generic(format!("{} source(s) failed", failed)));
    }
    Ok(())
}

/// One pass over the selected sources; returns the number that failed
async fn visit(processor: &SourceProcessor, only: Option<&str>) -> Result<usize> {
    let results = match only {
        Some(key) => vec![(key.to_string(), processor.process(key).await)],
        None => processor.process_all().await?,
    };

    if results.is_empty() {
        println!("ℹ️  No incomplete sources to visit");
    }

    let mut failed = 0;
    for (key, result) in results {
        match result {
            Ok(outcome) => print_outcome(&outcome),
            Err(AppError::Coordinator(CoordinatorError::Cancelled { dispatched, total })) => {
                println!(
                    "⏹️  {}: stopped after dispatching {}/{} item(s)",
                    key, dispatched, total
                );
            }
            Err(e) => {
                failed += 1;
                let hint = if e.is_recoverable() {
                    "will retry on the next visit"
                } else {
                    "needs attention"
                };
                println!("❌ {}: {} ({})", key, e, hint);
            }
        }
    }
    Ok(failed)
}

fn print_outcome(outcome: &ProcessOutcome) {
    let summary = &outcome.summary;
    let cursor = if summary.cursor.is_empty() {
        "none"
    } else {
        summary.cursor.as_str()
    };
    println!(
        "✅ {}: {} new, {} downloaded in {:.1}s, cursor {}",
        outcome.source_key,
        outcome.discovered,
        summary.completed,
        summary.elapsed.as_secs_f64(),
        cursor
    );
    if outcome.restarts > 0 {
        println!("   Rediscovered {} time(s) after links expired", outcome.restarts);
    }
    if outcome.exhausted {
        println!("   Source reports no further items; marked complete");
    }
}

fn round_secs(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs())
}

/// Handle source management commands
pub async fn handle_source(ctx: &CommandContext, args: SourceArgs) -> Result<()> {
    match args.action {
        SourceAction::Add {
            key,
            uri,
            module,
            sub_folder,
            force,
        } => add_source(ctx, key, uri, module, sub_folder, force).await,
        SourceAction::List => list_sources(ctx).await,
        SourceAction::Remove { key } => {
            if ctx.store.remove_source(&key).await? {
                println!("🗑️  Stopped tracking {} (downloaded files are kept)", key);
            } else {
                println!("ℹ️  No source named {}", key);
            }
            Ok(())
        }
        SourceAction::Reset { key } => {
            let mut source = ctx.store.get_source(&key).await?;
            source.current_item_cursor.clear();
            source.complete = false;
            ctx.store.upsert_source(source).await?;
            println!("🔄 {} will start from the oldest item on the next visit", key);
            Ok(())
        }
    }
}

async fn add_source(
    ctx: &CommandContext,
    key: String,
    uri: String,
    module: String,
    sub_folder: Option<String>,
    force: bool,
) -> Result<()> {
    if !ctx.registry.contains(&module) {
        return Err(DiscoveryError::UnknownModule { key: module }.into());
    }
    Url::parse(&uri).map_err(|e| AppError::generic(format!("Invalid URL '{}': {}", uri, e)))?;

    if !force && ctx.store.get_source(&key).await.is_ok() {
        return Err(AppError::generic(format!(
            "Source {} already exists; use --force to replace it",
            key
        )));
    }

    let folder = sub_folder.unwrap_or_else(|| key.clone());
    let source = TrackedSource::new(key.clone(), module.clone(), uri).with_sub_folder(folder);
    ctx.store.upsert_source(source).await?;

    if ctx.registry.get(&module)?.requires_account()
        && ctx.store.get_account(&module).await?.is_none()
    {
        warn!("Module {} needs an account and none is stored", module);
        println!("⚠️  {} needs an account. Run 'source_archiver account set {}'", module, module);
    }
    println!("➕ Tracking {} with module {}", key, module);
    Ok(())
}

async fn list_sources(ctx: &CommandContext) -> Result<()> {
    let sources = ctx.store.list_sources().await?;
    if sources.is_empty() {
        println!("ℹ️  No tracked sources. Add one with 'source_archiver source add'");
        return Ok(());
    }

    println!(
        "{:<20} {:<12} {:<16} {:<9} {}",
        "KEY", "MODULE", "CURSOR", "COMPLETE", "LAST CHECKED"
    );
    for source in sources {
        let checked = source
            .last_checked
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        let cursor = if source.has_progress() {
            source.current_item_cursor.as_str()
        } else {
            "-"
        };
        println!(
            "{:<20} {:<12} {:<16} {:<9} {}",
            source.key,
            source.module_key,
            cursor,
            if source.complete { "yes" } else { "no" },
            checked
        );
    }
    Ok(())
}

/// Handle account management commands
pub async fn handle_account(ctx: &CommandContext, args: AccountArgs) -> Result<()> {
    match args.action {
        AccountAction::Set { module, username } => {
            ctx.registry.get(&module)?;
            let credentials = prompt_credentials(&module, username.as_deref())?;
            let username = credentials.username.clone();
            ctx.store.set_account(&module, credentials).await?;
            // saved session cookies belong to the previous login
            ctx.store.set_cookies(&module, Vec::new()).await?;
            println!("🔐 Stored account {} for {}", username, module);
            Ok(())
        }
    }
}

/// Handle the modules command
pub fn handle_modules(registry: &ModuleRegistry) -> Result<()> {
    println!("{:<12} {:<8} {}", "MODULE", "ACCOUNT", "DESCRIPTION");
    for module in registry.modules() {
        println!(
            "{:<12} {:<8} {}",
            module.key(),
            if module.requires_account() { "yes" } else { "no" },
            module.description()
        );
    }
    Ok(())
}
