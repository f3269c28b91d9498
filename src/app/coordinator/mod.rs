//! Queue drain over the egress pool
//!
//! The coordinator hands queue items, in order, to free sessions and runs each
//! download as its own task. Completions may arrive in any order; the cursor only
//! ever moves to the end of the contiguous completed prefix of the queue, so an
//! earlier item that is still retrying can never be skipped over.
//!
//! The first failure recorded on any session stops dispatching. In-flight items are
//! allowed to finish (and still commit if they extend the prefix), then the failure
//! is returned.
//!
//! The coordinator module is organized into specialized components:
//!
//! - [`config`] - Dispatch mode and polling
//! - [`stats`] - Run summary
//! - [`progress`] - Item events for progress displays
//! - [`signals`] - Signal handling for graceful shutdown

pub mod config;
pub mod progress;
pub mod signals;
pub mod stats;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::cursor::{CommitWatermark, ProgressCursor};
use crate::app::discovery::ContentAdapter;
use crate::app::egress::{EgressPool, EgressSession};
use crate::app::models::QueueItem;
use crate::errors::{CoordinatorError, CoordinatorResult, DownloadError};

pub use config::{CoordinatorConfig, DispatchMode};
pub use progress::{EventSink, ItemEvent};
pub use signals::SignalHandler;
pub use stats::RunSummary;

/// Commit state shared by the workers of one run
///
/// The watermark update and the store write happen under one lock, so two workers
/// finishing together cannot both decide they extend the prefix.
struct Ledger {
    watermark: CommitWatermark,
    cursor: ProgressCursor,
    completed: usize,
}

/// Everything a worker task needs, cloned once per item
#[derive(Clone)]
struct RunContext {
    pool: Arc<EgressPool>,
    items: Arc<Vec<QueueItem>>,
    adapter: Arc<dyn ContentAdapter>,
    ledger: Arc<Mutex<Ledger>>,
    events: EventSink,
    mode: DispatchMode,
}

/// Drains ordered queues over an [`EgressPool`]
pub struct DownloadCoordinator {
    config: CoordinatorConfig,
    pool: Arc<EgressPool>,
    events: EventSink,
    cancel: CancellationToken,
}

impl DownloadCoordinator {
    pub fn new(config: CoordinatorConfig, pool: Arc<EgressPool>) -> Self {
        Self {
            config,
            pool,
            events: EventSink::disabled(),
            cancel: CancellationToken::new(),
        }
    }

    /// Report item events on `tx`
    pub fn with_events(mut self, tx: mpsc::Sender<ItemEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    /// Stop dispatching when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn pool(&self) -> &Arc<EgressPool> {
        &self.pool
    }

    /// Download every item of `items`, oldest first
    ///
    /// `items` must already exclude everything at or before the cursor; no filtering
    /// happens here.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::ItemFailed` with the first recorded session failure,
    /// `WorkerPanic` if a worker task died, `Cancelled` if the token fired before the
    /// queue was dispatched, and `Commit` if the final cursor write of simple mode
    /// fails.
    pub async fn run(
        &self,
        items: Vec<QueueItem>,
        adapter: Arc<dyn ContentAdapter>,
        cursor: ProgressCursor,
    ) -> CoordinatorResult<RunSummary> {
        let started = Instant::now();
        let total = items.len();

        if total == 0 {
            debug!("Nothing queued for {}", cursor.source_key());
            return Ok(RunSummary {
                cursor: cursor.current().to_string(),
                elapsed: started.elapsed(),
                ..Default::default()
            });
        }
        if self.pool.is_empty() {
            return Err(CoordinatorError::EmptyPool);
        }

        let concurrency = self.config.concurrency(self.pool.len());
        info!(
            "Draining {} item(s) for {} over {} session(s) ({:?})",
            total,
            cursor.source_key(),
            concurrency,
            self.config.mode
        );
        self.events.emit(ItemEvent::Queued { total });

        let ctx = RunContext {
            pool: Arc::clone(&self.pool),
            items: Arc::new(items),
            adapter,
            ledger: Arc::new(Mutex::new(Ledger {
                watermark: CommitWatermark::new(),
                cursor,
                completed: 0,
            })),
            events: self.events.clone(),
            mode: self.config.mode,
        };

        let mut workers = JoinSet::new();
        let mut panic: Option<CoordinatorError> = None;
        let mut dispatched = 0;

        while dispatched < total {
            if self.pool.has_failure().await {
                warn!("Session failure recorded, no further items will be dispatched");
                break;
            }
            if panic.is_some() {
                break;
            }
            if self.cancel.is_cancelled() {
                info!("Cancellation requested, no further items will be dispatched");
                break;
            }

            let session = if workers.len() < concurrency {
                self.pool.take_free().await
            } else {
                None
            };

            let Some(session) = session else {
                tokio::select! {
                    _ = self.pool.wait_for_change(self.config.poll_interval) => {}
                    Some(joined) = workers.join_next(), if !workers.is_empty() => {
                        record_join(joined, &mut panic);
                    }
                    _ = self.cancel.cancelled() => {}
                }
                continue;
            };

            let index = dispatched;
            dispatched += 1;
            let ctx = ctx.clone();
            workers.spawn(async move { run_item(ctx, session, index).await });
        }

        while let Some(joined) = workers.join_next().await {
            record_join(joined, &mut panic);
        }

        if let Some(failure) = self.pool.take_failure().await {
            error!(
                "Run aborted: item {} failed on {}: {}",
                failure.item_id, failure.route, failure.error
            );
            return Err(CoordinatorError::ItemFailed {
                item_id: failure.item_id,
                route: failure.route,
                source: failure.error,
            });
        }
        if let Some(panic) = panic {
            return Err(panic);
        }
        if dispatched < total {
            return Err(CoordinatorError::Cancelled { dispatched, total });
        }

        let mut ledger = ctx.ledger.lock().await;
        if self.config.mode == DispatchMode::Simple {
            if let Some(last) = ctx.items.last() {
                ledger.cursor.commit(&last.item_id).await?;
                self.events.emit(ItemEvent::Committed {
                    item_id: last.item_id.clone(),
                });
            }
        }

        let summary = RunSummary {
            total,
            dispatched,
            completed: ledger.completed,
            cursor: ledger.cursor.current().to_string(),
            elapsed: started.elapsed(),
        };
        info!(
            "Drained {} item(s) for {} in {:.1}s, cursor at {}",
            summary.completed,
            ledger.cursor.source_key(),
            summary.elapsed.as_secs_f64(),
            summary.cursor
        );
        Ok(summary)
    }
}

/// One item on one session
async fn run_item(ctx: RunContext, session: EgressSession, index: usize) {
    let item = &ctx.items[index];
    let route = session.label().to_string();
    debug!("Item {} (#{}) assigned to {}", item.item_id, index, route);
    ctx.events.emit(ItemEvent::Started {
        index,
        item_id: item.item_id.clone(),
        route: route.clone(),
    });

    if let Err(e) = ctx.adapter.download(&session, item).await {
        ctx.events.emit(ItemEvent::Failed {
            index,
            item_id: item.item_id.clone(),
            route,
            error: e.to_string(),
        });
        ctx.pool.mark_failed(&session, &item.item_id, e).await;
        return;
    }

    if let Err(e) = record_success(&ctx, index).await {
        ctx.events.emit(ItemEvent::Failed {
            index,
            item_id: item.item_id.clone(),
            route,
            error: e.to_string(),
        });
        ctx.pool.mark_failed(&session, &item.item_id, e).await;
        return;
    }

    ctx.events.emit(ItemEvent::Finished {
        index,
        item_id: item.item_id.clone(),
        route,
    });
    ctx.pool.release(&session).await;
}

/// Extend the completed prefix and commit its last item, under the ledger lock
async fn record_success(ctx: &RunContext, index: usize) -> Result<(), DownloadError> {
    let mut ledger = ctx.ledger.lock().await;
    ledger.completed += 1;
    let top = ledger.watermark.complete(index);

    if ctx.mode == DispatchMode::MultiEgress {
        if let Some(top) = top {
            let item_id = &ctx.items[top].item_id;
            ledger
                .cursor
                .commit(item_id)
                .await
                .map_err(|e| DownloadError::CursorCommit {
                    item_id: item_id.clone(),
                    reason: e.to_string(),
                })?;
            ctx.events.emit(ItemEvent::Committed {
                item_id: item_id.clone(),
            });
        }
    }
    Ok(())
}

fn record_join(joined: Result<(), JoinError>, panic: &mut Option<CoordinatorError>) {
    if let Err(e) = joined {
        error!("Download worker terminated unexpectedly: {}", e);
        panic.get_or_insert(CoordinatorError::WorkerPanic {
            reason: e.to_string(),
        });
    }
}

#[cfg(test)]
pub mod tests;
