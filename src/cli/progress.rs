//! Progress display for visits
//!
//! Renders the coordinator's [`ItemEvent`]s. On a terminal an indicatif bar tracks
//! the current queue; elsewhere a text line is printed every few seconds and on
//! every failure. Each `Queued` event starts a new queue, so one display can follow
//! a whole `run --watch` session.
//!
//! # Examples
//!
//! ```rust,no_run
//! use source_archiver::cli::{ProgressConfig, ProgressDisplay};
//!
//! # async fn example() {
//! let display = ProgressDisplay::new(ProgressConfig::default());
//! let (tx, handle) = display.start();
//! // hand `tx` to SourceProcessor::with_events, run, then drop every sender
//! drop(tx);
//! let tally = handle.await.unwrap_or_default();
//! println!("{} item(s) downloaded", tally.finished);
//! # }
//! ```

use std::collections::HashSet;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::app::ItemEvent;
use crate::constants::coordinator::EVENT_CHANNEL_SIZE;

/// Configuration for progress display
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Enable visual progress bars
    pub enable_progress_bars: bool,
    /// Time between text-mode reports
    pub text_report_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enable_progress_bars: true,
            text_report_interval: Duration::from_secs(10),
        }
    }
}

/// Running counts over every queue seen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressTally {
    pub queued: usize,
    pub finished: usize,
    pub failed: usize,
    /// Items currently downloading, by queue index
    pub active: HashSet<usize>,
    pub last_commit: Option<String>,
}

impl ProgressTally {
    /// Fold one event into the counts
    pub fn apply(&mut self, event: &ItemEvent) {
        match event {
            ItemEvent::Queued { total } => {
                self.queued += total;
                self.active.clear();
            }
            ItemEvent::Started { index, .. } => {
                self.active.insert(*index);
            }
            ItemEvent::Finished { index, .. } => {
                self.active.remove(index);
                self.finished += 1;
            }
            ItemEvent::Failed { index, .. } => {
                self.active.remove(index);
                self.failed += 1;
            }
            ItemEvent::Committed { item_id } => {
                self.last_commit = Some(item_id.clone());
            }
        }
    }

    fn status(&self) -> String {
        match &self.last_commit {
            Some(cursor) => format!("{} active, cursor {}", self.active.len(), cursor),
            None => format!("{} active", self.active.len()),
        }
    }
}

/// Consumes item events until every sender is dropped
pub struct ProgressDisplay {
    config: ProgressConfig,
    is_terminal: bool,
}

impl ProgressDisplay {
    /// Create a new progress display with the given configuration
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            config,
            is_terminal: atty::is(atty::Stream::Stderr),
        }
    }

    /// Spawn the renderer; the handle yields the final tally
    pub fn start(self) -> (mpsc::Sender<ItemEvent>, JoinHandle<ProgressTally>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let handle = if self.config.enable_progress_bars && self.is_terminal {
            tokio::spawn(render_bar(rx))
        } else {
            tokio::spawn(render_text(rx, self.config.text_report_interval))
        };
        (tx, handle)
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

async fn render_bar(mut rx: mpsc::Receiver<ItemEvent>) -> ProgressTally {
    let mut tally = ProgressTally::default();
    let mut bar: Option<ProgressBar> = None;

    while let Some(event) = rx.recv().await {
        tally.apply(&event);
        match &event {
            ItemEvent::Queued { total } => {
                if let Some(done) = bar.take() {
                    done.finish_and_clear();
                }
                let fresh = ProgressBar::new(*total as u64);
                fresh.set_style(bar_style());
                fresh.enable_steady_tick(Duration::from_millis(120));
                bar = Some(fresh);
            }
            ItemEvent::Finished { .. } => {
                if let Some(bar) = &bar {
                    bar.inc(1);
                }
            }
            ItemEvent::Failed {
                item_id,
                route,
                error,
                ..
            } => {
                if let Some(bar) = &bar {
                    bar.println(format!("❌ {} via {}: {}", item_id, route, error));
                }
            }
            ItemEvent::Started { .. } | ItemEvent::Committed { .. } => {}
        }
        if let Some(bar) = &bar {
            bar.set_message(tally.status());
        }
    }

    if let Some(bar) = bar {
        bar.finish_with_message(tally.status());
    }
    debug!("Progress display closed");
    tally
}

async fn render_text(mut rx: mpsc::Receiver<ItemEvent>, every: Duration) -> ProgressTally {
    let mut tally = ProgressTally::default();
    let mut last_report = Instant::now();

    while let Some(event) = rx.recv().await {
        tally.apply(&event);
        match &event {
            ItemEvent::Queued { total } => {
                eprintln!("Queued {} item(s)", total);
            }
            ItemEvent::Failed {
                item_id,
                route,
                error,
                ..
            } => {
                eprintln!("Item {} failed via {}: {}", item_id, route, error);
            }
            _ if last_report.elapsed() >= every => {
                eprintln!(
                    "Progress: {}/{} item(s) downloaded, {}",
                    tally.finished,
                    tally.queued,
                    tally.status()
                );
                last_report = Instant::now();
            }
            _ => {}
        }
    }

    debug!("Progress display closed");
    tally
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(index: usize) -> ItemEvent {
        ItemEvent::Started {
            index,
            item_id: index.to_string(),
            route: "direct".to_string(),
        }
    }

    #[test]
    fn test_tally_follows_events() {
        let mut tally = ProgressTally::default();
        tally.apply(&ItemEvent::Queued { total: 3 });
        tally.apply(&started(0));
        tally.apply(&started(1));
        tally.apply(&ItemEvent::Finished {
            index: 1,
            item_id: "1".to_string(),
            route: "direct".to_string(),
        });
        tally.apply(&ItemEvent::Failed {
            index: 0,
            item_id: "0".to_string(),
            route: "direct".to_string(),
            error: "HTTP 403".to_string(),
        });

        assert_eq!(tally.queued, 3);
        assert_eq!(tally.finished, 1);
        assert_eq!(tally.failed, 1);
        assert!(tally.active.is_empty());
        assert!(tally.last_commit.is_none());
    }

    #[test]
    fn test_new_queue_clears_active() {
        let mut tally = ProgressTally::default();
        tally.apply(&ItemEvent::Queued { total: 2 });
        tally.apply(&started(0));
        tally.apply(&ItemEvent::Committed {
            item_id: "7".to_string(),
        });
        tally.apply(&ItemEvent::Queued { total: 4 });

        assert_eq!(tally.queued, 6);
        assert!(tally.active.is_empty());
        assert_eq!(tally.status(), "0 active, cursor 7");
    }

    #[tokio::test]
    async fn test_text_renderer_returns_tally_when_senders_drop() {
        let display = ProgressDisplay {
            config: ProgressConfig {
                enable_progress_bars: false,
                text_report_interval: Duration::from_secs(60),
            },
            is_terminal: false,
        };
        let (tx, handle) = display.start();
        tx.send(ItemEvent::Queued { total: 1 }).await.unwrap();
        tx.send(started(0)).await.unwrap();
        tx.send(ItemEvent::Finished {
            index: 0,
            item_id: "0".to_string(),
            route: "direct".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        let tally = handle.await.unwrap();
        assert_eq!(tally.finished, 1);
        assert_eq!(tally.queued, 1);
    }
}
