//! Item-level progress events
//!
//! The coordinator reports what it does over an optional channel. Sends never block
//! the run: a full or closed channel drops the event.

use tokio::sync::mpsc;
use tracing::trace;

/// One thing that happened to a queue item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemEvent {
    /// Queue size for the run about to start
    Queued { total: usize },
    Started {
        index: usize,
        item_id: String,
        route: String,
    },
    Finished {
        index: usize,
        item_id: String,
        route: String,
    },
    Failed {
        index: usize,
        item_id: String,
        route: String,
        error: String,
    },
    /// The persisted cursor moved
    Committed { item_id: String },
}

/// Cheap cloneable sender wrapper
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<ItemEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<ItemEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ItemEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                trace!("Progress event dropped: {}", e);
            }
        }
    }
}
