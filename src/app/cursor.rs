//! Persisted resume position and the commit watermark that advances it
//!
//! A run completes items in any order. [`CommitWatermark`] tracks which positions
//! of the discovery order have finished and reports how far the contiguous prefix
//! reaches; only that prefix is ever written through [`ProgressCursor`].

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::app::store::SourceStore;
use crate::errors::StoreResult;

/// The last committed item of one tracked source
pub struct ProgressCursor {
    store: Arc<dyn SourceStore>,
    source_key: String,
    current: String,
}

impl ProgressCursor {
    /// Read the cursor once, at queue-build time
    pub async fn load(store: Arc<dyn SourceStore>, source_key: &str) -> StoreResult<Self> {
        let current = store.get_cursor(source_key).await?;
        Ok(Self {
            store,
            source_key: source_key.to_string(),
            current,
        })
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    /// Persist `item_id` as the last durably downloaded item
    pub async fn commit(&mut self, item_id: &str) -> StoreResult<()> {
        self.store.set_cursor(&self.source_key, item_id).await?;
        debug!("Cursor for {} advanced to {}", self.source_key, item_id);
        self.current = item_id.to_string();
        Ok(())
    }
}

impl std::fmt::Debug for ProgressCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressCursor")
            .field("source_key", &self.source_key)
            .field("current", &self.current)
            .finish()
    }
}

/// Completed positions of one queue drain
///
/// `next` is the first position not yet covered by the committed prefix; positions
/// that finished ahead of it wait in `finished` until the gap closes.
#[derive(Debug, Default, Clone)]
pub struct CommitWatermark {
    next: usize,
    finished: BTreeSet<usize>,
}

impl CommitWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `index` as finished
    ///
    /// Returns the highest index of the now-contiguous prefix if it moved, which is
    /// the position whose item ID should be committed.
    pub fn complete(&mut self, index: usize) -> Option<usize> {
        if index < self.next {
            return None;
        }
        self.finished.insert(index);

        let start = self.next;
        while self.finished.remove(&self.next) {
            self.next += 1;
        }
        (self.next > start).then(|| self.next - 1)
    }

    /// Number of positions covered by the contiguous prefix
    pub fn committed_len(&self) -> usize {
        self.next
    }

    /// Finished positions still waiting on an earlier one
    pub fn waiting(&self) -> usize {
        self.finished.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::TrackedSource;
    use crate::app::store::MemoryStore;

    fn permutations(n: usize) -> Vec<Vec<usize>> {
        fn build(prefix: &mut Vec<usize>, rest: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
            if rest.is_empty() {
                out.push(prefix.clone());
                return;
            }
            for i in 0..rest.len() {
                let value = rest.remove(i);
                prefix.push(value);
                build(prefix, rest, out);
                prefix.pop();
                rest.insert(i, value);
            }
        }
        let mut out = Vec::new();
        build(&mut Vec::new(), &mut (0..n).collect(), &mut out);
        out
    }

    /// Test that a later completion waits until the gap before it closes
    #[test]
    fn test_out_of_order_completion_waits_for_gap() {
        let mut mark = CommitWatermark::new();
        assert_eq!(mark.complete(2), None);
        assert_eq!(mark.complete(1), None);
        assert_eq!(mark.waiting(), 2);
        assert_eq!(mark.complete(0), Some(2));
        assert_eq!(mark.committed_len(), 3);
        assert_eq!(mark.waiting(), 0);
        assert_eq!(mark.complete(3), Some(3));
    }

    /// Test that an index that never finishes holds the prefix back
    #[test]
    fn test_failed_item_pins_the_prefix() {
        // A, C succeed; B never does
        let mut mark = CommitWatermark::new();
        assert_eq!(mark.complete(0), Some(0));
        assert_eq!(mark.complete(2), None);
        assert_eq!(mark.committed_len(), 1);
    }

    /// Test every completion order of a short queue
    ///
    /// Verifies that each reported top is the end of a contiguous prefix and
    /// that the prefix only ever grows.
    #[test]
    fn test_every_interleaving_commits_only_contiguous_prefix() {
        let n = 5;
        for order in permutations(n) {
            for failed in 0..=n {
                let mut mark = CommitWatermark::new();
                let mut last_committed = None;
                for &index in order.iter().filter(|&&i| i != failed) {
                    if let Some(top) = mark.complete(index) {
                        // never ahead of an unfinished earlier position
                        assert!(top < failed, "order {:?} failed {}", order, failed);
                        last_committed = Some(top);
                    }
                }
                let expected = if failed == 0 { None } else { Some(failed.min(n) - 1) };
                assert_eq!(last_committed, expected, "order {:?} failed {}", order, failed);
            }
        }
    }

    /// Test that completing an index twice changes nothing
    #[test]
    fn test_repeat_completion_is_ignored() {
        let mut mark = CommitWatermark::new();
        assert_eq!(mark.complete(0), Some(0));
        assert_eq!(mark.complete(0), None);
    }

    /// Test that commits go through to the store
    #[tokio::test]
    async fn test_progress_cursor_persists() {
        let store = Arc::new(MemoryStore::with_sources([TrackedSource::new(
            "feed",
            "json_feed",
            "https://example.com/feed",
        )]));
        let mut cursor = ProgressCursor::load(store.clone(), "feed").await.unwrap();
        assert_eq!(cursor.current(), "");

        cursor.commit("9").await.unwrap();
        assert_eq!(cursor.current(), "9");
        assert_eq!(store.get_cursor("feed").await.unwrap(), "9");
    }
}
