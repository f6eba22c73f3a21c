//! Durable FIFO work queue with deduplicated insertion.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::pipeline::types::WorkItem;
use crate::store::{read_json, write_json_atomic};

struct QueueState {
    items: Vec<WorkItem>,
    dirty: bool,
}

/// Ordered pending items persisted as one JSON array.
///
/// Every mutation runs under the lock and rewrites the file before the lock
/// is released. A failed rewrite keeps the in-memory change and marks the
/// queue dirty so the next mutation (or [`flush_if_dirty`]) retries it.
///
/// [`flush_if_dirty`]: DurableQueue::flush_if_dirty
pub struct DurableQueue {
    path: PathBuf,
    state: Mutex<QueueState>,
}

impl DurableQueue {
    /// Load the queue from `path`. A missing file yields an empty queue.
    ///
    /// Duplicate IDs in a hand-edited file are collapsed, first one wins.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let loaded: Vec<WorkItem> = read_json(&path).await?.unwrap_or_default();

        let mut seen = HashSet::new();
        let before = loaded.len();
        let items: Vec<WorkItem> = loaded
            .into_iter()
            .filter(|item| seen.insert(item.interaction_id.clone()))
            .collect();
        if items.len() != before {
            tracing::warn!(
                path = %path.display(),
                dropped = before - items.len(),
                "Collapsed duplicate queue entries on load"
            );
        }

        tracing::info!(path = %path.display(), size = items.len(), "Queue loaded");
        Ok(Self {
            path,
            state: Mutex::new(QueueState {
                dirty: false,
                items,
            }),
        })
    }

    /// Append items whose IDs are not already queued. Returns how many were
    /// added. The file is only rewritten when something changed.
    pub async fn enqueue(&self, items: Vec<WorkItem>) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut present: HashSet<String> = state
            .items
            .iter()
            .map(|i| i.interaction_id.clone())
            .collect();

        let mut added = 0;
        for item in items {
            if present.insert(item.interaction_id.clone()) {
                state.items.push(item);
                added += 1;
            }
        }

        if added > 0 || state.dirty {
            self.persist(&mut state).await?;
        }
        Ok(added)
    }

    /// Snapshot of up to `n` items from the front.
    pub async fn peek_batch(&self, n: usize) -> Vec<WorkItem> {
        let state = self.state.lock().await;
        state.items.iter().take(n).cloned().collect()
    }

    /// Like [`peek_batch`](Self::peek_batch), but skips items whose ID is in
    /// `exclude` so they never take up a batch slot.
    pub async fn peek_batch_excluding(&self, n: usize, exclude: &HashSet<String>) -> Vec<WorkItem> {
        let state = self.state.lock().await;
        state
            .items
            .iter()
            .filter(|i| !exclude.contains(&i.interaction_id))
            .take(n)
            .cloned()
            .collect()
    }

    /// IDs of every queued item, front first.
    pub async fn ids(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.items.iter().map(|i| i.interaction_id.clone()).collect()
    }

    /// Remove every item whose ID is in `ids`. Returns how many were removed.
    pub async fn remove(&self, ids: &HashSet<String>) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock().await;
        let before = state.items.len();
        state.items.retain(|i| !ids.contains(&i.interaction_id));
        let removed = before - state.items.len();

        if removed > 0 || state.dirty {
            self.persist(&mut state).await?;
        }
        Ok(removed)
    }

    /// Record a transient failure on each queued item in `failures`
    /// (ID → error): bump `attempts` and keep the error text.
    pub async fn bump_attempts(&self, failures: &HashMap<String, String>) -> Result<(), StoreError> {
        if failures.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        let mut touched = false;
        for item in state.items.iter_mut() {
            if let Some(error) = failures.get(&item.interaction_id) {
                item.attempts = item.attempts.saturating_add(1);
                item.last_error = Some(error.clone());
                touched = true;
            }
        }
        if touched || state.dirty {
            self.persist(&mut state).await?;
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    /// Retry a previously failed write. No-op when the file is current.
    pub async fn flush_if_dirty(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.dirty {
            self.persist(&mut state).await?;
            tracing::info!(path = %self.path.display(), "Queue re-flushed after earlier failure");
        }
        Ok(())
    }

    async fn persist(&self, state: &mut QueueState) -> Result<(), StoreError> {
        match write_json_atomic(&self.path, &state.items).await {
            Ok(()) => {
                state.dirty = false;
                Ok(())
            }
            Err(e) => {
                state.dirty = true;
                tracing::error!(path = %self.path.display(), error = %e, "Failed to persist queue");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::test_item;

    fn ids(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn enqueue_skips_existing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path().join("q.json")).await.unwrap();

        let added = queue
            .enqueue(vec![test_item("1"), test_item("2"), test_item("1")])
            .await
            .unwrap();
        assert_eq!(added, 2);

        let added = queue.enqueue(vec![test_item("2"), test_item("3")]).await.unwrap();
        assert_eq!(added, 1);

        let batch: Vec<_> = queue
            .peek_batch(10)
            .await
            .into_iter()
            .map(|i| i.interaction_id)
            .collect();
        assert_eq!(batch, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");
        {
            let queue = DurableQueue::open(&path).await.unwrap();
            queue.enqueue(vec![test_item("a"), test_item("b")]).await.unwrap();
            queue.remove(&ids(&["a"])).await.unwrap();
        }

        let reopened = DurableQueue::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        assert_eq!(reopened.peek_batch(5).await[0].interaction_id, "b");
    }

    #[tokio::test]
    async fn peek_is_bounded_and_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path().join("q.json")).await.unwrap();
        queue
            .enqueue(vec![test_item("1"), test_item("2"), test_item("3")])
            .await
            .unwrap();

        assert_eq!(queue.peek_batch(2).await.len(), 2);
        assert_eq!(queue.peek_batch(2).await.len(), 2);
        assert_eq!(queue.len().await, 3);
    }

    #[tokio::test]
    async fn peek_excluding_fills_batch_past_skipped_ids() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path().join("q.json")).await.unwrap();
        queue
            .enqueue(vec![test_item("1"), test_item("2"), test_item("3")])
            .await
            .unwrap();

        let batch: Vec<_> = queue
            .peek_batch_excluding(2, &ids(&["1"]))
            .await
            .into_iter()
            .map(|i| i.interaction_id)
            .collect();
        assert_eq!(batch, vec!["2", "3"]);
        assert_eq!(queue.ids().await, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn remove_matches_anywhere_in_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path().join("q.json")).await.unwrap();
        queue
            .enqueue(vec![test_item("1"), test_item("2"), test_item("3")])
            .await
            .unwrap();

        let removed = queue.remove(&ids(&["3", "1", "missing"])).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(queue.peek_batch(5).await[0].interaction_id, "2");
    }

    #[tokio::test]
    async fn bump_attempts_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");
        let queue = DurableQueue::open(&path).await.unwrap();
        queue.enqueue(vec![test_item("x")]).await.unwrap();
        let failures = HashMap::from([("x".to_string(), "timeout".to_string())]);
        queue.bump_attempts(&failures).await.unwrap();
        queue.bump_attempts(&failures).await.unwrap();

        let reopened = DurableQueue::open(&path).await.unwrap();
        let item = &reopened.peek_batch(1).await[0];
        assert_eq!(item.attempts, 2);
        assert_eq!(item.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn failed_write_keeps_memory_and_heals() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"file, not a dir").unwrap();
        let path = blocker.join("q.json");

        // Parent is a regular file, so every write fails.
        let queue = DurableQueue {
            path: path.clone(),
            state: Mutex::new(QueueState {
                items: Vec::new(),
                dirty: false,
            }),
        };
        assert!(queue.enqueue(vec![test_item("1")]).await.is_err());
        assert_eq!(queue.len().await, 1);
        assert!(queue.state.lock().await.dirty);

        std::fs::remove_file(&blocker).unwrap();
        queue.flush_if_dirty().await.unwrap();
        assert!(!queue.state.lock().await.dirty);

        let reopened = DurableQueue::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_enqueues_never_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let queue = std::sync::Arc::new(
            DurableQueue::open(dir.path().join("q.json")).await.unwrap(),
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue((0..10).map(|i| test_item(&i.to_string())).collect())
                    .await
                    .unwrap()
            }));
        }
        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }
        assert_eq!(total, 10);
        assert_eq!(queue.len().await, 10);
    }
}
