//! Append-only set of completed interaction IDs.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::store::{read_json, write_json_atomic};

struct LedgerState {
    completed: BTreeSet<String>,
    dirty: bool,
}

/// Durable record of finished work. IDs are never removed.
///
/// Persisted as a sorted JSON array of strings so the file diffs cleanly.
pub struct Ledger {
    path: PathBuf,
    state: Mutex<LedgerState>,
}

impl Ledger {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let completed: BTreeSet<String> = read_json::<Vec<String>>(&path)
            .await?
            .unwrap_or_default()
            .into_iter()
            .collect();

        tracing::info!(path = %path.display(), completed = completed.len(), "Ledger loaded");
        Ok(Self {
            path,
            state: Mutex::new(LedgerState {
                completed,
                dirty: false,
            }),
        })
    }

    /// Union `ids` into the completed set and flush. Returns the number of
    /// IDs that were new.
    ///
    /// On a flush failure the IDs stay in memory and the ledger is marked
    /// dirty; callers must not treat the IDs as durable until a later flush
    /// succeeds.
    pub async fn mark_completed<I, S>(&self, ids: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        let mut added = 0;
        for id in ids {
            if state.completed.insert(id.into()) {
                added += 1;
            }
        }

        if added > 0 || state.dirty {
            self.persist(&mut state).await?;
        }
        Ok(added)
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.state.lock().await.completed.contains(id)
    }

    /// The subset of `ids` already recorded as completed.
    pub async fn completed_among<'a, I>(&self, ids: I) -> HashSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let state = self.state.lock().await;
        ids.into_iter()
            .filter(|id| state.completed.contains(*id))
            .map(str::to_string)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.completed.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.completed.is_empty()
    }

    /// Whether the file is behind the in-memory set.
    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }

    pub async fn flush_if_dirty(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.dirty {
            self.persist(&mut state).await?;
            tracing::info!(path = %self.path.display(), "Ledger re-flushed after earlier failure");
        }
        Ok(())
    }

    async fn persist(&self, state: &mut LedgerState) -> Result<(), StoreError> {
        match write_json_atomic(&self.path, &state.completed).await {
            Ok(()) => {
                state.dirty = false;
                Ok(())
            }
            Err(e) => {
                state.dirty = true;
                tracing::error!(path = %self.path.display(), error = %e, "Failed to persist ledger");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("ledger.json")).await.unwrap();
        assert!(ledger.is_empty().await);
        assert!(!ledger.contains("1").await);
    }

    #[tokio::test]
    async fn marking_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("ledger.json")).await.unwrap();

        assert_eq!(ledger.mark_completed(["a", "b"]).await.unwrap(), 2);
        assert_eq!(ledger.mark_completed(["b", "c"]).await.unwrap(), 1);
        assert_eq!(ledger.len().await, 3);
    }

    #[tokio::test]
    async fn persisted_as_sorted_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = Ledger::open(&path).await.unwrap();
        ledger.mark_completed(["z", "a", "m"]).await.unwrap();

        let raw: Vec<String> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw, vec!["a", "m", "z"]);

        let reopened = Ledger::open(&path).await.unwrap();
        assert!(reopened.contains("m").await);
    }

    #[tokio::test]
    async fn completed_among_filters() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("ledger.json")).await.unwrap();
        ledger.mark_completed(["1", "3"]).await.unwrap();

        let done = ledger.completed_among(["1", "2", "3"]).await;
        assert_eq!(done.len(), 2);
        assert!(done.contains("1") && done.contains("3"));
    }

    #[tokio::test]
    async fn failed_flush_keeps_ids_and_marks_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"x").unwrap();

        let ledger = Ledger {
            path: blocker.join("ledger.json"),
            state: Mutex::new(LedgerState {
                completed: BTreeSet::new(),
                dirty: false,
            }),
        };
        assert!(ledger.mark_completed(["1"]).await.is_err());
        assert!(ledger.contains("1").await);
        assert!(ledger.is_dirty().await);

        std::fs::remove_file(&blocker).unwrap();
        ledger.flush_if_dirty().await.unwrap();
        assert!(!ledger.is_dirty().await);
    }
}
