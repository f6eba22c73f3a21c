//! Persisted pull watermark.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{read_json, write_json_atomic};

#[derive(Debug, Serialize, Deserialize)]
struct CursorDocument {
    last_pull_time: DateTime<Utc>,
}

/// File holding `{"last_pull_time": "<rfc3339>"}`.
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read the stored cursor. A missing or unreadable file yields `None`,
    /// which makes the next pull fall back to the lookback window.
    pub async fn load(&self) -> Option<DateTime<Utc>> {
        match read_json::<CursorDocument>(&self.path).await {
            Ok(doc) => doc.map(|d| d.last_pull_time),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable pull cursor");
                None
            }
        }
    }

    pub async fn save(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        write_json_atomic(&self.path, &CursorDocument { last_pull_time: at }).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::new(dir.path().join("cursor.json"));
        assert!(store.load().await.is_none());

        let at = Utc.with_ymd_and_hms(2025, 5, 12, 9, 30, 0).unwrap();
        store.save(at).await.unwrap();
        assert_eq!(store.load().await, Some(at));
    }

    #[tokio::test]
    async fn corrupt_cursor_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        std::fs::write(&path, br#"{"last_pull_time": "yesterday"}"#).unwrap();
        assert!(CursorStore::new(&path).load().await.is_none());
    }
}
