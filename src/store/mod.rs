//! Persistence layer: file-backed JSON documents.
//!
//! Every document (queue, ledger, cursor, artifact) is rewritten in full on
//! each durable mutation: serialize, write to a sibling temp file, fsync,
//! rename over the target. Readers therefore see either the old or the new
//! document, never a torn one.

pub mod artifacts;
pub mod cursor;
pub mod ledger;
pub mod queue;

pub use artifacts::{ArtifactStore, FileArtifactStore};
pub use cursor::CursorStore;
pub use ledger::Ledger;
pub use queue::DurableQueue;

use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::StoreError;

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// The file write runs on the blocking pool so callers on the async
/// scheduler never stall on disk I/O.
pub async fn write_json_atomic<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialization {
        path: path.to_path_buf(),
        source,
    })?;
    let target = path.to_path_buf();

    tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
        .await
        .map_err(|e| StoreError::Task {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
}

/// Read a JSON document. Returns `Ok(None)` when the file does not exist.
pub async fn read_json<T>(path: &Path) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
{
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::Serialization {
            path: path.to_path_buf(),
            source,
        })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(io_err)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document");
    let tmp_path = parent.join(format!(".{file_name}.tmp-{}", Uuid::new_v4().simple()));

    let result = (|| {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(io_err(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        write_json_atomic(&path, &vec!["a", "b"]).await.unwrap();
        let back: Option<Vec<String>> = read_json(&path).await.unwrap();
        assert_eq!(back, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let back: Option<Vec<String>> = read_json(&dir.path().join("nope.json")).await.unwrap();
        assert!(back.is_none());
    }

    #[tokio::test]
    async fn write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &1u32).await.unwrap();
        write_json_atomic(&path, &2u32).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["doc.json".to_string()]);
    }

    #[tokio::test]
    async fn creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/doc.json");
        write_json_atomic(&path, &true).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = read_json::<Vec<String>>(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
    }
}
