//! Per-item result artifact sink.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::pipeline::artifact::ResultArtifact;
use crate::store::write_json_atomic;

/// Where finished artifacts land. Writes are keyed by interaction ID and
/// overwrite, so re-running an item produces the same single document.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn write(&self, artifact: &ResultArtifact) -> Result<(), StoreError>;
}

/// Writes `{dir}/{interaction_id}.json`.
pub struct FileArtifactStore {
    dir: PathBuf,
}

impl FileArtifactStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, interaction_id: &str) -> Result<PathBuf, StoreError> {
        validate_key(interaction_id)?;
        Ok(self.dir.join(format!("{interaction_id}.json")))
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn write(&self, artifact: &ResultArtifact) -> Result<(), StoreError> {
        let path = self.path_for(&artifact.interaction_id)?;
        write_json_atomic(&path, artifact).await?;
        tracing::debug!(interaction_id = %artifact.interaction_id, path = %path.display(), "Artifact written");
        Ok(())
    }
}

/// IDs become file names, so anything that could escape the output dir is
/// refused.
fn validate_key(id: &str) -> Result<(), StoreError> {
    let trimmed = id.trim();
    if trimmed.is_empty()
        || trimmed != id
        || id.contains(['/', '\\', '\0'])
        || id.contains("..")
    {
        return Err(StoreError::InvalidKey(id.to_string()));
    }
    Ok(())
}
