//! Checkpoint storage for run state

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::state::RunState;
use crate::types::RunId;

/// Key-value persistence for run checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, run_id: RunId, state: &RunState) -> Result<(), StoreError>;

    /// `Ok(None)` if no checkpoint exists
    async fn load(&self, run_id: RunId) -> Result<Option<RunState>, StoreError>;

    async fn list(&self) -> Result<Vec<RunId>, StoreError>;

    /// Remove a checkpoint, returning whether one existed
    async fn delete(&self, run_id: RunId) -> Result<bool, StoreError>;
}

/// In-process store. Holds serialized snapshots so a loaded state never
/// aliases the one that was saved.
#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<RunId, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn save(&self, run_id: RunId, state: &RunState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state)?;
        self.runs.write().insert(run_id, json);
        Ok(())
    }

    async fn load(&self, run_id: RunId) -> Result<Option<RunState>, StoreError> {
        let json = self.runs.read().get(&run_id).cloned();
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<RunId>, StoreError> {
        let mut ids: Vec<RunId> = self.runs.read().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, run_id: RunId) -> Result<bool, StoreError> {
        Ok(self.runs.write().remove(&run_id).is_some())
    }
}

/// One pretty-printed JSON file per run under a directory.
///
/// Writes go to a `.tmp` sibling which is then renamed over the target, so a
/// crash mid-write leaves the previous checkpoint intact.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: RunId) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for JsonFileStore {
    async fn save(&self, run_id: RunId, state: &RunState) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(state)?;
        let path = self.path_for(run_id);
        let tmp = path.with_extension("tmp");

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&tmp, json.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(run_id = %run_id, path = %path.display(), "Saved checkpoint");
        Ok(())
    }

    async fn load(&self, run_id: RunId) -> Result<Option<RunState>, StoreError> {
        let path = self.path_for(run_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<RunId>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<RunId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, run_id: RunId) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.path_for(run_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
