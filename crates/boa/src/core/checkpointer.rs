//! Model checkpointer
//!
//! Persists fitted surrogate state to a campaign-scoped directory. The
//! engine is the serializer; no cross-process locking is attempted here.
//! Filenames are unique by timestamp.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::db::models::JsonMap;
use crate::error::{BoaError, BoaResult};

/// On-disk checkpoint payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    pub state: Json,
    pub iteration_idx: i64,
    pub strategy_name: String,
    pub timestamp: String,
    #[serde(default)]
    pub metadata: JsonMap,
}

/// Saves and restores model checkpoints
pub struct ModelCheckpointer {
    checkpoint_dir: PathBuf,
    campaign_dir: PathBuf,
}

impl ModelCheckpointer {
    pub fn new(checkpoint_dir: impl Into<PathBuf>, campaign_id: Option<&str>) -> BoaResult<Self> {
        let checkpoint_dir = checkpoint_dir.into();
        let campaign_dir = match campaign_id {
            Some(campaign_id) => checkpoint_dir.join(campaign_id),
            None => checkpoint_dir.clone(),
        };
        std::fs::create_dir_all(&campaign_dir)?;
        Ok(Self {
            checkpoint_dir,
            campaign_dir,
        })
    }

    /// Save a checkpoint; returns its path relative to the checkpoint dir.
    pub fn save(
        &self,
        state: Json,
        iteration_idx: i64,
        strategy_name: &str,
        metadata: JsonMap,
    ) -> BoaResult<String> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let filename = format!(
            "checkpoint_iter{}_{}_{}.bin",
            iteration_idx, strategy_name, timestamp
        );
        let filepath = self.campaign_dir.join(&filename);

        let data = CheckpointData {
            state,
            iteration_idx,
            strategy_name: strategy_name.to_string(),
            timestamp,
            metadata,
        };
        let bytes = serde_json::to_vec(&data)?;
        std::fs::write(&filepath, bytes)?;

        tracing::info!("Saved checkpoint: {}", filepath.display());
        self.relative(&filepath)
    }

    /// Load a checkpoint by its relative path
    pub fn load(&self, path: &str) -> BoaResult<CheckpointData> {
        let filepath = self.checkpoint_dir.join(path);
        if !filepath.exists() {
            return Err(BoaError::not_found("checkpoint", path));
        }
        let bytes = std::fs::read(&filepath)?;
        let data = serde_json::from_slice(&bytes)?;
        tracing::info!("Loaded checkpoint: {}", filepath.display());
        Ok(data)
    }

    /// Load the most recent checkpoint by file mtime
    pub fn load_latest(&self, strategy_name: Option<&str>) -> BoaResult<Option<CheckpointData>> {
        let mut checkpoints = self.checkpoint_files(strategy_name)?;
        checkpoints.sort_by(|a, b| b.cmp(a));

        match checkpoints.first() {
            Some((_, path)) => {
                let relative = self.relative(path)?;
                Ok(Some(self.load(&relative)?))
            }
            None => Ok(None),
        }
    }

    /// Relative paths of all checkpoints, oldest first
    pub fn list(&self, strategy_name: Option<&str>) -> BoaResult<Vec<String>> {
        let mut checkpoints = self.checkpoint_files(strategy_name)?;
        checkpoints.sort();
        checkpoints
            .into_iter()
            .map(|(_, path)| self.relative(&path))
            .collect()
    }

    /// Remove the oldest checkpoints beyond `keep_latest`
    pub fn cleanup(&self, keep_latest: usize, strategy_name: Option<&str>) -> BoaResult<usize> {
        let mut checkpoints = self.checkpoint_files(strategy_name)?;
        checkpoints.sort_by(|a, b| b.cmp(a));

        let mut removed = 0;
        for (_, path) in checkpoints.into_iter().skip(keep_latest) {
            std::fs::remove_file(&path)?;
            tracing::info!("Removed old checkpoint: {}", path.display());
            removed += 1;
        }
        Ok(removed)
    }

    /// Checkpoint file size in bytes; 0 when absent
    pub fn get_file_size(&self, path: &str) -> u64 {
        std::fs::metadata(self.checkpoint_dir.join(path))
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn checkpoint_files(
        &self,
        strategy_name: Option<&str>,
    ) -> BoaResult<Vec<(std::time::SystemTime, PathBuf)>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.campaign_dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with("checkpoint_") || !name.ends_with(".bin") {
                continue;
            }
            if let Some(strategy) = strategy_name {
                if !name.contains(&format!("_{}_", strategy)) {
                    continue;
                }
            }
            let mtime = entry
                .metadata()?
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            files.push((mtime, path));
        }
        Ok(files)
    }

    fn relative(&self, path: &Path) -> BoaResult<String> {
        path.strip_prefix(&self.checkpoint_dir)
            .map(|p| p.to_string_lossy().to_string())
            .map_err(|e| BoaError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpointer() -> (tempfile::TempDir, ModelCheckpointer) {
        let dir = tempfile::tempdir().unwrap();
        let checkpointer = ModelCheckpointer::new(dir.path(), Some("campaign-1")).unwrap();
        (dir, checkpointer)
    }

    #[test]
    fn test_save_load_round_trip() {
        let (_dir, checkpointer) = checkpointer();

        let state = serde_json::json!({"lengthscale": 0.3, "kernel": "rbf"});
        let path = checkpointer
            .save(state.clone(), 2, "default", JsonMap::new())
            .unwrap();
        assert!(path.starts_with("campaign-1/"));
        assert!(path.contains("checkpoint_iter2_default_"));

        let loaded = checkpointer.load(&path).unwrap();
        assert_eq!(loaded.state, state);
        assert_eq!(loaded.iteration_idx, 2);
        assert_eq!(loaded.strategy_name, "default");
        assert!(checkpointer.get_file_size(&path) > 0);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let (_dir, checkpointer) = checkpointer();
        let err = checkpointer.load("campaign-1/nope.bin").unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_list_and_latest_with_strategy_filter() {
        let (_dir, checkpointer) = checkpointer();

        checkpointer
            .save(serde_json::json!({"n": 1}), 0, "alpha", JsonMap::new())
            .unwrap();
        checkpointer
            .save(serde_json::json!({"n": 2}), 1, "beta", JsonMap::new())
            .unwrap();
        checkpointer
            .save(serde_json::json!({"n": 3}), 2, "alpha", JsonMap::new())
            .unwrap();

        assert_eq!(checkpointer.list(None).unwrap().len(), 3);
        assert_eq!(checkpointer.list(Some("alpha")).unwrap().len(), 2);

        let latest = checkpointer.load_latest(Some("alpha")).unwrap().unwrap();
        assert_eq!(latest.iteration_idx, 2);
        assert!(checkpointer.load_latest(Some("gamma")).unwrap().is_none());
    }

    #[test]
    fn test_cleanup_keeps_latest() {
        let (_dir, checkpointer) = checkpointer();
        for i in 0..5 {
            checkpointer
                .save(serde_json::json!({"n": i}), i, "default", JsonMap::new())
                .unwrap();
        }

        let removed = checkpointer.cleanup(2, None).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(checkpointer.list(None).unwrap().len(), 2);
        let latest = checkpointer.load_latest(None).unwrap().unwrap();
        assert_eq!(latest.iteration_idx, 4);
    }
}
