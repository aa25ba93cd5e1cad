//! Model checkpointing: a single JSON file written via write-then-rename
//! so a crash never leaves a partially-written checkpoint on disk.

use chrono::{DateTime, Utc};
use fl_common::{FlError, Parameters};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub parameters: Parameters,
    pub round: u64,
    pub timestamp: DateTime<Utc>,
    pub model_name: String,
    pub dataset: String,
}

impl Checkpoint {
    /// Write to `{path}.tmp` then rename over `path`, so readers only ever
    /// see a complete file.
    pub async fn save(&self, path: &str) -> Result<(), FlError> {
        let tmp_path = format!("{path}.tmp");
        if let Some(parent) = std::path::Path::new(path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FlError::Storage(e.to_string()))?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(|e| FlError::Storage(e.to_string()))?;
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| FlError::Storage(e.to_string()))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| FlError::Storage(e.to_string()))?;
        Ok(())
    }

    /// `Ok(None)` for a missing file (first run); `Ok(Some)` only when the
    /// file parses. Tag compatibility with `(model, dataset)` is the
    /// caller's responsibility.
    pub async fn load(path: &str) -> Result<Option<Checkpoint>, FlError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let checkpoint = serde_json::from_slice(&bytes)
                    .map_err(|e| FlError::Storage(e.to_string()))?;
                Ok(Some(checkpoint))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FlError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let path = path.to_str().unwrap();

        let checkpoint = Checkpoint {
            parameters: vec![vec![1.0, 2.0], vec![3.0]],
            round: 4,
            timestamp: Utc::now(),
            model_name: "resnet".to_string(),
            dataset: "cifar10".to_string(),
        };
        checkpoint.save(path).await.unwrap();

        let loaded = Checkpoint::load(path).await.unwrap().unwrap();
        assert_eq!(loaded.parameters, checkpoint.parameters);
        assert_eq!(loaded.round, 4);
        assert_eq!(loaded.model_name, "resnet");
    }

    #[tokio::test]
    async fn missing_checkpoint_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let loaded = Checkpoint::load(path.to_str().unwrap()).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let checkpoint = Checkpoint {
            parameters: vec![vec![1.0]],
            round: 1,
            timestamp: Utc::now(),
            model_name: "m".to_string(),
            dataset: "d".to_string(),
        };
        checkpoint.save(path.to_str().unwrap()).await.unwrap();

        let tmp = dir.path().join("checkpoint.json.tmp");
        assert!(!tmp.exists());
    }
}
