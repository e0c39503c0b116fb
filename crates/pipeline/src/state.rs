//! Plan state persistence for crash/resume continuity.
//!
//! The store owns a single snapshot document: the full plan plus UI
//! continuity fields. Writes are atomic (serialize to a sibling temp file,
//! then rename), so a crash mid-write never corrupts the previous valid
//! snapshot. The file is single-writer: one orchestrator per project, and
//! saves happen synchronously inside the sequential run loop.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shotchain_core::plan::GenerationPlan;

/// Snapshot of a plan's progress plus UI continuity fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub plan: GenerationPlan,
    /// Most recently collected output, for UI continuity.
    pub last_output_path: Option<PathBuf>,
    pub saved_at: DateTime<Utc>,
}

impl PersistedState {
    /// Snapshot the given plan at the current time.
    pub fn snapshot(plan: &GenerationPlan, last_output_path: Option<&Path>) -> Self {
        Self {
            plan: plan.clone(),
            last_output_path: last_output_path.map(Path::to_path_buf),
            saved_at: Utc::now(),
        }
    }
}

/// Errors from the persistence seam.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("State I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A state file exists but cannot be parsed. Non-fatal: the
    /// orchestrator continues in memory-only mode.
    #[error("State file corrupt: {0}")]
    Corrupt(String),
}

/// Durable storage for [`PersistedState`].
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Atomically overwrite the stored snapshot.
    async fn save(&self, state: &PersistedState) -> Result<(), StoreError>;

    /// Load the stored snapshot. `Ok(None)` on first run or when no state
    /// file exists; errors only for a corrupt-but-present file.
    async fn load(&self) -> Result<Option<PersistedState>, StoreError>;
}

// ---------------------------------------------------------------------------
// JSON file implementation
// ---------------------------------------------------------------------------

/// [`StateStore`] writing pretty-printed JSON to a single file.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Write-to-temp then rename keeps the previous snapshot valid if
        // this write is interrupted.
        let temp = self.temp_path();
        tokio::fs::write(&temp, &json).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        tracing::debug!(path = %self.path.display(), "Plan state persisted");
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use uuid::Uuid;

    fn sample_state() -> PersistedState {
        PersistedState {
            plan: GenerationPlan {
                plan_id: Uuid::new_v4(),
                segments: Vec::new(),
            },
            last_output_path: Some("/out/intro_seg000.mp4".into()),
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("plan_state.json"));

        let state = sample_state();
        store.save(&state).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.plan.plan_id, state.plan.plan_id);
        assert_eq!(loaded.last_output_path, state.last_output_path);
    }

    #[tokio::test]
    async fn load_returns_none_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("plan_state.json"));

        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_file_surfaces_corrupt_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan_state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = JsonStateStore::new(&path);
        assert_matches!(store.load().await, Err(StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("plan_state.json"));

        let first = sample_state();
        let second = sample_state();
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.plan.plan_id, second.plan.plan_id);
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("plan_state.json"));

        store.save(&sample_state()).await.unwrap();
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn save_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("nested/deeper/plan_state.json"));

        store.save(&sample_state()).await.unwrap();
        assert!(store.load().await.unwrap().is_some());
    }
}
