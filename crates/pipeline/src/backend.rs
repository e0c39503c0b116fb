//! Generation backend seam.
//!
//! The orchestrator talks to the backend through [`GenerationBackend`]:
//! submit a filled workflow, then poll the returned job ID until it
//! reaches a terminal state. Polling is a pure status read and safely
//! repeatable. [`ComfyUiBackend`] is the production implementation over
//! the ComfyUI REST API; tests substitute in-memory fakes.

use std::path::PathBuf;

use async_trait::async_trait;
use shotchain_comfyui::api::ComfyUiApi;
use shotchain_comfyui::poll::resolve_output_paths;

/// Execution state reported by a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Accepted but not yet executing.
    Queued,
    /// Currently executing.
    Running,
    /// Finished; outputs are available.
    Succeeded,
    /// Rejected or failed during execution.
    Failed { reason: String },
}

/// One poll's snapshot of a submitted job.
#[derive(Debug, Clone)]
pub struct JobPoll {
    pub state: JobState,
    /// Produced media paths; populated only once the job succeeds.
    pub outputs: Vec<PathBuf>,
}

/// Errors from the backend seam.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend rejected the workflow submission.
    #[error("Workflow submission rejected: {0}")]
    Submit(String),

    /// A status poll could not be completed.
    #[error("Status poll failed: {0}")]
    Poll(String),
}

/// A remote service that executes filled workflow documents.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Submit a filled workflow for execution, returning its job ID.
    async fn submit(&self, workflow: &serde_json::Value) -> Result<String, BackendError>;

    /// Read the current state of a submitted job. Repeatable; no side
    /// effects beyond the status read.
    async fn poll(&self, job_id: &str) -> Result<JobPoll, BackendError>;
}

// ---------------------------------------------------------------------------
// ComfyUI implementation
// ---------------------------------------------------------------------------

/// [`GenerationBackend`] backed by a ComfyUI instance.
///
/// `submit` maps to `POST /prompt`; `poll` reads `GET /history/{id}` for
/// terminal states and falls back to `GET /queue` to distinguish running
/// from waiting prompts.
pub struct ComfyUiBackend {
    api: ComfyUiApi,
    /// Client ID sent with every submission so the server can correlate
    /// executions back to this orchestrator.
    client_id: String,
    /// The ComfyUI server's output directory; history entries reference
    /// files relative to it.
    output_root: PathBuf,
}

impl ComfyUiBackend {
    /// Create a backend for the ComfyUI server at `api_url`, whose output
    /// directory is `output_root`.
    pub fn new(api_url: String, output_root: impl Into<PathBuf>) -> Self {
        Self::with_api(ComfyUiApi::new(api_url), output_root)
    }

    /// Create a backend over an existing API client.
    pub fn with_api(api: ComfyUiApi, output_root: impl Into<PathBuf>) -> Self {
        Self {
            api,
            client_id: uuid::Uuid::new_v4().to_string(),
            output_root: output_root.into(),
        }
    }
}

#[async_trait]
impl GenerationBackend for ComfyUiBackend {
    async fn submit(&self, workflow: &serde_json::Value) -> Result<String, BackendError> {
        let response = self
            .api
            .submit_workflow(workflow, &self.client_id)
            .await
            .map_err(|e| BackendError::Submit(e.to_string()))?;

        tracing::info!(
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            "Workflow submitted to ComfyUI",
        );

        Ok(response.prompt_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobPoll, BackendError> {
        let history = self
            .api
            .history_entry(job_id)
            .await
            .map_err(|e| BackendError::Poll(e.to_string()))?;

        if let Some(entry) = history {
            if entry.is_error() {
                let reason = entry
                    .error_message()
                    .unwrap_or_else(|| "generation failed".to_string());
                return Ok(JobPoll {
                    state: JobState::Failed { reason },
                    outputs: Vec::new(),
                });
            }
            if entry.is_success() {
                let outputs = resolve_output_paths(&entry, &self.output_root);
                return Ok(JobPoll {
                    state: JobState::Succeeded,
                    outputs,
                });
            }
        }

        let queue = self
            .api
            .queue_state()
            .await
            .map_err(|e| BackendError::Poll(e.to_string()))?;

        let state = if queue.contains_running(job_id) {
            JobState::Running
        } else {
            // Pending in the queue, or just dequeued with the history
            // entry not yet written; either way not terminal.
            JobState::Queued
        };

        Ok(JobPoll {
            state,
            outputs: Vec::new(),
        })
    }
}
