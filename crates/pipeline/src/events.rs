//! Progress events emitted by a generation run.
//!
//! Events are immutable records pulled lazily from the stream returned by
//! [`crate::orchestrator::GenerationOrchestrator::run`]; consuming the
//! next event is what drives the run forward.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shotchain_core::plan::{PlanSummary, SkipReason};
use uuid::Uuid;

/// A state change observed during a generation run.
#[derive(Debug, Clone, Serialize)]
pub enum ProgressEvent {
    /// The run passed configuration checks and is about to process
    /// segments.
    RunStarted {
        plan_id: Uuid,
        total_segments: usize,
        at: DateTime<Utc>,
    },

    /// A segment's workflow was accepted by the backend.
    SegmentQueued {
        shot_id: String,
        segment_index: u32,
        job_id: String,
        at: DateTime<Utc>,
    },

    /// The backend reported the segment's job as executing.
    SegmentRunning {
        shot_id: String,
        segment_index: u32,
        at: DateTime<Utc>,
    },

    /// The segment's output was collected. `reused` marks results carried
    /// over from persisted state instead of a fresh submission.
    SegmentSucceeded {
        shot_id: String,
        segment_index: u32,
        output_path: PathBuf,
        reused: bool,
        at: DateTime<Utc>,
    },

    /// The segment failed (submission rejected, execution error, or poll
    /// timeout). Later segments of the same shot will be blocked.
    SegmentFailed {
        shot_id: String,
        segment_index: u32,
        error: String,
        at: DateTime<Utc>,
    },

    /// The segment was never submitted; see the reason.
    SegmentSkipped {
        shot_id: String,
        segment_index: u32,
        reason: SkipReason,
        at: DateTime<Utc>,
    },

    /// Persisting the plan failed; the run continues without durable
    /// resume guarantees. Emitted at most once per run.
    StatePersistFailed { error: String, at: DateTime<Utc> },

    /// A cooperative stop was honored at a segment boundary.
    RunStopped { at: DateTime<Utc> },

    /// The run aborted before submitting anything (configuration error).
    RunAborted { error: String, at: DateTime<Utc> },

    /// The run ended; every produced output remains addressable even when
    /// some segments failed.
    RunFinished {
        summary: PlanSummary,
        at: DateTime<Utc>,
    },
}
