//! Generation plan data model and per-segment status machine.
//!
//! A [`GenerationPlan`] is the ordered set of [`PlanSegment`]s derived from
//! a shot list. Segments are created once by the plan builder and mutated
//! only by the orchestrator (status and output fields); a plan is never
//! edited structurally, only superseded by rebuilding.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Segment status
// ---------------------------------------------------------------------------

/// Why a segment was skipped instead of generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The shot had no selected source image at plan-build time.
    MissingInput,
    /// A segment this one depends on did not succeed.
    Blocked,
}

/// Lifecycle state of a single segment.
///
/// `Pending -> Queued -> Running -> {Succeeded | Failed | Skipped}`.
/// Terminal states have no outgoing transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SegmentStatus {
    /// Not yet submitted to the backend.
    Pending,
    /// Submitted; waiting for the backend to pick it up.
    Queued,
    /// The backend reported the job as executing.
    Running,
    /// The produced media was collected into the output location.
    Succeeded,
    /// The backend rejected or failed the job, or polling timed out.
    Failed { reason: String },
    /// Never submitted; see [`SkipReason`].
    Skipped { reason: SkipReason },
}

impl SegmentStatus {
    /// True for states with no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SegmentStatus::Succeeded
                | SegmentStatus::Failed { .. }
                | SegmentStatus::Skipped { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Segments and plans
// ---------------------------------------------------------------------------

/// One bounded-duration generation job covering part of a shot.
///
/// Shot fields (`filename_base`, `prompt`, dimensions) are denormalized onto
/// the segment so a persisted plan is self-contained for resume without
/// re-reading the storyboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSegment {
    /// Plan this segment belongs to.
    pub plan_id: Uuid,
    /// Storyboard shot this segment covers.
    pub shot_id: String,
    /// Zero-based position within the shot.
    pub segment_index: u32,
    /// Total segments for this shot.
    pub segment_total: u32,
    /// Offset within the shot's logical timeline, in seconds.
    pub start_seconds: f64,
    /// Planned duration in seconds, never above the configured cap.
    pub duration_seconds: f64,
    /// Base name for this shot's output files.
    pub filename_base: String,
    /// Generation prompt text.
    pub prompt: String,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Motion metadata carried through from the shot, unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion: Option<serde_json::Value>,
    /// Seed still image. Set from the selection for index 0; resolved from
    /// the prior segment's output for later indices.
    pub start_frame_path: Option<PathBuf>,
    /// Current lifecycle state.
    pub status: SegmentStatus,
    /// Collected output media, set once the segment succeeds.
    pub output_path: Option<PathBuf>,
}

/// Tally of segment outcomes across a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Segments still pending, queued, or running.
    pub pending: usize,
}

/// Summary status derived from segment statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// No segment has left `Pending`.
    Pending,
    /// Some segments are active or partially resolved.
    InProgress,
    /// Every segment succeeded.
    Completed,
    /// Every segment is terminal, but some failed or were skipped.
    CompletedWithFailures,
}

/// The complete, ordered set of segments derived from a shot list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPlan {
    pub plan_id: Uuid,
    /// Segments in storyboard shot order; within a shot, by ascending
    /// `segment_index`. Segments of one shot are contiguous.
    pub segments: Vec<PlanSegment>,
}

impl GenerationPlan {
    /// Count segment outcomes.
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for segment in &self.segments {
            match segment.status {
                SegmentStatus::Succeeded => summary.succeeded += 1,
                SegmentStatus::Failed { .. } => summary.failed += 1,
                SegmentStatus::Skipped { .. } => summary.skipped += 1,
                SegmentStatus::Pending | SegmentStatus::Queued | SegmentStatus::Running => {
                    summary.pending += 1
                }
            }
        }
        summary
    }

    /// Derive the plan-level status from segment statuses.
    pub fn status(&self) -> PlanStatus {
        let summary = self.summary();
        let total = self.segments.len();

        if summary.pending == total {
            PlanStatus::Pending
        } else if summary.pending > 0 {
            PlanStatus::InProgress
        } else if summary.succeeded == total {
            PlanStatus::Completed
        } else {
            PlanStatus::CompletedWithFailures
        }
    }

    /// The segment preceding `position`, when it belongs to the same shot.
    ///
    /// Relies on the builder invariant that a shot's segments are contiguous
    /// and ordered by index.
    pub fn prior_in_shot(&self, position: usize) -> Option<&PlanSegment> {
        if position == 0 {
            return None;
        }
        let current = &self.segments[position];
        let prior = &self.segments[position - 1];
        (prior.shot_id == current.shot_id).then_some(prior)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(shot_id: &str, index: u32, status: SegmentStatus) -> PlanSegment {
        PlanSegment {
            plan_id: Uuid::nil(),
            shot_id: shot_id.to_string(),
            segment_index: index,
            segment_total: 2,
            start_seconds: index as f64 * 3.0,
            duration_seconds: 3.0,
            filename_base: "clip".to_string(),
            prompt: "a prompt".to_string(),
            width: 1280,
            height: 720,
            motion: None,
            start_frame_path: None,
            status,
            output_path: None,
        }
    }

    fn plan(segments: Vec<PlanSegment>) -> GenerationPlan {
        GenerationPlan {
            plan_id: Uuid::nil(),
            segments,
        }
    }

    // -- terminal states -----------------------------------------------------

    #[test]
    fn terminal_states() {
        assert!(SegmentStatus::Succeeded.is_terminal());
        assert!(SegmentStatus::Failed {
            reason: "boom".into()
        }
        .is_terminal());
        assert!(SegmentStatus::Skipped {
            reason: SkipReason::Blocked
        }
        .is_terminal());
    }

    #[test]
    fn active_states_not_terminal() {
        assert!(!SegmentStatus::Pending.is_terminal());
        assert!(!SegmentStatus::Queued.is_terminal());
        assert!(!SegmentStatus::Running.is_terminal());
    }

    // -- summary and plan status ---------------------------------------------

    #[test]
    fn summary_counts_each_bucket() {
        let plan = plan(vec![
            segment("a", 0, SegmentStatus::Succeeded),
            segment("a", 1, SegmentStatus::Failed { reason: "x".into() }),
            segment(
                "b",
                0,
                SegmentStatus::Skipped {
                    reason: SkipReason::MissingInput,
                },
            ),
            segment("c", 0, SegmentStatus::Running),
        ]);

        let summary = plan.summary();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.pending, 1);
    }

    #[test]
    fn status_pending_when_untouched() {
        let plan = plan(vec![
            segment("a", 0, SegmentStatus::Pending),
            segment("a", 1, SegmentStatus::Pending),
        ]);
        assert_eq!(plan.status(), PlanStatus::Pending);
    }

    #[test]
    fn status_in_progress_when_partially_resolved() {
        let plan = plan(vec![
            segment("a", 0, SegmentStatus::Succeeded),
            segment("a", 1, SegmentStatus::Pending),
        ]);
        assert_eq!(plan.status(), PlanStatus::InProgress);
    }

    #[test]
    fn status_completed_when_all_succeeded() {
        let plan = plan(vec![
            segment("a", 0, SegmentStatus::Succeeded),
            segment("a", 1, SegmentStatus::Succeeded),
        ]);
        assert_eq!(plan.status(), PlanStatus::Completed);
    }

    #[test]
    fn status_completed_with_failures_when_any_failed_or_skipped() {
        let plan = plan(vec![
            segment("a", 0, SegmentStatus::Succeeded),
            segment("a", 1, SegmentStatus::Failed { reason: "x".into() }),
        ]);
        assert_eq!(plan.status(), PlanStatus::CompletedWithFailures);
    }

    // -- prior_in_shot -------------------------------------------------------

    #[test]
    fn prior_in_shot_within_same_shot() {
        let plan = plan(vec![
            segment("a", 0, SegmentStatus::Succeeded),
            segment("a", 1, SegmentStatus::Pending),
        ]);
        let prior = plan.prior_in_shot(1).unwrap();
        assert_eq!(prior.segment_index, 0);
    }

    #[test]
    fn prior_in_shot_none_at_shot_boundary() {
        let plan = plan(vec![
            segment("a", 0, SegmentStatus::Succeeded),
            segment("b", 0, SegmentStatus::Pending),
        ]);
        assert!(plan.prior_in_shot(1).is_none());
        assert!(plan.prior_in_shot(0).is_none());
    }

    // -- serialization -------------------------------------------------------

    #[test]
    fn status_roundtrip_preserves_variant_payloads() {
        let statuses = vec![
            SegmentStatus::Pending,
            SegmentStatus::Queued,
            SegmentStatus::Running,
            SegmentStatus::Succeeded,
            SegmentStatus::Failed {
                reason: "poll timeout".into(),
            },
            SegmentStatus::Skipped {
                reason: SkipReason::Blocked,
            },
        ];

        for status in statuses {
            let json = serde_json::to_string(&status).unwrap();
            let back: SegmentStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
        }
    }
}
