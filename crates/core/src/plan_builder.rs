//! Plan building: temporal segmentation under a hard duration cap, plus
//! reconciliation of rebuilt plans against prior progress.
//!
//! Building is deterministic and side-effect-free. A shot without a
//! selected source image degrades to skipped segments; it never fails the
//! whole plan.

use std::collections::HashSet;

use uuid::Uuid;

use crate::error::CoreError;
use crate::plan::{GenerationPlan, PlanSegment, SegmentStatus, SkipReason};
use crate::types::{SelectionSet, Shot};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Hard ceiling on segments per shot to prevent runaway plans.
pub const MAX_SEGMENTS_PER_SHOT: u32 = 200;

/// Tolerance when deciding whether a shot duration is an exact multiple of
/// the segment cap, so float noise does not create a near-zero tail segment.
const EXACT_MULTIPLE_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Build an ordered generation plan from a shot list and its selections.
///
/// Each shot is cut into `max(1, ceil(duration / max_segment_seconds))`
/// segments: every segment takes the full cap except the last, which takes
/// the remainder (or the full cap again when the duration is an exact
/// multiple). Rounding the last segment up means total output duration may
/// exceed the request; it is never truncated.
///
/// Shots without a selection are emitted with every segment
/// `Skipped(MissingInput)` and no start frame.
pub fn build_plan(
    shots: &[Shot],
    selections: &SelectionSet,
    max_segment_seconds: f64,
) -> Result<GenerationPlan, CoreError> {
    if !max_segment_seconds.is_finite() || max_segment_seconds <= 0.0 {
        return Err(CoreError::Validation(format!(
            "max_segment_seconds must be a positive finite number, got {max_segment_seconds}"
        )));
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for shot in shots {
        validate_shot(shot)?;
        if !seen_ids.insert(&shot.shot_id) {
            return Err(CoreError::Validation(format!(
                "Duplicate shot_id '{}'",
                shot.shot_id
            )));
        }
    }

    let plan_id = Uuid::new_v4();
    let mut segments = Vec::new();

    for shot in shots {
        let durations = segment_durations(shot.duration_seconds, max_segment_seconds)?;
        let segment_total = durations.len() as u32;
        let selection = selections.source_for(&shot.shot_id);

        for (index, &duration) in durations.iter().enumerate() {
            let index = index as u32;
            let (status, start_frame_path) = match selection {
                Some(source) => {
                    let frame = (index == 0).then(|| source.to_path_buf());
                    (SegmentStatus::Pending, frame)
                }
                None => (
                    SegmentStatus::Skipped {
                        reason: SkipReason::MissingInput,
                    },
                    None,
                ),
            };

            segments.push(PlanSegment {
                plan_id,
                shot_id: shot.shot_id.clone(),
                segment_index: index,
                segment_total,
                start_seconds: index as f64 * max_segment_seconds,
                duration_seconds: duration,
                filename_base: shot.filename_base.clone(),
                prompt: shot.prompt.clone(),
                width: shot.width,
                height: shot.height,
                motion: shot.motion.clone(),
                start_frame_path,
                status,
                output_path: None,
            });
        }
    }

    Ok(GenerationPlan { plan_id, segments })
}

/// Cut a shot duration into capped segment durations.
///
/// All entries equal `max_segment_seconds` except possibly the last, which
/// takes the remainder. The entries always sum to `duration_seconds`.
fn segment_durations(
    duration_seconds: f64,
    max_segment_seconds: f64,
) -> Result<Vec<f64>, CoreError> {
    let ratio = duration_seconds / max_segment_seconds;
    let mut total = (ratio - EXACT_MULTIPLE_EPSILON).ceil().max(1.0) as u32;

    // Float noise can land the remainder a hair above the cap; absorb it by
    // adding one more segment rather than ever exceeding the cap.
    let mut remainder = duration_seconds - max_segment_seconds * (total - 1) as f64;
    if remainder > max_segment_seconds {
        total += 1;
        remainder = duration_seconds - max_segment_seconds * (total - 1) as f64;
    }

    if total > MAX_SEGMENTS_PER_SHOT {
        return Err(CoreError::Validation(format!(
            "Shot requires {total} segments, maximum is {MAX_SEGMENTS_PER_SHOT}"
        )));
    }

    let mut durations = vec![max_segment_seconds; (total - 1) as usize];
    durations.push(remainder);
    Ok(durations)
}

fn validate_shot(shot: &Shot) -> Result<(), CoreError> {
    if shot.shot_id.trim().is_empty() {
        return Err(CoreError::Validation("shot_id must not be empty".to_string()));
    }
    if shot.filename_base.trim().is_empty() {
        return Err(CoreError::Validation(format!(
            "Shot '{}' has an empty filename_base",
            shot.shot_id
        )));
    }
    if !shot.duration_seconds.is_finite() || shot.duration_seconds <= 0.0 {
        return Err(CoreError::Validation(format!(
            "Shot '{}' duration must be a positive finite number, got {}",
            shot.shot_id, shot.duration_seconds
        )));
    }
    if shot.width == 0 || shot.height == 0 {
        return Err(CoreError::Validation(format!(
            "Shot '{}' dimensions must be positive, got {}x{}",
            shot.shot_id, shot.width, shot.height
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Carry completed work from a prior plan into a freshly built one.
///
/// Segments are matched by `shot_id` + `segment_index`. Where the
/// segmentation is unchanged (same `segment_total` and planned duration), a
/// prior `Succeeded` segment's status, output, and start frame are
/// preserved so the work is not redone. Everything else keeps the fresh
/// plan's state.
pub fn reconcile_plans(mut fresh: GenerationPlan, prior: &GenerationPlan) -> GenerationPlan {
    for segment in &mut fresh.segments {
        let Some(previous) = prior
            .segments
            .iter()
            .find(|p| p.shot_id == segment.shot_id && p.segment_index == segment.segment_index)
        else {
            continue;
        };

        let segmentation_unchanged = previous.segment_total == segment.segment_total
            && (previous.duration_seconds - segment.duration_seconds).abs()
                < EXACT_MULTIPLE_EPSILON;

        if segmentation_unchanged && previous.status == SegmentStatus::Succeeded {
            segment.status = SegmentStatus::Succeeded;
            segment.output_path = previous.output_path.clone();
            segment.start_frame_path = previous.start_frame_path.clone();
        }
    }
    fresh
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
