//! Sequential generation run loop.
//!
//! [`GenerationOrchestrator`] consumes a plan one segment at a time: it
//! resolves the chained seed frame, fills the workflow template, submits
//! the job, polls it to a terminal state, collects the output under a
//! deterministic name, and persists the full plan after every transition.
//! The backend is a single shared GPU-bound execution slot, so segments
//! are never run in parallel, even across independent shots.
//!
//! [`run`](GenerationOrchestrator::run) returns a lazy stream of
//! [`ProgressEvent`]s; pulling the next event is what drives the run.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_stream::stream;
use chrono::Utc;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use shotchain_core::naming::segment_output_filename;
use shotchain_core::plan::{GenerationPlan, PlanSegment, SegmentStatus, SkipReason};
use shotchain_core::plan_builder::reconcile_plans;
use shotchain_core::workflow::{SlotValues, WorkflowTemplate};

use crate::backend::{GenerationBackend, JobState};
use crate::events::ProgressEvent;
use crate::extractor::{frame_cache_key, FrameExtractor, LAST_FRAME_EPSILON_SECS};
use crate::settings::RunSettings;
use crate::state::{PersistedState, StateStore};

/// Cooperative stop signal for a running orchestrator.
///
/// Obtain one via [`GenerationOrchestrator::stop_handle`] before calling
/// `run`. Stopping takes effect at the next segment boundary; a segment
/// already running against the backend is allowed to finish or fail on
/// its own, since the backend is not assumed to expose a cancel
/// primitive.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    /// Request a stop at the next segment boundary.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Result of polling one submitted job to its end.
enum PollOutcome {
    Succeeded(Vec<PathBuf>),
    Failed(String),
    TimedOut,
}

/// How the chained seed frame for a segment resolved.
enum FrameResolution {
    Ready(PathBuf),
    Blocked(String),
}

/// Drives a [`GenerationPlan`] against an injected backend, frame
/// extractor, and state store.
pub struct GenerationOrchestrator<B, X, S> {
    backend: B,
    extractor: X,
    store: S,
    template: WorkflowTemplate,
    settings: RunSettings,
    cancel: CancellationToken,
}

impl<B, X, S> GenerationOrchestrator<B, X, S>
where
    B: GenerationBackend,
    X: FrameExtractor,
    S: StateStore,
{
    pub fn new(
        backend: B,
        extractor: X,
        store: S,
        template: WorkflowTemplate,
        settings: RunSettings,
    ) -> Self {
        Self {
            backend,
            extractor,
            store,
            template,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Handle for requesting a cooperative stop while the run stream is
    /// being consumed.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.cancel.clone(),
        }
    }

    /// Execute the plan, yielding progress events as they happen.
    ///
    /// Configuration problems (settings, template slots) abort the run
    /// before anything is submitted. Per-segment failures never halt the
    /// run: independent shots continue, and only later segments of the
    /// same shot cascade to `Skipped(Blocked)`. After every status
    /// transition the full plan is persisted, so a crash loses at most
    /// the in-flight segment's progress.
    pub fn run(self, plan: GenerationPlan) -> impl Stream<Item = ProgressEvent> + Send {
        stream! {
            let mut plan = plan;

            if let Err(e) = self.settings.validate() {
                tracing::error!(error = %e, "Run settings rejected");
                yield ProgressEvent::RunAborted { error: e.to_string(), at: Utc::now() };
                return;
            }
            if let Err(e) = self.template.validate() {
                tracing::error!(error = %e, "Workflow template rejected");
                yield ProgressEvent::RunAborted { error: e.to_string(), at: Utc::now() };
                return;
            }

            // Chained segments cannot be seeded without a decoder; warn
            // early, but let the run proceed so first segments (and
            // resumed results) still complete.
            if !self.extractor.is_available().await {
                tracing::warn!("Frame extraction unavailable; chained segments will be blocked");
            }

            let mut persist_enabled = true;
            let mut last_output: Option<PathBuf> = None;

            // Resume: carry completed work over from a prior snapshot. A
            // corrupt snapshot is surfaced but never fatal.
            match self.store.load().await {
                Ok(Some(prior)) => {
                    tracing::info!(
                        prior_plan_id = %prior.plan.plan_id,
                        "Reconciling plan against persisted state",
                    );
                    last_output = prior.last_output_path.clone();
                    plan = reconcile_plans(plan, &prior.plan);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Persisted state unreadable; starting fresh");
                    yield ProgressEvent::StatePersistFailed {
                        error: e.to_string(),
                        at: Utc::now(),
                    };
                }
            }

            // One seed per run: fixed from settings, or drawn once so all
            // segments of the run share it.
            let seed = match self.settings.seed {
                Some(seed) => seed,
                None => u64::from(rand::random::<u32>()),
            };

            tracing::info!(
                plan_id = %plan.plan_id,
                total_segments = plan.segments.len(),
                seed,
                "Starting generation run",
            );
            yield ProgressEvent::RunStarted {
                plan_id: plan.plan_id,
                total_segments: plan.segments.len(),
                at: Utc::now(),
            };

            for position in 0..plan.segments.len() {
                // Cooperative stop, checked between segment transitions.
                if self.cancel.is_cancelled() {
                    tracing::info!("Stop requested; ending run at segment boundary");
                    yield ProgressEvent::RunStopped { at: Utc::now() };
                    break;
                }

                let shot_id = plan.segments[position].shot_id.clone();
                let segment_index = plan.segments[position].segment_index;

                // Replay terminal outcomes (builder skips, resumed
                // results) without touching the backend.
                match plan.segments[position].status.clone() {
                    SegmentStatus::Succeeded => {
                        if let Some(output) = plan.segments[position].output_path.clone() {
                            last_output = Some(output.clone());
                            yield ProgressEvent::SegmentSucceeded {
                                shot_id,
                                segment_index,
                                output_path: output,
                                reused: true,
                                at: Utc::now(),
                            };
                        }
                        continue;
                    }
                    SegmentStatus::Failed { reason } => {
                        yield ProgressEvent::SegmentFailed {
                            shot_id,
                            segment_index,
                            error: reason,
                            at: Utc::now(),
                        };
                        continue;
                    }
                    SegmentStatus::Skipped { reason } => {
                        yield ProgressEvent::SegmentSkipped {
                            shot_id,
                            segment_index,
                            reason,
                            at: Utc::now(),
                        };
                        continue;
                    }
                    SegmentStatus::Pending | SegmentStatus::Queued | SegmentStatus::Running => {}
                }

                // Queued/Running here means a previous run crashed
                // mid-segment. The job id was not kept, so the segment is
                // re-run from scratch and its stale frame-cache entry
                // dropped.
                if plan.segments[position].status != SegmentStatus::Pending {
                    let key = frame_cache_key(plan.plan_id, &shot_id, segment_index);
                    if let Err(e) = self.extractor.invalidate(&key).await {
                        tracing::warn!(error = %e, "Failed to drop stale frame cache entry");
                    }
                    plan.segments[position].status = SegmentStatus::Pending;
                }

                // Resolve the seed frame: the selection for index 0, the
                // prior segment's extracted last frame otherwise.
                let start_frame = match self.resolve_start_frame(&plan, position).await {
                    FrameResolution::Ready(path) => path,
                    FrameResolution::Blocked(why) => {
                        tracing::warn!(
                            shot_id = %shot_id,
                            segment_index,
                            reason = %why,
                            "Segment blocked",
                        );
                        plan.segments[position].status = SegmentStatus::Skipped {
                            reason: SkipReason::Blocked,
                        };
                        if let Some(error) = self
                            .persist(&plan, last_output.as_deref(), &mut persist_enabled)
                            .await
                        {
                            yield ProgressEvent::StatePersistFailed { error, at: Utc::now() };
                        }
                        yield ProgressEvent::SegmentSkipped {
                            shot_id,
                            segment_index,
                            reason: SkipReason::Blocked,
                            at: Utc::now(),
                        };
                        continue;
                    }
                };
                plan.segments[position].start_frame_path = Some(start_frame.clone());

                // Fill the template. validate() passed up front, so a
                // failure here is a configuration bug worth aborting on.
                let values = SlotValues {
                    prompt: plan.segments[position].prompt.clone(),
                    width: plan.segments[position].width,
                    height: plan.segments[position].height,
                    start_frame_path: start_frame,
                    fps: self.settings.fps,
                    duration_seconds: plan.segments[position].duration_seconds,
                    seed,
                };
                let workflow = match self.template.fill(&values) {
                    Ok(workflow) => workflow,
                    Err(e) => {
                        tracing::error!(error = %e, "Template fill failed after validation");
                        yield ProgressEvent::RunAborted { error: e.to_string(), at: Utc::now() };
                        return;
                    }
                };

                // Submit. A rejection fails this segment only.
                let job_id = match self.backend.submit(&workflow).await {
                    Ok(job_id) => job_id,
                    Err(e) => {
                        tracing::warn!(
                            shot_id = %shot_id,
                            segment_index,
                            error = %e,
                            "Submission rejected",
                        );
                        plan.segments[position].status = SegmentStatus::Failed {
                            reason: e.to_string(),
                        };
                        if let Some(error) = self
                            .persist(&plan, last_output.as_deref(), &mut persist_enabled)
                            .await
                        {
                            yield ProgressEvent::StatePersistFailed { error, at: Utc::now() };
                        }
                        yield ProgressEvent::SegmentFailed {
                            shot_id,
                            segment_index,
                            error: e.to_string(),
                            at: Utc::now(),
                        };
                        continue;
                    }
                };

                plan.segments[position].status = SegmentStatus::Queued;
                if let Some(error) = self
                    .persist(&plan, last_output.as_deref(), &mut persist_enabled)
                    .await
                {
                    yield ProgressEvent::StatePersistFailed { error, at: Utc::now() };
                }
                yield ProgressEvent::SegmentQueued {
                    shot_id: shot_id.clone(),
                    segment_index,
                    job_id: job_id.clone(),
                    at: Utc::now(),
                };

                // Poll until terminal, bounded by the configured timeout.
                // No retry of failed jobs: generation is expensive and has
                // no idempotency key, so a retry risks duplicate compute.
                let poll_started = Instant::now();
                let mut delay = self.settings.backoff.initial_delay;
                let outcome = loop {
                    if poll_started.elapsed() >= self.settings.poll_timeout {
                        break PollOutcome::TimedOut;
                    }
                    match self.backend.poll(&job_id).await {
                        Ok(poll) => match poll.state {
                            JobState::Succeeded => break PollOutcome::Succeeded(poll.outputs),
                            JobState::Failed { reason } => break PollOutcome::Failed(reason),
                            JobState::Running => {
                                if plan.segments[position].status != SegmentStatus::Running {
                                    plan.segments[position].status = SegmentStatus::Running;
                                    if let Some(error) = self
                                        .persist(&plan, last_output.as_deref(), &mut persist_enabled)
                                        .await
                                    {
                                        yield ProgressEvent::StatePersistFailed {
                                            error,
                                            at: Utc::now(),
                                        };
                                    }
                                    yield ProgressEvent::SegmentRunning {
                                        shot_id: shot_id.clone(),
                                        segment_index,
                                        at: Utc::now(),
                                    };
                                }
                            }
                            JobState::Queued => {}
                        },
                        Err(e) => {
                            // Polling is a repeatable status read; transient
                            // failures are retried until the timeout.
                            tracing::warn!(job_id = %job_id, error = %e, "Poll failed; retrying");
                        }
                    }
                    tokio::time::sleep(delay).await;
                    delay = self.settings.backoff.next_delay(delay);
                };

                match outcome {
                    PollOutcome::Succeeded(outputs) => {
                        match self.collect_output(&plan.segments[position], &outputs).await {
                            Ok(collected) => {
                                tracing::info!(
                                    shot_id = %shot_id,
                                    segment_index,
                                    output = %collected.display(),
                                    "Segment succeeded",
                                );
                                plan.segments[position].status = SegmentStatus::Succeeded;
                                plan.segments[position].output_path = Some(collected.clone());
                                last_output = Some(collected.clone());
                                if let Some(error) = self
                                    .persist(&plan, last_output.as_deref(), &mut persist_enabled)
                                    .await
                                {
                                    yield ProgressEvent::StatePersistFailed { error, at: Utc::now() };
                                }
                                yield ProgressEvent::SegmentSucceeded {
                                    shot_id,
                                    segment_index,
                                    output_path: collected,
                                    reused: false,
                                    at: Utc::now(),
                                };
                            }
                            Err(why) => {
                                tracing::warn!(
                                    shot_id = %shot_id,
                                    segment_index,
                                    error = %why,
                                    "Failed to collect segment output",
                                );
                                plan.segments[position].status = SegmentStatus::Failed {
                                    reason: why.clone(),
                                };
                                if let Some(error) = self
                                    .persist(&plan, last_output.as_deref(), &mut persist_enabled)
                                    .await
                                {
                                    yield ProgressEvent::StatePersistFailed { error, at: Utc::now() };
                                }
                                yield ProgressEvent::SegmentFailed {
                                    shot_id,
                                    segment_index,
                                    error: why,
                                    at: Utc::now(),
                                };
                            }
                        }
                    }
                    PollOutcome::Failed(reason) => {
                        tracing::warn!(
                            shot_id = %shot_id,
                            segment_index,
                            reason = %reason,
                            "Segment failed",
                        );
                        plan.segments[position].status = SegmentStatus::Failed {
                            reason: reason.clone(),
                        };
                        if let Some(error) = self
                            .persist(&plan, last_output.as_deref(), &mut persist_enabled)
                            .await
                        {
                            yield ProgressEvent::StatePersistFailed { error, at: Utc::now() };
                        }
                        yield ProgressEvent::SegmentFailed {
                            shot_id,
                            segment_index,
                            error: reason,
                            at: Utc::now(),
                        };
                    }
                    PollOutcome::TimedOut => {
                        let reason = format!(
                            "job did not reach a terminal state within {:?}",
                            self.settings.poll_timeout
                        );
                        tracing::warn!(
                            shot_id = %shot_id,
                            segment_index,
                            job_id = %job_id,
                            "Poll timeout",
                        );
                        plan.segments[position].status = SegmentStatus::Failed {
                            reason: reason.clone(),
                        };
                        if let Some(error) = self
                            .persist(&plan, last_output.as_deref(), &mut persist_enabled)
                            .await
                        {
                            yield ProgressEvent::StatePersistFailed { error, at: Utc::now() };
                        }
                        yield ProgressEvent::SegmentFailed {
                            shot_id,
                            segment_index,
                            error: reason,
                            at: Utc::now(),
                        };
                    }
                }
            }

            let summary = plan.summary();
            tracing::info!(
                plan_id = %plan.plan_id,
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                pending = summary.pending,
                "Generation run finished",
            );
            yield ProgressEvent::RunFinished { summary, at: Utc::now() };
        }
    }

    // ---- private helpers ----

    /// Persist the full plan, degrading to memory-only mode on failure.
    ///
    /// Returns the error text on the first failure so the run loop can
    /// surface it once; subsequent calls are no-ops.
    async fn persist(
        &self,
        plan: &GenerationPlan,
        last_output: Option<&Path>,
        enabled: &mut bool,
    ) -> Option<String> {
        if !*enabled {
            return None;
        }
        let state = PersistedState::snapshot(plan, last_output);
        match self.store.save(&state).await {
            Ok(()) => None,
            Err(e) => {
                *enabled = false;
                tracing::warn!(
                    error = %e,
                    "State persistence failed; continuing without durable resume",
                );
                Some(e.to_string())
            }
        }
    }

    /// Resolve the seed frame for the segment at `position`.
    ///
    /// Index 0 uses the selection frame recorded at build time. Later
    /// indices require the prior segment to have succeeded; its output's
    /// last frame (duration minus a small epsilon) becomes the seed.
    async fn resolve_start_frame(
        &self,
        plan: &GenerationPlan,
        position: usize,
    ) -> FrameResolution {
        let segment = &plan.segments[position];

        if segment.segment_index == 0 {
            return match &segment.start_frame_path {
                Some(path) => FrameResolution::Ready(path.clone()),
                None => FrameResolution::Blocked("no seed image recorded".to_string()),
            };
        }

        let Some(prior) = plan.prior_in_shot(position) else {
            return FrameResolution::Blocked("prior segment missing from plan".to_string());
        };
        if prior.status != SegmentStatus::Succeeded {
            return FrameResolution::Blocked(format!(
                "segment {} did not succeed",
                prior.segment_index
            ));
        }
        let Some(output) = prior.output_path.as_deref() else {
            return FrameResolution::Blocked(format!(
                "segment {} has no recorded output",
                prior.segment_index
            ));
        };

        let cache_key = frame_cache_key(prior.plan_id, &prior.shot_id, prior.segment_index);
        let duration = match self.extractor.media_duration_secs(output).await {
            Ok(duration) => duration,
            Err(e) => return FrameResolution::Blocked(e.to_string()),
        };
        let offset = (duration - LAST_FRAME_EPSILON_SECS).max(0.0);

        match self.extractor.extract(output, &cache_key, offset).await {
            Ok(frame) => FrameResolution::Ready(frame),
            Err(e) => FrameResolution::Blocked(e.to_string()),
        }
    }

    /// Copy the backend's produced media into the output directory under
    /// the segment's deterministic name.
    async fn collect_output(
        &self,
        segment: &PlanSegment,
        outputs: &[PathBuf],
    ) -> Result<PathBuf, String> {
        let Some(produced) = outputs.first() else {
            return Err("backend reported success without outputs".to_string());
        };
        if outputs.len() > 1 {
            tracing::debug!(
                count = outputs.len(),
                "Backend produced multiple outputs; collecting the first",
            );
        }

        let filename = segment_output_filename(&segment.filename_base, segment.segment_index);
        let destination = self.settings.output_dir.join(filename);

        tokio::fs::create_dir_all(&self.settings.output_dir)
            .await
            .map_err(|e| format!("failed to create output directory: {e}"))?;
        tokio::fs::copy(produced, &destination)
            .await
            .map_err(|e| format!("failed to collect output {}: {e}", produced.display()))?;

        Ok(destination)
    }
}
