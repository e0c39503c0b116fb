//! Run settings and poll pacing.

use std::path::PathBuf;
use std::time::Duration;

use shotchain_core::error::CoreError;
use shotchain_core::workflow::validate_fps;

/// Default frame rate filled into the `fps` slot.
pub const DEFAULT_FPS: u32 = 24;

/// Default ceiling on how long a submitted job may stay non-terminal.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// Poll backoff
// ---------------------------------------------------------------------------

/// Tunable parameters for the poll-interval backoff strategy.
///
/// The delay between status polls grows by `multiplier` after every poll
/// and is clamped to `max_delay`, so a long-running job is not hammered
/// at the initial rate.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    /// Delay before the second poll (the first happens immediately).
    pub initial_delay: Duration,
    /// Upper bound on the delay between polls.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each poll.
    pub multiplier: f64,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl PollBackoff {
    /// Calculate the next poll delay from the current one.
    ///
    /// The result is clamped to [`PollBackoff::max_delay`].
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }
}

// ---------------------------------------------------------------------------
// Run settings
// ---------------------------------------------------------------------------

/// Per-run configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Directory where collected segment outputs land.
    pub output_dir: PathBuf,
    /// Frame rate filled into every segment's workflow.
    pub fps: u32,
    /// Fixed generation seed shared by all segments of the run. When
    /// `None`, one random seed is drawn per run.
    pub seed: Option<u64>,
    /// Ceiling on how long a submitted job may stay non-terminal before
    /// the segment is failed.
    pub poll_timeout: Duration,
    /// Pacing of the status poll loop.
    pub backoff: PollBackoff,
}

impl RunSettings {
    /// Settings with defaults for everything but the output directory.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            fps: DEFAULT_FPS,
            seed: None,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            backoff: PollBackoff::default(),
        }
    }

    /// Check that the settings are usable before a run starts.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_fps(self.fps)?;
        if self.poll_timeout.is_zero() {
            return Err(CoreError::Validation(
                "poll_timeout must be non-zero".to_string(),
            ));
        }
        if self.backoff.initial_delay.is_zero() {
            return Err(CoreError::Validation(
                "backoff initial_delay must be non-zero".to_string(),
            ));
        }
        if self.backoff.multiplier < 1.0 {
            return Err(CoreError::Validation(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.backoff.multiplier
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
