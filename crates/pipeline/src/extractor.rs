//! Seed-frame extraction with an idempotent on-disk cache.
//!
//! Chaining seeds segment N+1 with the last frame of segment N's produced
//! media. The cache is keyed by plan/shot/segment identity, not content:
//! re-running a segment changes its output, so the orchestrator must
//! [`invalidate`](FrameExtractor::invalidate) the stale entry explicitly.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use shotchain_core::ffmpeg::{self, FfmpegError};
use shotchain_core::hashing::sha256_hex;
use uuid::Uuid;

/// Margin subtracted from the media duration when targeting the last
/// frame, so the seek never lands past the final packet.
pub const LAST_FRAME_EPSILON_SECS: f64 = 0.05;

/// Errors from the frame-extraction seam.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The decode capability (ffmpeg/ffprobe) is missing entirely.
    #[error("Frame extraction unavailable: {0}")]
    Unavailable(String),

    /// The source media is unreadable or the requested offset is out of
    /// range.
    #[error("Frame extraction failed: {0}")]
    Failed(String),
}

/// Derives still frames from produced media to seed dependent segments.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Whether the underlying decode capability is present.
    async fn is_available(&self) -> bool;

    /// Duration of the given media in seconds.
    async fn media_duration_secs(&self, media_path: &Path) -> Result<f64, ExtractError>;

    /// Extract a single frame at `offset_secs`, returning the frame path.
    ///
    /// Idempotent per `cache_key`: a second call with the same key returns
    /// the previously produced frame without re-invoking the decoder.
    /// Fails if the offset exceeds the media's length.
    async fn extract(
        &self,
        media_path: &Path,
        cache_key: &str,
        offset_secs: f64,
    ) -> Result<PathBuf, ExtractError>;

    /// Drop the cache entry for `cache_key`, if present.
    async fn invalidate(&self, cache_key: &str) -> Result<(), ExtractError>;
}

/// Cache key for the frame extracted from one segment's output.
pub fn frame_cache_key(plan_id: Uuid, shot_id: &str, segment_index: u32) -> String {
    format!("{plan_id}/{shot_id}/{segment_index}")
}

// ---------------------------------------------------------------------------
// FFmpeg implementation
// ---------------------------------------------------------------------------

/// [`FrameExtractor`] shelling out to `ffprobe`/`ffmpeg`.
///
/// Cached frames are PNG files named from a digest of the cache key, so
/// keys with path separators stay filesystem-safe.
pub struct FfmpegFrameExtractor {
    cache_dir: PathBuf,
}

impl FfmpegFrameExtractor {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Directory holding cached frames.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_path(&self, cache_key: &str) -> PathBuf {
        let digest = sha256_hex(cache_key.as_bytes());
        self.cache_dir.join(format!("frame_{}.png", &digest[..16]))
    }
}

fn map_ffmpeg_error(error: FfmpegError) -> ExtractError {
    match error {
        FfmpegError::NotFound(e) => ExtractError::Unavailable(e.to_string()),
        other => ExtractError::Failed(other.to_string()),
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn is_available(&self) -> bool {
        ffmpeg::decoder_available().await
    }

    async fn media_duration_secs(&self, media_path: &Path) -> Result<f64, ExtractError> {
        let probe = ffmpeg::probe_media(media_path)
            .await
            .map_err(map_ffmpeg_error)?;
        Ok(ffmpeg::parse_duration(&probe))
    }

    async fn extract(
        &self,
        media_path: &Path,
        cache_key: &str,
        offset_secs: f64,
    ) -> Result<PathBuf, ExtractError> {
        let cached = self.cache_path(cache_key);
        if cached.exists() {
            tracing::debug!(cache_key = %cache_key, "Frame cache hit");
            return Ok(cached);
        }

        let probe = ffmpeg::probe_media(media_path)
            .await
            .map_err(map_ffmpeg_error)?;
        let duration = ffmpeg::parse_duration(&probe);
        if duration > 0.0 && offset_secs > duration {
            return Err(ExtractError::Failed(format!(
                "offset {offset_secs:.3}s exceeds media duration {duration:.3}s"
            )));
        }

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| ExtractError::Failed(e.to_string()))?;

        ffmpeg::extract_frame(media_path, &cached, offset_secs.max(0.0))
            .await
            .map_err(map_ffmpeg_error)?;

        // ffmpeg can exit cleanly without writing a frame when the seek
        // lands past the last packet.
        if !cached.exists() {
            return Err(ExtractError::Failed(format!(
                "no frame produced at offset {offset_secs:.3}s from {}",
                media_path.display()
            )));
        }

        tracing::debug!(
            cache_key = %cache_key,
            frame = %cached.display(),
            "Extracted seed frame",
        );
        Ok(cached)
    }

    async fn invalidate(&self, cache_key: &str) -> Result<(), ExtractError> {
        match tokio::fs::remove_file(self.cache_path(cache_key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ExtractError::Failed(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_includes_all_identity_parts() {
        let plan_id = Uuid::nil();
        let key = frame_cache_key(plan_id, "shot_010", 2);
        assert_eq!(
            key,
            "00000000-0000-0000-0000-000000000000/shot_010/2"
        );
    }

    #[test]
    fn cache_paths_are_deterministic_and_distinct() {
        let extractor = FfmpegFrameExtractor::new("/tmp/cache");
        let a1 = extractor.cache_path("plan/shot/0");
        let a2 = extractor.cache_path("plan/shot/0");
        let b = extractor.cache_path("plan/shot/1");

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert!(a1.starts_with("/tmp/cache"));
        assert!(a1.extension().is_some_and(|e| e == "png"));
    }

    #[tokio::test]
    async fn cached_frame_returned_without_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FfmpegFrameExtractor::new(dir.path());

        // Seed the cache entry by hand; the media path is bogus, so any
        // decoder invocation would error out.
        let cached = extractor.cache_path("plan/shot/0");
        std::fs::write(&cached, b"png-bytes").unwrap();

        let frame = extractor
            .extract(Path::new("/nonexistent/clip.mp4"), "plan/shot/0", 2.95)
            .await
            .unwrap();
        assert_eq!(frame, cached);
    }

    #[tokio::test]
    async fn missing_media_fails_without_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FfmpegFrameExtractor::new(dir.path());

        let result = extractor
            .extract(Path::new("/nonexistent/clip.mp4"), "plan/shot/0", 2.95)
            .await;
        assert!(matches!(result, Err(ExtractError::Failed(_))));
    }

    #[tokio::test]
    async fn invalidate_removes_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FfmpegFrameExtractor::new(dir.path());

        let cached = extractor.cache_path("plan/shot/0");
        std::fs::write(&cached, b"stale").unwrap();

        extractor.invalidate("plan/shot/0").await.unwrap();
        assert!(!cached.exists());
    }

    #[tokio::test]
    async fn invalidate_is_a_no_op_without_entry() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FfmpegFrameExtractor::new(dir.path());

        assert!(extractor.invalidate("plan/shot/9").await.is_ok());
    }
}
