//! FFmpeg/FFprobe shared command utilities.
//!
//! The frame-extraction layer shells out to `ffprobe` for media inspection
//! and to `ffmpeg` for pulling a single still frame out of produced media.

use std::path::Path;

use serde::Deserialize;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("media file not found: {0}")]
    MediaNotFound(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct ProbeOutput {
    pub streams: Vec<ProbeStream>,
    pub format: ProbeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct ProbeStream {
    pub codec_type: Option<String>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub duration: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Deserialize)]
pub struct ProbeFormat {
    pub duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run `ffprobe` on a media file and return the parsed JSON output.
pub async fn probe_media(path: &Path) -> Result<ProbeOutput, FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::MediaNotFound(
            path.to_string_lossy().to_string(),
        ));
    }

    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str::<ProbeOutput>(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
}

/// Extract a single full-resolution frame at the given timestamp.
///
/// The output format follows the `output_path` extension (the extraction
/// cache uses PNG so seeds stay lossless).
pub async fn extract_frame(
    media_path: &Path,
    output_path: &Path,
    timestamp_secs: f64,
) -> Result<(), FfmpegError> {
    if !media_path.exists() {
        return Err(FfmpegError::MediaNotFound(
            media_path.to_string_lossy().to_string(),
        ));
    }

    let output = tokio::process::Command::new("ffmpeg")
        .args(["-y", "-ss", &format!("{timestamp_secs:.3}"), "-i"])
        .arg(media_path)
        .args(["-vframes", "1", "-q:v", "2"])
        .arg(output_path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(())
}

/// Check whether both `ffmpeg` and `ffprobe` binaries can be invoked.
pub async fn decoder_available() -> bool {
    for binary in ["ffmpeg", "ffprobe"] {
        let probe = tokio::process::Command::new(binary)
            .arg("-version")
            .output()
            .await;
        if !matches!(probe, Ok(ref out) if out.status.success()) {
            return false;
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Find the first video stream in the ffprobe output.
fn first_video_stream(probe: &ProbeOutput) -> Option<&ProbeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// Parse the media duration in seconds from ffprobe output.
pub fn parse_duration(probe: &ProbeOutput) -> f64 {
    // Try format-level duration first.
    if let Some(d) = &probe.format.duration {
        if let Ok(secs) = d.parse::<f64>() {
            return secs;
        }
    }
    // Fall back to the first video stream's duration.
    if let Some(stream) = first_video_stream(probe) {
        if let Some(d) = &stream.duration {
            if let Ok(secs) = d.parse::<f64>() {
                return secs;
            }
        }
    }
    0.0
}

/// Parse the video framerate from ffprobe output.
///
/// The `r_frame_rate` field is a fraction like `"30/1"` or `"24000/1001"`.
pub fn parse_framerate(probe: &ProbeOutput) -> f64 {
    first_video_stream(probe)
        .and_then(|s| s.r_frame_rate.as_deref())
        .map(parse_fraction)
        .unwrap_or(0.0)
}

/// Parse a fraction string like `"30/1"` into a float.
fn parse_fraction(s: &str) -> f64 {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() == 2 {
        let num = parts[0].parse::<f64>().unwrap_or(0.0);
        let den = parts[1].parse::<f64>().unwrap_or(1.0);
        if den > 0.0 {
            return num / den;
        }
    }
    s.parse::<f64>().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(format_duration: Option<&str>, stream: Option<ProbeStream>) -> ProbeOutput {
        ProbeOutput {
            streams: stream.into_iter().collect(),
            format: ProbeFormat {
                duration: format_duration.map(str::to_string),
            },
        }
    }

    fn video_stream(duration: Option<&str>, framerate: Option<&str>) -> ProbeStream {
        ProbeStream {
            codec_type: Some("video".into()),
            r_frame_rate: framerate.map(str::to_string),
            duration: duration.map(str::to_string),
        }
    }

    #[test]
    fn parse_fraction_standard() {
        assert!((parse_fraction("30/1") - 30.0).abs() < 0.001);
    }

    #[test]
    fn parse_fraction_ntsc() {
        let fps = parse_fraction("24000/1001");
        assert!((fps - 23.976).abs() < 0.01);
    }

    #[test]
    fn parse_fraction_plain_number() {
        assert!((parse_fraction("25") - 25.0).abs() < 0.001);
    }

    #[test]
    fn parse_fraction_zero_denominator() {
        assert!((parse_fraction("30/0") - 0.0).abs() < 0.001);
    }

    #[test]
    fn duration_prefers_format_level() {
        let p = probe(Some("120.5"), Some(video_stream(Some("60.0"), None)));
        assert!((parse_duration(&p) - 120.5).abs() < 0.001);
    }

    #[test]
    fn duration_falls_back_to_video_stream() {
        let p = probe(None, Some(video_stream(Some("60.0"), None)));
        assert!((parse_duration(&p) - 60.0).abs() < 0.001);
    }

    #[test]
    fn duration_zero_when_absent() {
        let p = probe(None, None);
        assert!((parse_duration(&p) - 0.0).abs() < 0.001);
    }

    #[test]
    fn framerate_from_video_stream() {
        let p = probe(None, Some(video_stream(None, Some("24000/1001"))));
        assert!((parse_framerate(&p) - 23.976).abs() < 0.01);
    }

    #[test]
    fn framerate_zero_without_video_stream() {
        let p = probe(Some("10.0"), None);
        assert!((parse_framerate(&p) - 0.0).abs() < 0.001);
    }
}
