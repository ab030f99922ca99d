//! Transcode one audio file into uniform HLS segments with ffmpeg.

use drift_core::config::AudioConfig;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// A lone output segment above this size means ffmpeg almost certainly
/// failed to split the input.
const SUSPICIOUS_SINGLE_SEGMENT_BYTES: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("ffprobe failed for {file}: {detail}")]
    Probe { file: String, detail: String },
    #[error("source too short: {0:.2}s")]
    TooShort(f64),
    #[error("ffmpeg failed for {file}: {stderr}")]
    Transcode { file: String, stderr: String },
    #[error("no segments produced for {0}")]
    NoSegments(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct ChunkOutput {
    pub base_name: String,
    /// Segment paths ordered by source offset.
    pub segments: Vec<PathBuf>,
    pub playlist: PathBuf,
}

/// Decode check: the file must be probeable and at least 0.1 s long.
pub async fn probe_duration(input: &Path) -> Result<f64, ChunkError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .output()
        .await?;

    let file = input.display().to_string();
    if !output.status.success() {
        return Err(ChunkError::Probe {
            file,
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let duration: f64 = String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .map_err(|_| ChunkError::Probe {
            file,
            detail: "could not parse duration".to_string(),
        })?;

    if duration < 0.1 {
        return Err(ChunkError::TooShort(duration));
    }
    Ok(duration)
}

/// The ffmpeg invocation, split out so the argument shape is testable.
pub fn ffmpeg_args(
    input: &Path,
    segment_pattern: &Path,
    playlist: &Path,
    audio: &AudioConfig,
) -> Vec<String> {
    vec![
        "-i".to_string(),
        input.display().to_string(),
        "-vn".to_string(),
        "-c:a".to_string(),
        audio.codec.clone(),
        "-b:a".to_string(),
        audio.bitrate.clone(),
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        audio.segment_duration.to_string(),
        "-hls_list_size".to_string(),
        "0".to_string(),
        "-hls_segment_type".to_string(),
        "mpegts".to_string(),
        "-force_key_frames".to_string(),
        format!("expr:gte(t,n_forced*{})", audio.segment_duration),
        "-hls_segment_filename".to_string(),
        segment_pattern.display().to_string(),
        playlist.display().to_string(),
    ]
}

pub async fn chunk(
    input: &Path,
    out_dir: &Path,
    audio: &AudioConfig,
) -> Result<ChunkOutput, ChunkError> {
    tokio::fs::create_dir_all(out_dir).await?;

    let base_name = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "segment".to_string());
    let segment_pattern = out_dir.join(format!("{base_name}_%03d.ts"));
    let playlist = out_dir.join(format!("{base_name}.m3u8"));

    let output = Command::new("ffmpeg")
        .args(ffmpeg_args(input, &segment_pattern, &playlist, audio))
        .output()
        .await?;

    if !output.status.success() {
        return Err(ChunkError::Transcode {
            file: input.display().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let segments = list_segments(out_dir, &base_name).await?;
    if segments.is_empty() {
        return Err(ChunkError::NoSegments(input.display().to_string()));
    }

    if segments.len() == 1 {
        let size = tokio::fs::metadata(&segments[0]).await?.len();
        if size > SUSPICIOUS_SINGLE_SEGMENT_BYTES {
            warn!(
                "only 1 segment produced for {} ({:.1} MiB); the input may not have been split",
                input.display(),
                size as f64 / (1024.0 * 1024.0)
            );
        }
    }

    debug!("chunked {} into {} segments", input.display(), segments.len());
    Ok(ChunkOutput {
        base_name,
        segments,
        playlist,
    })
}

async fn list_segments(out_dir: &Path, base_name: &str) -> Result<Vec<PathBuf>, ChunkError> {
    let prefix = format!("{base_name}_");
    let mut segments = Vec::new();
    let mut entries = tokio::fs::read_dir(out_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && name.ends_with(".ts") {
            segments.push(entry.path());
        }
    }
    segments.sort();
    Ok(segments)
}
