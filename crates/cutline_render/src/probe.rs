use serde::Deserialize;
use std::path::Path;

use crate::error::{RenderError, Result};

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_frames: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Basic facts about a media file.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
}

impl MediaInfo {
    /// Length in frames at `fps`, at least one frame.
    pub fn frames_at(&self, fps: f64) -> i64 {
        ((self.duration_seconds * fps).round() as i64).max(1)
    }
}

// ---------------------------------------------------------------------------
// Chunk probing
// ---------------------------------------------------------------------------

/// Counts the frames of a rendered chunk file.
pub trait ChunkProbe: Send + Sync {
    fn frame_count(&self, path: &Path) -> Result<i64>;
}

/// [`ChunkProbe`] that decodes the first video stream with ffprobe.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfprobeChunkProbe;

impl ChunkProbe for FfprobeChunkProbe {
    fn frame_count(&self, path: &Path) -> Result<i64> {
        let probe = run_ffprobe(path, &["-count_frames", "-select_streams", "v:0", "-show_streams"])?;
        parse_frame_count(&probe)
            .ok_or_else(|| RenderError::FfprobeFailed(format!("no frame count for {}", path.display())))
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run ffprobe on a media file and summarize it.
pub fn probe_media(path: impl AsRef<Path>) -> Result<MediaInfo> {
    let probe = run_ffprobe(path.as_ref(), &["-show_format", "-show_streams"])?;
    Ok(parse_media_info(&probe))
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn run_ffprobe(path: &Path, extra: &[&str]) -> Result<FfprobeOutput> {
    if !path.exists() {
        return Err(RenderError::FileNotFound(path.to_path_buf()));
    }

    let output = std::process::Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json"])
        .args(extra)
        .arg(path)
        .output()
        .map_err(|e| RenderError::FfprobeExec(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RenderError::FfprobeFailed(stderr.into_owned()));
    }

    Ok(serde_json::from_slice(&output.stdout)?)
}

fn parse_frame_count(probe: &FfprobeOutput) -> Option<i64> {
    let video = probe.streams.iter().find(|s| s.codec_type == "video")?;
    video
        .nb_read_frames
        .as_deref()
        .or(video.nb_frames.as_deref())
        .and_then(|n| n.parse::<i64>().ok())
}

fn parse_media_info(probe: &FfprobeOutput) -> MediaInfo {
    let video_stream = probe.streams.iter().find(|s| s.codec_type == "video");
    let audio_stream = probe.streams.iter().find(|s| s.codec_type == "audio");

    let duration_seconds = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let fps = video_stream
        .and_then(|s| s.r_frame_rate.as_deref())
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);

    let codec = video_stream
        .and_then(|s| s.codec_name.clone())
        .or_else(|| audio_stream.and_then(|s| s.codec_name.clone()))
        .unwrap_or_default();

    MediaInfo {
        duration_seconds,
        width: video_stream.and_then(|s| s.width).unwrap_or(0),
        height: video_stream.and_then(|s| s.height).unwrap_or(0),
        fps,
        codec,
    }
}

/// Parse a frame rate string like "30000/1001" or "25/1" into f64.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
