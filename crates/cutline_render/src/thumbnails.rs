use std::path::Path;

use crate::error::{RenderError, Result};

/// Produces a still image of one source frame.
pub trait FrameExtractor: Send + Sync {
    fn extract(&self, source: &Path, frame: i64, fps: f64, output: &Path) -> Result<()>;
}

/// [`FrameExtractor`] backed by ffmpeg, scaling to a fixed width.
#[derive(Debug, Clone, Copy)]
pub struct FfmpegExtractor {
    pub width: u32,
}

impl Default for FfmpegExtractor {
    fn default() -> Self {
        Self { width: 160 }
    }
}

impl FrameExtractor for FfmpegExtractor {
    fn extract(&self, source: &Path, frame: i64, fps: f64, output: &Path) -> Result<()> {
        let seconds = if fps > 0.0 { frame as f64 / fps } else { 0.0 };
        extract_thumbnail(source, output, seconds, self.width)
    }
}

/// Extract a single thumbnail at a specific time from a video file.
pub fn extract_thumbnail(source_path: &Path, output_path: &Path, time_seconds: f64, width: u32) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent).map_err(RenderError::Io)?;
    }

    let status = std::process::Command::new("ffmpeg")
        .args([
            "-y",
            "-ss",
            &format!("{time_seconds:.3}"),
            "-i",
            &source_path.to_string_lossy(),
            "-vframes",
            "1",
            "-vf",
            &format!("scale={width}:-1"),
            "-q:v",
            "5",
            &output_path.to_string_lossy(),
        ])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RenderError::FfmpegNotFound
            } else {
                RenderError::Io(e)
            }
        })?;

    if !status.success() {
        return Err(RenderError::FfmpegFailed(format!(
            "thumbnail extraction failed for {}",
            source_path.display()
        )));
    }
    Ok(())
}
