use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Timeline preview configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreviewSettings {
    /// Frames per preview chunk.
    pub chunk_size: i64,
    /// Delay collecting invalidations before the dirty chunks are processed.
    pub gather_delay_ms: u64,
    /// Delay before a render starts once chunks are dirty.
    pub render_delay_ms: u64,
    /// Start rendering automatically after edits.
    pub auto_preview: bool,
    /// Renderer executable.
    pub renderer: PathBuf,
    /// Number of undo archive folders kept on disk.
    pub archive_depth: usize,
    /// Used when the document carries no preview extension.
    pub fallback_extension: String,
    /// Used when the document carries no preview parameters.
    pub fallback_parameters: String,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            chunk_size: 25,
            gather_delay_ms: 200,
            render_delay_ms: 3000,
            auto_preview: true,
            renderer: PathBuf::from("cutline-render"),
            archive_depth: 5,
            fallback_extension: "mp4".to_string(),
            fallback_parameters: "f=mp4 vcodec=libx264 crf=23 g=1 bf=0".to_string(),
        }
    }
}

impl PreviewSettings {
    pub fn gather_delay(&self) -> Duration {
        Duration::from_millis(self.gather_delay_ms)
    }

    pub fn render_delay(&self) -> Duration {
        Duration::from_millis(self.render_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let settings: PreviewSettings = serde_json::from_str(r#"{"chunk_size": 50}"#).unwrap();
        assert_eq!(settings.chunk_size, 50);
        assert_eq!(settings.gather_delay(), Duration::from_millis(200));
        assert_eq!(settings.render_delay(), Duration::from_secs(3));
        assert_eq!(settings.archive_depth, 5);
        assert!(settings.auto_preview);
    }
}
