use crate::error::{CoreError, Result};
use crate::timeline::{Timeline, TimelineSnapshot};
use crate::types::TrackKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;
use uuid::Uuid;

pub const PROP_DOCUMENT_ID: &str = "documentid";
pub const PROP_PREVIEW_EXTENSION: &str = "previewextension";
pub const PROP_PREVIEW_PARAMETERS: &str = "previewparameters";
pub const PROP_RESIZE_PREVIEW: &str = "resizepreview";
pub const PROP_PREVIEW_HEIGHT: &str = "previewheight";
/// Rendered preview chunks, as comma separated range tokens.
pub const PROP_PREVIEW_CHUNKS: &str = "previewchunks";
/// Preview chunks still waiting for a render.
pub const PROP_DIRTY_PREVIEW_CHUNKS: &str = "dirtypreviewchunks";

const PROJECT_EXTENSION: &str = "cutline";

// ---------------------------------------------------------------------------
// ProjectProfile
// ---------------------------------------------------------------------------

/// Video format of a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectProfile {
    pub description: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    pub display_aspect_num: u32,
    pub display_aspect_den: u32,
    /// Profile file handed to the renderer. When unset, one is written next
    /// to the rendered files.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl ProjectProfile {
    pub fn fps(&self) -> f64 {
        f64::from(self.frame_rate_num) / f64::from(self.frame_rate_den.max(1))
    }

    /// Key/value profile text understood by the renderer.
    pub fn to_profile_text(&self) -> String {
        format!(
            "description={}\nframe_rate_num={}\nframe_rate_den={}\nwidth={}\nheight={}\nprogressive=1\nsample_aspect_num=1\nsample_aspect_den=1\ndisplay_aspect_num={}\ndisplay_aspect_den={}\n",
            self.description,
            self.frame_rate_num,
            self.frame_rate_den,
            self.width,
            self.height,
            self.display_aspect_num,
            self.display_aspect_den,
        )
    }
}

fn preset(description: &str, width: u32, height: u32, fps: u32) -> ProjectProfile {
    ProjectProfile {
        description: description.to_string(),
        width,
        height,
        frame_rate_num: fps,
        frame_rate_den: 1,
        display_aspect_num: 16,
        display_aspect_den: 9,
        path: None,
    }
}

/// 1920x1080 25fps preset.
pub fn preset_1080p25() -> ProjectProfile {
    preset("HD 1080p 25 fps", 1920, 1080, 25)
}

/// 1920x1080 30fps preset.
pub fn preset_1080p30() -> ProjectProfile {
    preset("HD 1080p 30 fps", 1920, 1080, 30)
}

/// 1280x720 25fps preset.
pub fn preset_720p25() -> ProjectProfile {
    preset("HD 720p 25 fps", 1280, 720, 25)
}

/// 3840x2160 25fps (4K) preset.
pub fn preset_4k25() -> ProjectProfile {
    preset("4K UHD 2160p 25 fps", 3840, 2160, 25)
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Which per-document cache folder to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Base,
    Preview,
    Thumbnails,
}

/// Project-level context: properties, profile, cache location and the
/// persisted timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub uuid: Uuid,
    pub name: String,
    pub profile: ProjectProfile,
    pub properties: BTreeMap<String, String>,
    pub cache_root: PathBuf,
    #[serde(default)]
    pub timeline: Option<TimelineSnapshot>,
}

impl Document {
    /// Create a new document. Its `documentid` is the creation time in
    /// milliseconds.
    pub fn new(name: impl Into<String>, profile: ProjectProfile, cache_root: impl Into<PathBuf>) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let mut properties = BTreeMap::new();
        properties.insert(PROP_DOCUMENT_ID.to_string(), millis.to_string());
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            profile,
            properties,
            cache_root: cache_root.into(),
            timeline: None,
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn document_id(&self) -> Option<&str> {
        self.property(PROP_DOCUMENT_ID)
    }

    /// Cache folder for this document. Previews of the main timeline live in
    /// `preview/`, other timelines get a folder named after their uuid.
    pub fn cache_dir(&self, kind: CacheKind, timeline: Uuid) -> Result<PathBuf> {
        let id = checked_document_id(self.document_id())?;
        let base = self.cache_root.join(id);
        Ok(match kind {
            CacheKind::Base => base,
            CacheKind::Preview if timeline == self.uuid => base.join("preview"),
            CacheKind::Preview => base.join(timeline.simple().to_string()),
            CacheKind::Thumbnails => base.join("thumbs"),
        })
    }

    pub fn ensure_cache_dir(&self, kind: CacheKind, timeline: Uuid) -> Result<PathBuf> {
        let dir = self.cache_dir(kind, timeline)?;
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn store_timeline(&mut self, timeline: &Timeline) {
        self.timeline = Some(timeline.snapshot());
    }

    /// The persisted timeline, or a fresh one with two video and two audio
    /// tracks using the document's uuid.
    pub fn build_timeline(&self) -> Result<Timeline> {
        match &self.timeline {
            Some(snapshot) => Timeline::from_snapshot(snapshot.clone()),
            None => {
                let mut snapshot = Timeline::with_tracks(
                    self.profile.fps(),
                    &[TrackKind::Video, TrackKind::Video, TrackKind::Audio, TrackKind::Audio],
                )
                .snapshot();
                snapshot.uuid = self.uuid;
                Timeline::from_snapshot(snapshot)
            }
        }
    }

    /// Save as pretty-printed JSON, appending `.cutline` when missing.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = ensure_extension(path.as_ref());
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        info!(path = %path.display(), "document saved");
        Ok(path)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let document: Document = serde_json::from_str(&data)?;
        Ok(document)
    }
}

/// Document ids are creation timestamps; anything that is not a single
/// numeric path component is refused so cache folders stay under the root.
pub fn checked_document_id(id: Option<&str>) -> Result<String> {
    let raw = id.unwrap_or_default();
    let invalid = || CoreError::InvalidDocumentId(raw.to_string());
    let parts: Vec<Component<'_>> = Path::new(raw)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    let [Component::Normal(name)] = parts.as_slice() else {
        return Err(invalid());
    };
    match name.to_str() {
        Some(name) if name.parse::<i64>().is_ok() => Ok(name.to_string()),
        _ => Err(invalid()),
    }
}

fn ensure_extension(path: &Path) -> PathBuf {
    if path.extension().and_then(|e| e.to_str()) == Some(PROJECT_EXTENSION) {
        path.to_path_buf()
    } else {
        let mut p = path.to_path_buf();
        let mut name = p.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(PROJECT_EXTENSION);
        p.set_file_name(name);
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemDescriptor;
    use tempfile::TempDir;

    #[test]
    fn new_document_has_numeric_id() {
        let doc = Document::new("Test", preset_1080p25(), "/tmp/cache");
        let id = doc.document_id().unwrap();
        assert!(id.parse::<i64>().is_ok());
    }

    #[test]
    fn cache_dirs_follow_layout() {
        let mut doc = Document::new("Test", preset_1080p25(), "/cache");
        doc.set_property(PROP_DOCUMENT_ID, "1234");
        let main = doc.uuid;
        assert_eq!(
            doc.cache_dir(CacheKind::Preview, main).unwrap(),
            PathBuf::from("/cache/1234/preview")
        );
        let other = Uuid::new_v4();
        assert_eq!(
            doc.cache_dir(CacheKind::Preview, other).unwrap(),
            PathBuf::from("/cache/1234").join(other.simple().to_string())
        );
        assert_eq!(
            doc.cache_dir(CacheKind::Thumbnails, main).unwrap(),
            PathBuf::from("/cache/1234/thumbs")
        );

        doc.properties.clear();
        assert!(doc.cache_dir(CacheKind::Base, main).is_err());
    }

    #[test]
    fn traversing_document_id_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("a").join("cache");
        let mut doc = Document::new("Escape", preset_720p25(), &root);
        doc.set_property(PROP_DOCUMENT_ID, "../../escaped");
        for kind in [CacheKind::Base, CacheKind::Preview, CacheKind::Thumbnails] {
            assert!(matches!(
                doc.ensure_cache_dir(kind, doc.uuid),
                Err(CoreError::InvalidDocumentId(_))
            ));
        }
        assert!(!dir.path().join("escaped").exists());
        assert!(!root.exists());
    }

    #[test]
    fn document_id_must_be_a_plain_number() {
        assert_eq!(checked_document_id(Some("1700000000000")).unwrap(), "1700000000000");
        assert_eq!(checked_document_id(Some("./42")).unwrap(), "42");
        assert!(checked_document_id(Some("../42")).is_err());
        assert!(checked_document_id(Some("42/../7")).is_err());
        assert!(checked_document_id(Some("/42")).is_err());
        assert!(checked_document_id(Some("abc")).is_err());
        assert!(checked_document_id(None).is_err());
    }

    #[test]
    fn save_load_roundtrip_with_timeline() {
        let dir = TempDir::new().unwrap();
        let mut doc = Document::new("Roundtrip", preset_720p25(), dir.path());
        let mut tl = doc.build_timeline().unwrap();
        assert_eq!(tl.uuid(), doc.uuid);
        let track = tl.tracks()[0].id;
        tl.insert_item(ItemDescriptor::clip("a.mp4", 50), track, 10).unwrap();
        doc.store_timeline(&tl);

        let path = doc.save_to_file(dir.path().join("roundtrip.cutline")).unwrap();
        let loaded = Document::load_from_file(&path).unwrap();
        assert_eq!(loaded, doc);
        let rebuilt = loaded.build_timeline().unwrap();
        assert_eq!(rebuilt.snapshot(), tl.snapshot());
    }

    #[test]
    fn extension_appended_if_missing() {
        let dir = TempDir::new().unwrap();
        let doc = Document::new("ExtTest", preset_720p25(), dir.path());
        let path = doc.save_to_file(dir.path().join("no_ext")).unwrap();
        assert_eq!(path, dir.path().join("no_ext.cutline"));
        assert!(path.exists());
    }

    #[test]
    fn load_nonexistent_file_returns_error() {
        assert!(Document::load_from_file("/tmp/does_not_exist_cutline_test.cutline").is_err());
    }

    #[test]
    fn preset_values_are_correct() {
        assert_eq!(preset_1080p25().fps(), 25.0);
        assert_eq!(preset_1080p30().fps(), 30.0);
        assert_eq!(preset_720p25().width, 1280);
        assert_eq!(preset_4k25().height, 2160);
        let text = preset_1080p25().to_profile_text();
        assert!(text.contains("width=1920\n"));
        assert!(text.contains("frame_rate_num=25\n"));
    }

    #[test]
    fn ensure_cache_dir_creates_folder() {
        let dir = TempDir::new().unwrap();
        let doc = Document::new("Cache", preset_1080p25(), dir.path());
        let preview = doc.ensure_cache_dir(CacheKind::Preview, doc.uuid).unwrap();
        assert!(preview.is_dir());
        assert!(preview.starts_with(dir.path()));
    }
}
