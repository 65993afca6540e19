use crate::error::{PreviewError, Result};
use cutline_core::document::ProjectProfile;
use cutline_core::types::{Item, ItemKind};
use cutline_core::Timeline;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::path::{Path, PathBuf};

pub const SCENE_FILE_NAME: &str = "preview.mlt";

fn xml_error(e: impl std::fmt::Display) -> PreviewError {
    PreviewError::Scene(e.to_string())
}

fn element<'a>(name: &'a str, attrs: &[(&str, String)]) -> BytesStart<'a> {
    let mut start = BytesStart::new(name);
    for (key, value) in attrs {
        start.push_attribute((*key, value.as_str()));
    }
    start
}

struct SceneWriter {
    inner: Writer<Vec<u8>>,
}

impl SceneWriter {
    fn event(&mut self, event: Event<'_>) -> Result<()> {
        self.inner.write_event(event).map_err(xml_error)
    }

    fn open(&mut self, name: &str, attrs: &[(&str, String)]) -> Result<()> {
        self.event(Event::Start(element(name, attrs)))
    }

    fn close(&mut self, name: &str) -> Result<()> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, String)]) -> Result<()> {
        self.event(Event::Empty(element(name, attrs)))
    }

    fn property(&mut self, name: &str, value: &str) -> Result<()> {
        self.open("property", &[("name", name.to_string())])?;
        self.event(Event::Text(BytesText::new(value)))?;
        self.close("property")
    }
}

fn producer_id(item: &Item) -> String {
    format!("producer{}", item.id.0)
}

/// Scene description of `timeline` handed to the renderer. Tracks are
/// written bottom first.
pub fn scene_xml(timeline: &Timeline, profile: &ProjectProfile, root: &Path) -> Result<String> {
    let mut w = SceneWriter {
        inner: Writer::new_with_indent(Vec::new(), b' ', 2),
    };
    w.event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    w.open(
        "mlt",
        &[
            ("LC_NUMERIC", "C".to_string()),
            ("root", root.to_string_lossy().into_owned()),
        ],
    )?;
    w.empty(
        "profile",
        &[
            ("description", profile.description.clone()),
            ("width", profile.width.to_string()),
            ("height", profile.height.to_string()),
            ("progressive", "1".to_string()),
            ("frame_rate_num", profile.frame_rate_num.to_string()),
            ("frame_rate_den", profile.frame_rate_den.to_string()),
            ("display_aspect_num", profile.display_aspect_num.to_string()),
            ("display_aspect_den", profile.display_aspect_den.to_string()),
        ],
    )?;

    let tracks: Vec<_> = timeline.tracks().iter().rev().collect();
    let mut compositions = Vec::new();

    for track in &tracks {
        for (_, slot) in track.slots() {
            let Some(item) = timeline.item(slot.id) else {
                continue;
            };
            if let ItemKind::Clip { resource, source_length } = &item.kind {
                let out = source_length.map_or(item.out_point(), |len| len - 1);
                w.open(
                    "producer",
                    &[
                        ("id", producer_id(item)),
                        ("in", "0".to_string()),
                        ("out", out.to_string()),
                    ],
                )?;
                w.property("resource", resource)?;
                w.close("producer")?;
            }
        }
    }

    for (index, track) in tracks.iter().enumerate() {
        w.open("playlist", &[("id", format!("playlist{index}"))])?;
        let mut cursor = 0;
        for (position, slot) in track.slots() {
            let Some(item) = timeline.item(slot.id) else {
                continue;
            };
            match &item.kind {
                ItemKind::Clip { .. } => {
                    if position > cursor {
                        w.empty("blank", &[("length", (position - cursor).to_string())])?;
                    }
                    w.empty(
                        "entry",
                        &[
                            ("producer", producer_id(item)),
                            ("in", item.in_point.to_string()),
                            ("out", item.out_point().to_string()),
                        ],
                    )?;
                    cursor = slot.end;
                }
                ItemKind::Composition { service } => compositions.push((index, item, service)),
            }
        }
        w.close("playlist")?;
    }

    w.open(
        "tractor",
        &[
            ("id", "tractor0".to_string()),
            ("in", "0".to_string()),
            ("out", (timeline.duration() - 1).max(0).to_string()),
        ],
    )?;
    for index in 0..tracks.len() {
        w.empty("track", &[("producer", format!("playlist{index}"))])?;
    }
    for (index, item, service) in compositions {
        w.open(
            "transition",
            &[
                ("id", format!("transition{}", item.id.0)),
                ("in", item.position.to_string()),
                ("out", (item.end() - 1).to_string()),
            ],
        )?;
        w.property("mlt_service", service)?;
        w.property("a_track", "0")?;
        w.property("b_track", &index.to_string())?;
        w.close("transition")?;
    }
    w.close("tractor")?;
    w.close("mlt")?;

    String::from_utf8(w.inner.into_inner()).map_err(xml_error)
}

/// Write the scene into `dir` and return its path.
pub fn write_scene(dir: &Path, timeline: &Timeline, profile: &ProjectProfile) -> Result<PathBuf> {
    let path = dir.join(SCENE_FILE_NAME);
    std::fs::write(&path, scene_xml(timeline, profile, dir)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutline_core::document::preset_720p25;
    use cutline_core::types::{ItemDescriptor, TrackKind};

    #[test]
    fn scene_lists_clips_blanks_and_transitions() {
        let mut tl = Timeline::with_tracks(25.0, &[TrackKind::Video, TrackKind::Video]);
        let top = tl.tracks()[0].id;
        let bottom = tl.tracks()[1].id;
        tl.insert_item(ItemDescriptor::clip("a&b.mp4", 100).with_range(5, 20), bottom, 10)
            .unwrap();
        tl.insert_item(ItemDescriptor::composition("luma", 15), top, 12)
            .unwrap();

        let xml = scene_xml(&tl, &preset_720p25(), Path::new("/cache")).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"width="1280""#));
        assert!(xml.contains("a&amp;b.mp4"));
        assert!(xml.contains(r#"<blank length="10"/>"#));
        assert!(xml.contains(r#"in="5" out="24""#));
        assert!(xml.contains(r#"out="99""#));
        assert!(xml.contains(">luma<"));
        assert!(xml.contains(r#"<property name="b_track">1</property>"#));
        assert!(xml.contains(r#"<track producer="playlist1"/>"#));
    }

    #[test]
    fn write_scene_creates_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let tl = Timeline::with_tracks(25.0, &[TrackKind::Video]);
        let path = write_scene(dir.path(), &tl, &preset_720p25()).unwrap();
        assert_eq!(path, dir.path().join(SCENE_FILE_NAME));
        assert!(std::fs::read_to_string(path).unwrap().contains("<tractor"));
    }
}
