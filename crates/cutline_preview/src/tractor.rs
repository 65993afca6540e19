use cutline_core::Timeline;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const PREVIEW_PLAYLIST_ID: &str = "timeline_preview";
pub const OVERLAY_PLAYLIST_ID: &str = "timeline_overlay";

/// Which streams of a track are left out of playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hide {
    #[default]
    Nothing,
    Audio,
    All,
}

/// A rendered file spliced into a playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkClip {
    pub file: PathBuf,
    pub length: i64,
}

/// One track of the playback tractor: clips keyed by start frame, blank
/// everywhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    id: String,
    hide: Hide,
    clips: BTreeMap<i64, ChunkClip>,
}

impl Playlist {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hide: Hide::Nothing,
            clips: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    pub fn hide(&self) -> Hide {
        self.hide
    }

    pub fn set_hide(&mut self, hide: Hide) {
        self.hide = hide;
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn clips(&self) -> impl Iterator<Item = (i64, &ChunkClip)> + '_ {
        self.clips.iter().map(|(start, clip)| (*start, clip))
    }

    /// Clip covering `frame`, with its start.
    pub fn clip_at(&self, frame: i64) -> Option<(i64, &ChunkClip)> {
        self.clips
            .range(..=frame)
            .next_back()
            .filter(|(start, clip)| **start + clip.length > frame)
            .map(|(start, clip)| (*start, clip))
    }

    pub fn is_blank_at(&self, frame: i64) -> bool {
        self.clip_at(frame).is_none()
    }

    /// Put `clip` at `frame` if the blank there is long enough.
    pub fn insert_at(&mut self, frame: i64, clip: ChunkClip) -> bool {
        if !self.is_blank_at(frame) {
            return false;
        }
        let end = frame + clip.length;
        if self.clips.range(frame..end).next().is_some() {
            return false;
        }
        self.clips.insert(frame, clip);
        true
    }

    /// Take out the clip covering `frame`.
    pub fn replace_with_blank(&mut self, frame: i64) -> Option<ChunkClip> {
        let start = self.clip_at(frame)?.0;
        self.clips.remove(&start)
    }
}

/// The multitrack fed to playback. Structural changes happen while holding
/// [`Tractor::lock`].
#[derive(Debug, Default)]
pub struct Tractor {
    tracks: Mutex<Vec<Playlist>>,
}

impl Tractor {
    /// A tractor holding one playlist per timeline track.
    pub fn for_timeline(timeline: &Timeline) -> Self {
        let tracks = timeline.tracks().iter().map(|t| Playlist::new(t.name.clone())).collect();
        Self {
            tracks: Mutex::new(tracks),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Vec<Playlist>> {
        self.tracks.lock()
    }

    pub fn count(&self) -> usize {
        self.tracks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(length: i64) -> ChunkClip {
        ChunkClip {
            file: PathBuf::from("chunk.mp4"),
            length,
        }
    }

    #[test]
    fn insert_needs_room() {
        let mut playlist = Playlist::new(PREVIEW_PLAYLIST_ID);
        assert!(playlist.insert_at(25, clip(25)));
        assert!(!playlist.insert_at(30, clip(25)));
        assert!(!playlist.insert_at(10, clip(25)));
        assert!(playlist.insert_at(0, clip(25)));
        assert!(playlist.insert_at(50, clip(25)));
        assert_eq!(playlist.len(), 3);
        assert!(playlist.is_blank_at(75));
        assert!(!playlist.is_blank_at(74));
    }

    #[test]
    fn replace_with_blank_removes_covering_clip() {
        let mut playlist = Playlist::new(PREVIEW_PLAYLIST_ID);
        playlist.insert_at(25, clip(25));
        assert!(playlist.replace_with_blank(10).is_none());
        assert_eq!(playlist.replace_with_blank(40), Some(clip(25)));
        assert!(playlist.is_empty());
    }

    #[test]
    fn tractor_mirrors_timeline_tracks() {
        let timeline = Timeline::with_tracks(25.0, &[cutline_core::types::TrackKind::Video; 3]);
        let tractor = Tractor::for_timeline(&timeline);
        assert_eq!(tractor.count(), 3);
        assert_eq!(tractor.lock()[0].id(), timeline.tracks()[0].name);
    }
}
