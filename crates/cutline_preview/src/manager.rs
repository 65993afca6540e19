use crate::archive::{chunk_file_name, UndoArchive};
use crate::chunks::{chunks_in, compressed_chunks, parse_compressed_chunks, ChunkSets};
use crate::error::{PreviewError, PreviewNotice, Result};
use crate::scene::{write_scene, SCENE_FILE_NAME};
use crate::settings::PreviewSettings;
use crate::timer::DebounceTimer;
use crate::tractor::{ChunkClip, Hide, Playlist, Tractor, OVERLAY_PLAYLIST_ID, PREVIEW_PLAYLIST_ID};
use crossbeam_channel::{unbounded, Receiver, Sender};
use cutline_core::document::{
    checked_document_id, CacheKind, Document, ProjectProfile, PROP_PREVIEW_EXTENSION, PROP_PREVIEW_HEIGHT,
    PROP_PREVIEW_PARAMETERS, PROP_RESIZE_PREVIEW,
};
use cutline_core::types::TimelineEvent;
use cutline_core::Timeline;
use cutline_render::probe::ChunkProbe;
use cutline_render::render::{RenderEvent, RenderJob, RenderProcess};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const PROFILE_FILE_NAME: &str = "preview.profile";
const RENDER_MODE: &str = "preview-chunks";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewState {
    Uninitialized,
    Idle,
    Rendering,
    Disposed,
}

/// Renderer output settings resolved from the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewParams {
    pub extension: String,
    pub consumer_params: Vec<String>,
}

/// The document id used for cache folders, see [`checked_document_id`].
pub fn validate_document_id(id: Option<&str>) -> Result<String> {
    checked_document_id(id).map_err(|_| PreviewError::InvalidDocumentId(id.unwrap_or_default().to_string()))
}

/// Read the preview extension and consumer parameters, falling back to the
/// default preview profile when the document has none.
pub fn load_params(document: &Document, settings: &PreviewSettings) -> Result<PreviewParams> {
    let split = |s: &str| s.split_whitespace().map(str::to_string).collect::<Vec<_>>();
    let mut extension = document.property(PROP_PREVIEW_EXTENSION).unwrap_or_default().trim().to_string();
    let mut consumer_params = split(document.property(PROP_PREVIEW_PARAMETERS).unwrap_or_default());
    if extension.is_empty() || consumer_params.is_empty() {
        extension = settings.fallback_extension.trim().to_string();
        consumer_params = split(&settings.fallback_parameters);
    }
    if extension.is_empty() || consumer_params.is_empty() {
        return Err(PreviewError::InvalidParameters);
    }
    let number = |key: &str| {
        document
            .property(key)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0)
    };
    if number(PROP_RESIZE_PREVIEW) != 0 {
        let height = number(PROP_PREVIEW_HEIGHT);
        let profile = &document.profile;
        let width = height * i64::from(profile.display_aspect_num) / i64::from(profile.display_aspect_den.max(1));
        consumer_params.push(format!("s={width}x{height}"));
    }
    consumer_params.push("an=1".to_string());
    Ok(PreviewParams {
        extension,
        consumer_params,
    })
}

struct Session {
    cache_dir: PathBuf,
    archive: UndoArchive,
    params: PreviewParams,
    profile: ProjectProfile,
}

impl Session {
    fn chunk_path(&self, chunk: i64) -> PathBuf {
        self.cache_dir.join(chunk_file_name(chunk, &self.params.extension))
    }
}

/// Where the preview and overlay playlists sit in the tractor. They are
/// always appended after the timeline tracks, preview first.
#[derive(Debug, Default)]
struct TrackSlots {
    index: Option<usize>,
    preview: bool,
    overlay: bool,
}

impl TrackSlots {
    fn detach(&mut self, tracks: &mut Vec<Playlist>) -> (Option<Playlist>, Option<Playlist>) {
        let (mut preview, mut overlay) = (None, None);
        if let Some(index) = self.index.take() {
            while index < tracks.len() {
                let id = tracks[index].id();
                if id == PREVIEW_PLAYLIST_ID && preview.is_none() {
                    preview = Some(tracks.remove(index));
                } else if id == OVERLAY_PLAYLIST_ID && overlay.is_none() {
                    overlay = Some(tracks.remove(index));
                } else {
                    break;
                }
            }
        }
        self.preview = false;
        self.overlay = false;
        (preview, overlay)
    }

    fn attach(&mut self, tracks: &mut Vec<Playlist>, preview: Option<Playlist>, overlay: Option<Playlist>) {
        self.preview = preview.is_some();
        self.overlay = overlay.is_some();
        if !self.preview && !self.overlay {
            self.index = None;
            return;
        }
        self.index = Some(tracks.len());
        for mut playlist in preview.into_iter().chain(overlay) {
            playlist.set_hide(Hide::Audio);
            tracks.push(playlist);
        }
    }

    fn preview_mut<'a>(&self, tracks: &'a mut [Playlist]) -> Option<&'a mut Playlist> {
        if self.preview {
            tracks.get_mut(self.index?)
        } else {
            None
        }
    }

    fn added(&self) -> usize {
        usize::from(self.preview) + usize::from(self.overlay)
    }
}

/// Renders the timeline in fixed-size chunks in the background and splices
/// the results into a preview track for smooth playback.
///
/// Chunks move between two sets: dirty (needs a render) and rendered (has a
/// valid file in the cache folder). Timeline edits evict rendered chunks;
/// evicted files are kept per undo index so that undoing an edit restores
/// them without rendering again.
///
/// The manager is driven from one coordinating task: feed it timeline events
/// through [`handle_timeline_event`](Self::handle_timeline_event) and call
/// [`poll`](Self::poll) regularly to fire its timers and consume renderer
/// progress.
pub struct PreviewManager {
    settings: PreviewSettings,
    tractor: Arc<Tractor>,
    timeline_uuid: Uuid,
    probe: Arc<dyn ChunkProbe>,
    session: Option<Session>,
    disposed: bool,
    chunks: Mutex<ChunkSets>,
    slots: TrackSlots,
    working_chunk: Option<i64>,
    error_log: Vec<String>,
    warn_on_crash: bool,
    chunks_to_render: usize,
    processed_chunks: usize,
    process: Option<RenderProcess>,
    render_tx: mpsc::UnboundedSender<RenderEvent>,
    render_rx: mpsc::UnboundedReceiver<RenderEvent>,
    gather_timer: DebounceTimer,
    render_timer: DebounceTimer,
    notice_tx: Sender<PreviewNotice>,
    notice_rx: Receiver<PreviewNotice>,
}

impl PreviewManager {
    pub fn new(settings: PreviewSettings, tractor: Arc<Tractor>, timeline_uuid: Uuid, probe: Arc<dyn ChunkProbe>) -> Self {
        let (render_tx, render_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = unbounded();
        Self {
            gather_timer: DebounceTimer::new(settings.gather_delay()),
            render_timer: DebounceTimer::new(settings.render_delay()),
            settings,
            tractor,
            timeline_uuid,
            probe,
            session: None,
            disposed: false,
            chunks: Mutex::new(ChunkSets::default()),
            slots: TrackSlots::default(),
            working_chunk: None,
            error_log: Vec::new(),
            warn_on_crash: true,
            chunks_to_render: 0,
            processed_chunks: 0,
            process: None,
            render_tx,
            render_rx,
            notice_tx,
            notice_rx,
        }
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    /// Resolve the cache folder and render parameters from `document`. On
    /// failure the error is also published as a notice and the manager
    /// stays inert.
    pub fn initialize(&mut self, document: &Document) -> Result<()> {
        match self.open_session(document) {
            Ok(session) => {
                info!(cache = %session.cache_dir.display(), "timeline preview ready");
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "timeline preview disabled");
                self.notify(PreviewNotice::Error(e.to_string()));
                Err(e)
            }
        }
    }

    fn open_session(&self, document: &Document) -> Result<Session> {
        if self.settings.chunk_size <= 0 {
            return Err(PreviewError::InvalidParameters);
        }
        let id = validate_document_id(document.document_id())?;
        let mut cache_dir = document.ensure_cache_dir(CacheKind::Preview, self.timeline_uuid)?;
        if cache_dir.is_relative() {
            cache_dir = std::env::current_dir()?.join(cache_dir);
        }
        let expected = if self.timeline_uuid == document.uuid {
            "preview".to_string()
        } else {
            self.timeline_uuid.simple().to_string()
        };
        let named_right = cache_dir.file_name().and_then(|n| n.to_str()) == Some(expected.as_str());
        if !named_right || !cache_dir.is_dir() || !cache_dir.to_string_lossy().contains(&id) {
            return Err(PreviewError::InvalidCacheDir(cache_dir));
        }
        let params = load_params(document, &self.settings)?;
        let archive = UndoArchive::open(&cache_dir, self.settings.archive_depth)?;
        Ok(Session {
            cache_dir,
            archive,
            params,
            profile: document.profile.clone(),
        })
    }

    /// Abort rendering and remove the undo archive, and the cache folder if
    /// nothing is left in it.
    pub async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.abort_rendering().await;
        self.gather_timer.stop();
        self.render_timer.stop();
        if let Some(session) = self.session.take() {
            if let Err(e) = session.archive.remove_all() {
                warn!(error = %e, "could not remove preview undo archive");
            }
            let empty = std::fs::read_dir(&session.cache_dir).map_or(false, |mut d| d.next().is_none());
            if empty {
                if let Err(e) = std::fs::remove_dir(&session.cache_dir) {
                    warn!(error = %e, "could not remove preview cache folder");
                }
            }
        }
        self.disposed = true;
        debug!("timeline preview disposed");
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn state(&self) -> PreviewState {
        if self.disposed {
            PreviewState::Disposed
        } else if self.session.is_none() {
            PreviewState::Uninitialized
        } else if self.process.is_some() {
            PreviewState::Rendering
        } else {
            PreviewState::Idle
        }
    }

    pub fn settings(&self) -> &PreviewSettings {
        &self.settings
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.cache_dir.as_path())
    }

    pub fn undo_dir(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.archive.dir())
    }

    pub fn params(&self) -> Option<&PreviewParams> {
        self.session.as_ref().map(|s| &s.params)
    }

    /// Path of the rendered file for `chunk`.
    pub fn chunk_path(&self, chunk: i64) -> Option<PathBuf> {
        self.session.as_ref().map(|s| s.chunk_path(chunk))
    }

    pub fn working_chunk(&self) -> Option<i64> {
        self.working_chunk
    }

    pub fn is_running(&self) -> bool {
        self.working_chunk.is_some() || self.process.is_some()
    }

    pub fn has_defined_range(&self) -> bool {
        !self.chunks.lock().is_empty()
    }

    pub fn chunk_sets(&self) -> ChunkSets {
        self.chunks.lock().clone()
    }

    /// Rendered and dirty chunks as compressed range tokens.
    pub fn preview_chunks(&self) -> (Vec<String>, Vec<String>) {
        let chunks = self.chunks.lock();
        let size = self.settings.chunk_size;
        (
            compressed_chunks(chunks.rendered().iter().copied(), size),
            compressed_chunks(chunks.dirty().iter().copied(), size),
        )
    }

    /// Receiver for user-facing notices.
    pub fn notices(&self) -> Receiver<PreviewNotice> {
        self.notice_rx.clone()
    }

    /// Earliest pending timer deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.gather_timer.deadline(), self.render_timer.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_gathering(&self) -> bool {
        self.gather_timer.is_active()
    }

    pub fn is_render_scheduled(&self) -> bool {
        self.render_timer.is_active()
    }

    fn notify(&self, notice: PreviewNotice) {
        let _ = self.notice_tx.send(notice);
    }

    fn notify_chunks_changed(&self) {
        self.notify(PreviewNotice::RenderedChunksChanged);
        self.notify(PreviewNotice::DirtyChunksChanged);
    }

    // -----------------------------------------------------------------------
    // Preview and overlay tracks
    // -----------------------------------------------------------------------

    /// Append the preview playlist to the tractor. False if it exists.
    pub fn build_preview_track(&mut self) -> bool {
        if self.slots.preview {
            return false;
        }
        let mut tracks = self.tractor.lock();
        let (_, overlay) = self.slots.detach(&mut tracks);
        self.slots
            .attach(&mut tracks, Some(Playlist::new(PREVIEW_PLAYLIST_ID)), overlay);
        debug!(index = ?self.slots.index, "preview track built");
        true
    }

    /// Drop the preview playlist and forget every chunk.
    pub fn delete_preview_track(&mut self) {
        {
            let mut tracks = self.tractor.lock();
            let (_, overlay) = self.slots.detach(&mut tracks);
            self.slots.attach(&mut tracks, None, overlay);
            self.chunks.lock().clear();
        }
        self.notify_chunks_changed();
    }

    /// Show `overlay` above the timeline. Returns the tractor index of the
    /// first added track.
    pub fn set_overlay_track(&mut self, mut overlay: Playlist) -> Option<usize> {
        overlay.set_id(OVERLAY_PLAYLIST_ID);
        let mut tracks = self.tractor.lock();
        let (preview, _) = self.slots.detach(&mut tracks);
        self.slots.attach(&mut tracks, preview, Some(overlay));
        self.slots.index
    }

    pub fn remove_overlay_track(&mut self) -> Option<Playlist> {
        let mut tracks = self.tractor.lock();
        let (preview, overlay) = self.slots.detach(&mut tracks);
        self.slots.attach(&mut tracks, preview, None);
        overlay
    }

    /// Let playback use the added tracks again, video only.
    pub fn enable(&self) {
        self.set_hidden(Hide::Audio);
    }

    /// Hide the added tracks from playback.
    pub fn disable(&self) {
        self.set_hidden(Hide::All);
    }

    fn set_hidden(&self, hide: Hide) {
        let Some(index) = self.slots.index else {
            return;
        };
        let mut tracks = self.tractor.lock();
        for playlist in tracks.iter_mut().skip(index).take(self.slots.added()) {
            playlist.set_hide(hide);
        }
    }

    /// Number of tracks appended to the tractor, 0 when none.
    pub fn added_tracks(&self) -> usize {
        self.slots.added()
    }

    pub fn has_preview_track(&self) -> bool {
        self.slots.preview
    }

    pub fn has_overlay_track(&self) -> bool {
        self.slots.overlay
    }

    pub fn preview_track_index(&self) -> Option<usize> {
        self.slots.index
    }

    fn blank_slots(&self, chunks: &[i64]) {
        let mut tracks = self.tractor.lock();
        if let Some(preview) = self.slots.preview_mut(&mut tracks) {
            for chunk in chunks {
                preview.replace_with_blank(*chunk);
            }
        }
    }

    /// Splice the cached files of `chunks` into blank preview slots.
    fn reload_chunks(&self, chunks: &[i64]) {
        let Some(session) = &self.session else {
            return;
        };
        let mut tracks = self.tractor.lock();
        let Some(preview) = self.slots.preview_mut(&mut tracks) else {
            return;
        };
        for chunk in chunks {
            if preview.is_blank_at(*chunk) {
                preview.insert_at(
                    *chunk,
                    ChunkClip {
                        file: session.chunk_path(*chunk),
                        length: self.settings.chunk_size,
                    },
                );
            }
        }
    }

    fn remove_chunk_files(&self, chunks: &[i64]) {
        let Some(session) = &self.session else {
            return;
        };
        for chunk in chunks {
            let path = session.chunk_path(*chunk);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "could not remove preview chunk");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Preview zones
    // -----------------------------------------------------------------------

    /// Restore zones saved with the project. Rendered chunks whose file is
    /// missing are queued again.
    pub fn load_chunks<S: AsRef<str>>(&mut self, rendered: &[S], dirty: &[S]) -> Result<()> {
        let session = self.session.as_ref().ok_or(PreviewError::NotInitialized)?;
        let size = self.settings.chunk_size;
        let rendered = parse_compressed_chunks(rendered, size)?;
        let dirty = parse_compressed_chunks(dirty, size)?;
        {
            let mut tracks = self.tractor.lock();
            let mut preview = self.slots.preview_mut(&mut tracks);
            let mut chunks = self.chunks.lock();
            for chunk in rendered {
                let path = session.chunk_path(chunk);
                let spliced = path.is_file()
                    && preview.as_deref_mut().map_or(false, |p| {
                        p.insert_at(
                            chunk,
                            ChunkClip {
                                file: path.clone(),
                                length: size,
                            },
                        )
                    });
                if spliced {
                    chunks.make_rendered(chunk);
                } else {
                    chunks.make_dirty(chunk);
                }
            }
            for chunk in dirty {
                chunks.add(chunk);
            }
        }
        self.notify_chunks_changed();
        Ok(())
    }

    /// Add (`add == true`) or remove the frames `[start, end)` from the
    /// preview zones.
    pub async fn add_preview_range(&mut self, start: i64, end: i64, add: bool) -> Result<()> {
        if self.session.is_none() {
            return Err(PreviewError::NotInitialized);
        }
        let mut removed = Vec::new();
        {
            let mut chunks = self.chunks.lock();
            for chunk in chunks_in(start, end, self.settings.chunk_size) {
                if add {
                    chunks.add(chunk);
                } else if chunks.remove(chunk) {
                    removed.push(chunk);
                }
            }
        }
        if add {
            self.notify(PreviewNotice::DirtyChunksChanged);
            if self.process.is_none() && self.settings.auto_preview {
                self.render_timer.start();
            }
            return Ok(());
        }

        let was_rendering = self.process.is_some();
        self.gather_timer.stop();
        self.abort_rendering().await;
        self.remove_chunk_files(&removed);
        self.blank_slots(&removed);
        self.notify_chunks_changed();
        if was_rendering || self.settings.auto_preview {
            self.render_timer.start();
        }
        Ok(())
    }

    /// Throw away every rendered chunk. Zones are kept as dirty unless
    /// `reset_zones` is set.
    pub async fn clear_preview_range(&mut self, reset_zones: bool) -> Result<()> {
        if self.session.is_none() {
            return Err(PreviewError::NotInitialized);
        }
        self.gather_timer.stop();
        self.abort_rendering().await;
        let evicted = self.chunks.lock().evict_all();
        self.remove_chunk_files(&evicted);
        self.blank_slots(&evicted);
        if reset_zones {
            self.chunks.lock().clear_dirty();
        }
        self.notify_chunks_changed();
        Ok(())
    }

    /// Frames `[start, end)` changed. Rendered chunks there become dirty and
    /// a running render working on stale data is stopped.
    pub async fn invalidate_preview(&mut self, start: i64, end: i64) {
        if self.session.is_none() || !self.slots.preview {
            return;
        }
        let range: Vec<i64> = chunks_in(start, end, self.settings.chunk_size).collect();
        let (Some(first), Some(last)) = (range.first().copied(), range.last().copied()) else {
            return;
        };
        let working_hit = self.working_chunk.is_some_and(|w| (first..=last).contains(&w));
        let (rendered_hit, dirty_hit) = {
            let chunks = self.chunks.lock();
            (
                range.iter().any(|c| chunks.is_rendered(*c)),
                range.iter().any(|c| chunks.is_dirty(*c)),
            )
        };

        if rendered_hit || working_hit {
            self.abort_rendering().await;
            let evicted: Vec<i64> = {
                let mut chunks = self.chunks.lock();
                let evicted: Vec<i64> = range.iter().copied().filter(|c| chunks.is_rendered(*c)).collect();
                for chunk in &evicted {
                    chunks.make_dirty(*chunk);
                }
                evicted
            };
            self.blank_slots(&evicted);
            if !evicted.is_empty() {
                debug!(start, end, chunks = evicted.len(), "preview chunks invalidated");
                self.notify_chunks_changed();
            }
        } else if dirty_hit {
            // the running render was given a scene that is now stale
            self.abort_rendering().await;
        } else {
            return;
        }
        self.gather_timer.start();
    }

    /// React to one timeline event.
    pub async fn handle_timeline_event(&mut self, event: &TimelineEvent) {
        match event {
            TimelineEvent::Invalidate { start, end } => self.invalidate_preview(*start, *end).await,
            TimelineEvent::UndoTruncated { from } => self.remove_invalid_undo(*from),
            _ => {}
        }
    }

    /// Archive folders from `from` on belong to discarded redo entries.
    pub fn remove_invalid_undo(&self, from: usize) {
        if let Some(session) = &self.session {
            session.archive.remove_from(from);
        }
    }

    /// Fire due timers and consume pending renderer output.
    pub async fn poll(&mut self, timeline: &Timeline, now: Instant) -> Result<()> {
        self.pump_render_events();
        if self.gather_timer.poll(now) {
            self.process_dirty_chunks(timeline);
        }
        if self.render_timer.poll(now) {
            self.start_preview_render(timeline).await?;
        }
        Ok(())
    }

    /// Handle the dirty chunks gathered since the last edit: archive or
    /// restore their files for the current undo index, then schedule a
    /// render.
    pub fn process_dirty_chunks(&mut self, timeline: &Timeline) {
        if self.session.is_none() || self.chunks.lock().dirty().is_empty() {
            return;
        }
        let history = timeline.history();
        self.sync_undo_archive(history.index(), history.count());
        if self.settings.auto_preview {
            self.render_timer.start();
        }
    }

    fn sync_undo_archive(&mut self, index: usize, count: usize) {
        let Some(session) = &self.session else {
            return;
        };
        let mut restart = self.settings.auto_preview;
        if self.render_timer.is_active() {
            self.render_timer.stop();
            restart = true;
        }
        let dirty: Vec<i64> = self.chunks.lock().dirty().iter().copied().collect();
        let extension = session.params.extension.as_str();
        let archive = &session.archive;

        if index == count && (index == 0 || !archive.exists(index - 1)) {
            // a new edit: keep what was valid before it
            if index > 0 {
                match archive.archive(index - 1, &session.cache_dir, &dirty, extension) {
                    Ok(true) => archive.cleanup_old(),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "could not archive preview chunks"),
                }
            }
        } else {
            let mut last_undo = false;
            if index + 1 == count && !archive.exists(count) {
                last_undo = true;
                if let Err(e) = archive.archive(count, &session.cache_dir, &dirty, extension) {
                    warn!(error = %e, "could not archive preview chunks");
                }
            }
            if !last_undo {
                self.remove_chunk_files(&dirty);
            }
            let found = archive.restore(index, &session.cache_dir, &dirty, extension);
            if !found.is_empty() {
                debug!(index, chunks = found.len(), "preview chunks restored from undo archive");
                {
                    let mut chunks = self.chunks.lock();
                    for chunk in &found {
                        chunks.make_rendered(*chunk);
                    }
                }
                self.notify_chunks_changed();
                self.reload_chunks(&found);
            }
        }
        if restart {
            self.render_timer.start();
        }
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// Render every dirty chunk of `timeline` in one renderer run, replacing
    /// any run in progress.
    pub async fn start_preview_render(&mut self, timeline: &Timeline) -> Result<()> {
        if self.session.is_none() {
            return Err(PreviewError::NotInitialized);
        }
        if self.chunks.lock().dirty().is_empty() {
            return Ok(());
        }
        self.abort_rendering().await;
        self.error_log.clear();
        let session = self.session.as_ref().ok_or(PreviewError::NotInitialized)?;
        let scene = write_scene(&session.cache_dir, timeline, &session.profile)?;
        self.render_timer.stop();

        let job = self.render_job(&scene)?;
        self.chunks_to_render = self.chunks.lock().dirty().len();
        self.processed_chunks = 0;
        self.notify(PreviewNotice::Progress(0));
        match RenderProcess::spawn(job, self.render_tx.clone()) {
            Ok(process) => {
                info!(chunks = self.chunks_to_render, "preview render started");
                self.process = Some(process);
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&scene);
                error!(error = %e, "preview render could not start");
                self.notify(PreviewNotice::Error(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// The renderer invocation for the current dirty chunks.
    pub fn render_job(&self, scene: &Path) -> Result<RenderJob> {
        let session = self.session.as_ref().ok_or(PreviewError::NotInitialized)?;
        let size = self.settings.chunk_size;
        let dirty = compressed_chunks(self.chunks.lock().dirty().iter().copied(), size);
        let profile_path = match &session.profile.path {
            Some(path) => path.clone(),
            None => {
                let path = session.cache_dir.join(PROFILE_FILE_NAME);
                std::fs::write(&path, session.profile.to_profile_text())?;
                path
            }
        };
        Ok(RenderJob {
            program: self.settings.renderer.clone(),
            args: vec![
                RENDER_MODE.to_string(),
                scene.to_string_lossy().into_owned(),
                session.cache_dir.to_string_lossy().into_owned(),
                dirty.join(","),
                (size - 1).to_string(),
                profile_path.to_string_lossy().into_owned(),
                session.params.extension.clone(),
                session.params.consumer_params.join(" "),
            ],
        })
    }

    /// Kill the running renderer, if any, and wait until it is gone.
    pub async fn abort_rendering(&mut self) {
        let Some(process) = self.process.as_mut() else {
            return;
        };
        self.warn_on_crash = false;
        process.abort();
        while self.process.is_some() {
            match self.render_rx.recv().await {
                Some(event) => self.handle_render_event(event),
                None => self.process = None,
            }
        }
        self.notify(PreviewNotice::Progress(1000));
    }

    /// Wait for the running renderer to finish, handling its output.
    pub async fn wait_for_render(&mut self) {
        while self.process.is_some() {
            match self.render_rx.recv().await {
                Some(event) => self.handle_render_event(event),
                None => self.process = None,
            }
        }
    }

    /// Handle renderer output already received. Returns how many events
    /// were processed.
    pub fn pump_render_events(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.render_rx.try_recv() {
            self.handle_render_event(event);
            count += 1;
        }
        count
    }

    pub fn handle_render_event(&mut self, event: RenderEvent) {
        match event {
            RenderEvent::Started(frame) => {
                if self.process.is_some() {
                    self.working_chunk = Some(frame);
                    self.notify(PreviewNotice::WorkingChunkChanged(Some(frame)));
                }
            }
            RenderEvent::Done(frame) => {
                self.processed_chunks += 1;
                let progress = 1000 * self.processed_chunks / self.chunks_to_render.max(1);
                self.chunk_rendered(frame, progress.min(1000) as i32);
            }
            RenderEvent::Log(line) => {
                if !line.trim().is_empty() {
                    self.error_log.push(line);
                }
            }
            RenderEvent::Exited { code, aborted } => self.process_ended(code, aborted),
        }
    }

    fn chunk_rendered(&mut self, frame: i64, progress: i32) {
        let Some(path) = self.chunk_path(frame) else {
            return;
        };
        {
            let mut tracks = self.tractor.lock();
            match self.slots.preview_mut(&mut tracks) {
                Some(preview) if preview.is_blank_at(frame) => {}
                Some(_) => {
                    debug!(frame, "preview slot already filled");
                    return;
                }
                None => return,
            }
        }
        let size = self.settings.chunk_size;
        match self.probe.frame_count(&path) {
            Ok(frames) if frames == size => {
                self.chunks.lock().make_rendered(frame);
                {
                    let mut tracks = self.tractor.lock();
                    if let Some(preview) = self.slots.preview_mut(&mut tracks) {
                        preview.insert_at(frame, ChunkClip { file: path, length: size });
                    }
                }
                self.notify_chunks_changed();
                self.notify(PreviewNotice::Progress(progress));
            }
            Ok(frames) => {
                warn!(frame, frames, expected = size, "invalid preview chunk");
                self.corrupted_chunk(frame, &path);
            }
            Err(e) => {
                warn!(frame, error = %e, "unreadable preview chunk");
                self.corrupted_chunk(frame, &path);
            }
        }
    }

    /// A chunk came out wrong: stop the run, drop the file and queue the
    /// chunk again.
    fn corrupted_chunk(&mut self, frame: i64, path: &Path) {
        if let Some(process) = self.process.as_mut() {
            self.warn_on_crash = false;
            process.abort();
        }
        if self.working_chunk.take().is_some() {
            self.notify(PreviewNotice::WorkingChunkChanged(None));
        }
        self.notify(PreviewNotice::Progress(-1));
        self.notify(PreviewNotice::RenderFailed(self.error_log.join("\n")));
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "could not remove corrupted chunk");
            }
        }
        self.chunks.lock().make_dirty(frame);
        self.notify(PreviewNotice::DirtyChunksChanged);
    }

    fn process_ended(&mut self, code: Option<i32>, aborted: bool) {
        self.process = None;
        if let Some(session) = &self.session {
            let _ = std::fs::remove_file(session.cache_dir.join(SCENE_FILE_NAME));
            if session.profile.path.is_none() {
                let _ = std::fs::remove_file(session.cache_dir.join(PROFILE_FILE_NAME));
            }
        }
        if aborted || code != Some(0) {
            self.notify(PreviewNotice::Progress(-1));
            if self.warn_on_crash {
                error!(?code, "preview render failed");
                self.notify(PreviewNotice::RenderFailed(self.error_log.join("\n")));
            }
            if let Some(chunk) = self.working_chunk {
                if !self.chunks.lock().is_rendered(chunk) {
                    self.remove_chunk_files(&[chunk]);
                }
            }
        } else {
            info!("preview render finished");
            self.notify(PreviewNotice::Progress(1000));
        }
        self.working_chunk = None;
        self.warn_on_crash = true;
        self.notify(PreviewNotice::WorkingChunkChanged(None));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::UNDO_DIR_NAME;
    use cutline_core::document::{preset_720p25, PROP_DOCUMENT_ID};
    use cutline_core::types::ItemDescriptor;
    use cutline_render::RenderError;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Files starting with "ok" hold a full chunk, anything else is short.
    struct FakeProbe;

    impl ChunkProbe for FakeProbe {
        fn frame_count(&self, path: &Path) -> cutline_render::Result<i64> {
            let data = std::fs::read_to_string(path).map_err(|_| RenderError::FileNotFound(path.to_path_buf()))?;
            Ok(if data.starts_with("ok") { 25 } else { 3 })
        }
    }

    /// Renders every requested chunk as an "ok" file.
    const RENDER_ALL: &str = r#"
out="$3"; step=$(($5 + 1)); ext="$7"
IFS=','
for token in $4; do
  first=${token%-*}
  last=${token#*-}
  f=$first
  while [ "$f" -le "$last" ]; do
    echo "START:$f" >&2
    echo ok > "$out/$f.$ext"
    echo "DONE:$f" >&2
    f=$((f + step))
  done
done
"#;

    /// Chunk 25 comes out short.
    const RENDER_BAD_25: &str = r#"
out="$3"; ext="$7"
for f in 0 25; do
  echo "START:$f" >&2
  if [ "$f" = 25 ]; then echo bad > "$out/$f.$ext"; else echo ok > "$out/$f.$ext"; fi
  echo "DONE:$f" >&2
done
"#;

    const RENDER_CRASH: &str = r#"
echo "START:0" >&2
echo partial > "$3/0.$7"
echo "boom: encoder failed" >&2
exit 1
"#;

    const RENDER_HANG: &str = r#"
echo "START:0" >&2
sleep 30
"#;

    struct Fixture {
        _dir: TempDir,
        doc: Document,
        timeline: Timeline,
        tractor: Arc<Tractor>,
        manager: PreviewManager,
    }

    /// Executable shell script standing in for the renderer.
    fn renderer(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("render.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    fn fixture_with(script: Option<&str>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut doc = Document::new("Preview", preset_720p25(), dir.path().join("cache"));
        doc.set_property(PROP_DOCUMENT_ID, "1700000000000");
        let timeline = doc.build_timeline().unwrap();
        let tractor = Arc::new(Tractor::for_timeline(&timeline));
        let mut settings = PreviewSettings::default();
        if let Some(body) = script {
            settings.renderer = renderer(dir.path(), body);
        }
        let manager = PreviewManager::new(settings, tractor.clone(), timeline.uuid(), Arc::new(FakeProbe));
        Fixture {
            _dir: dir,
            doc,
            timeline,
            tractor,
            manager,
        }
    }

    fn ready(script: Option<&str>) -> Fixture {
        let mut f = fixture_with(script);
        f.manager.initialize(&f.doc).unwrap();
        assert!(f.manager.build_preview_track());
        f
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(1)
    }

    fn set(chunks: &[i64]) -> BTreeSet<i64> {
        chunks.iter().copied().collect()
    }

    fn preview_clips(f: &Fixture) -> Vec<i64> {
        let index = f.manager.preview_track_index().unwrap();
        f.tractor.lock()[index].clips().map(|(start, _)| start).collect()
    }

    #[test]
    fn document_id_must_be_a_plain_number() {
        assert_eq!(validate_document_id(Some("1700000000000")).unwrap(), "1700000000000");
        assert_eq!(validate_document_id(Some("./42")).unwrap(), "42");
        assert!(validate_document_id(Some("../42")).is_err());
        assert!(validate_document_id(Some("42/../7")).is_err());
        assert!(validate_document_id(Some("/42")).is_err());
        assert!(validate_document_id(Some("abc")).is_err());
        assert!(validate_document_id(None).is_err());
    }

    #[test]
    fn params_fall_back_and_resize() {
        let mut doc = Document::new("Params", preset_720p25(), "/cache");
        let settings = PreviewSettings::default();
        let params = load_params(&doc, &settings).unwrap();
        assert_eq!(params.extension, "mp4");
        assert_eq!(params.consumer_params.last().map(String::as_str), Some("an=1"));

        doc.set_property(PROP_PREVIEW_EXTENSION, "mkv");
        doc.set_property(PROP_PREVIEW_PARAMETERS, "f=matroska vcodec=ffv1");
        doc.set_property(PROP_RESIZE_PREVIEW, "1");
        doc.set_property(PROP_PREVIEW_HEIGHT, "360");
        let params = load_params(&doc, &settings).unwrap();
        assert_eq!(params.extension, "mkv");
        assert_eq!(params.consumer_params, vec!["f=matroska", "vcodec=ffv1", "s=640x360", "an=1"]);

        let empty = PreviewSettings {
            fallback_extension: String::new(),
            ..PreviewSettings::default()
        };
        doc.properties.remove(PROP_PREVIEW_EXTENSION);
        assert!(matches!(load_params(&doc, &empty), Err(PreviewError::InvalidParameters)));
    }

    #[test]
    fn initialize_builds_cache_layout() {
        let mut f = fixture_with(None);
        assert_eq!(f.manager.state(), PreviewState::Uninitialized);
        f.manager.initialize(&f.doc).unwrap();
        assert_eq!(f.manager.state(), PreviewState::Idle);

        let cache = f.manager.cache_dir().unwrap().to_path_buf();
        assert!(cache.ends_with("1700000000000/preview"));
        assert!(cache.join(UNDO_DIR_NAME).is_dir());
        assert_eq!(f.manager.undo_dir(), Some(cache.join(UNDO_DIR_NAME).as_path()));
        assert_eq!(f.manager.chunk_path(50), Some(cache.join("50.mp4")));
    }

    #[tokio::test]
    async fn chunk_size_must_be_positive() {
        for chunk_size in [0, -25] {
            let mut f = fixture_with(None);
            f.manager.settings.chunk_size = chunk_size;
            let notices = f.manager.notices();
            assert!(matches!(f.manager.initialize(&f.doc), Err(PreviewError::InvalidParameters)));
            assert!(matches!(notices.try_recv(), Ok(PreviewNotice::Error(_))));
            assert!(matches!(
                f.manager.add_preview_range(0, 50, true).await,
                Err(PreviewError::NotInitialized)
            ));
        }
    }

    #[test]
    fn secondary_timeline_uses_its_own_folder() {
        let f = fixture_with(None);
        let other = Uuid::new_v4();
        let mut manager = PreviewManager::new(PreviewSettings::default(), f.tractor.clone(), other, Arc::new(FakeProbe));
        manager.initialize(&f.doc).unwrap();
        let cache = manager.cache_dir().unwrap();
        assert_eq!(cache.file_name().unwrap().to_str(), Some(other.simple().to_string().as_str()));
    }

    #[tokio::test]
    async fn bad_document_id_leaves_manager_inert() {
        let mut f = fixture_with(None);
        f.doc.set_property(PROP_DOCUMENT_ID, "../../etc");
        let notices = f.manager.notices();
        assert!(matches!(f.manager.initialize(&f.doc), Err(PreviewError::InvalidDocumentId(_))));
        assert!(matches!(notices.try_recv(), Ok(PreviewNotice::Error(_))));
        assert_eq!(f.manager.state(), PreviewState::Uninitialized);
        assert!(matches!(
            f.manager.add_preview_range(0, 50, true).await,
            Err(PreviewError::NotInitialized)
        ));
        f.manager.invalidate_preview(0, 50).await;
        assert!(!f.manager.has_defined_range());
    }

    #[tokio::test]
    async fn preview_ranges_are_chunk_aligned() {
        let mut f = ready(None);
        f.manager.add_preview_range(0, 50, true).await.unwrap();
        assert_eq!(f.manager.chunk_sets().dirty(), &set(&[0, 25]));
        assert!(f.manager.is_render_scheduled());

        f.manager.add_preview_range(100, 176, true).await.unwrap();
        assert_eq!(
            f.manager.preview_chunks(),
            (vec![], vec!["0-25".to_string(), "100-175".to_string()])
        );

        f.manager.add_preview_range(0, 25, false).await.unwrap();
        assert_eq!(f.manager.chunk_sets().dirty(), &set(&[25, 100, 125, 150, 175]));
    }

    #[tokio::test]
    async fn render_job_arguments() {
        let mut f = ready(None);
        f.manager.add_preview_range(0, 50, true).await.unwrap();
        f.manager.add_preview_range(150, 175, true).await.unwrap();
        let cache = f.manager.cache_dir().unwrap().to_path_buf();
        let scene = cache.join(SCENE_FILE_NAME);

        let job = f.manager.render_job(&scene).unwrap();
        assert_eq!(job.program, PathBuf::from("cutline-render"));
        assert_eq!(
            job.args,
            vec![
                "preview-chunks".to_string(),
                scene.to_string_lossy().into_owned(),
                cache.to_string_lossy().into_owned(),
                "0-25,150".to_string(),
                "24".to_string(),
                cache.join(PROFILE_FILE_NAME).to_string_lossy().into_owned(),
                "mp4".to_string(),
                "f=mp4 vcodec=libx264 crf=23 g=1 bf=0 an=1".to_string(),
            ]
        );
        assert!(std::fs::read_to_string(cache.join(PROFILE_FILE_NAME))
            .unwrap()
            .contains("width=1280"));
    }

    #[tokio::test]
    async fn missing_renderer_is_reported() {
        let mut f = ready(None);
        let notices = f.manager.notices();
        f.manager.add_preview_range(0, 25, true).await.unwrap();
        assert!(f.manager.start_preview_render(&f.timeline).await.is_err());
        assert_eq!(f.manager.state(), PreviewState::Idle);
        assert!(notices.try_iter().any(|n| matches!(n, PreviewNotice::Error(_))));
        assert!(!f.manager.cache_dir().unwrap().join(SCENE_FILE_NAME).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chunk_lifecycle_with_undo_reuse() {
        let mut f = ready(Some(RENDER_ALL));
        let events = f.timeline.subscribe();
        let notices = f.manager.notices();

        f.manager.add_preview_range(0, 50, true).await.unwrap();
        f.manager.start_preview_render(&f.timeline).await.unwrap();
        assert_eq!(f.manager.state(), PreviewState::Rendering);
        f.manager.wait_for_render().await;

        let sets = f.manager.chunk_sets();
        assert_eq!(sets.rendered(), &set(&[0, 25]));
        assert!(sets.dirty().is_empty());
        assert_eq!(preview_clips(&f), vec![0, 25]);
        let cache = f.manager.cache_dir().unwrap().to_path_buf();
        assert!(!cache.join(SCENE_FILE_NAME).exists());
        assert!(notices.try_iter().any(|n| n == PreviewNotice::Progress(1000)));

        // an edit over chunk 0
        let track = f.timeline.tracks()[0].id;
        f.timeline
            .insert_item(ItemDescriptor::clip("a.mp4", 10), track, 5)
            .unwrap();
        for event in events.try_iter() {
            f.manager.handle_timeline_event(&event).await;
        }
        let sets = f.manager.chunk_sets();
        assert_eq!(sets.rendered(), &set(&[25]));
        assert_eq!(sets.dirty(), &set(&[0]));
        assert_eq!(preview_clips(&f), vec![25]);
        assert!(f.manager.is_gathering());

        f.manager.poll(&f.timeline, later()).await.unwrap();
        let undo = f.manager.undo_dir().unwrap().to_path_buf();
        assert!(!cache.join("0.mp4").exists());
        assert!(undo.join("0").join("0.mp4").is_file());
        assert!(f.manager.is_render_scheduled());

        // undoing brings the archived chunk back without rendering
        f.timeline.undo().unwrap();
        for event in events.try_iter() {
            f.manager.handle_timeline_event(&event).await;
        }
        f.manager.poll(&f.timeline, later()).await.unwrap();
        let sets = f.manager.chunk_sets();
        assert_eq!(sets.rendered(), &set(&[0, 25]));
        assert!(sets.dirty().is_empty());
        assert!(cache.join("0.mp4").is_file());
        assert_eq!(preview_clips(&f), vec![0, 25]);
        assert_eq!(f.manager.state(), PreviewState::Idle);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn corrupted_chunk_is_queued_again() {
        let mut f = ready(Some(RENDER_BAD_25));
        let notices = f.manager.notices();
        f.manager.add_preview_range(0, 50, true).await.unwrap();
        f.manager.start_preview_render(&f.timeline).await.unwrap();
        f.manager.wait_for_render().await;

        let sets = f.manager.chunk_sets();
        assert_eq!(sets.rendered(), &set(&[0]));
        assert_eq!(sets.dirty(), &set(&[25]));
        let cache = f.manager.cache_dir().unwrap().to_path_buf();
        assert!(cache.join("0.mp4").is_file());
        assert!(!cache.join("25.mp4").exists());
        assert!(notices.try_iter().any(|n| matches!(n, PreviewNotice::RenderFailed(_))));
        assert_eq!(preview_clips(&f), vec![0]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crashed_render_keeps_chunks_dirty() {
        let mut f = ready(Some(RENDER_CRASH));
        let notices = f.manager.notices();
        f.manager.add_preview_range(0, 50, true).await.unwrap();
        f.manager.start_preview_render(&f.timeline).await.unwrap();
        f.manager.wait_for_render().await;

        assert_eq!(f.manager.chunk_sets().dirty(), &set(&[0, 25]));
        assert!(!f.manager.cache_dir().unwrap().join("0.mp4").exists());
        assert_eq!(f.manager.working_chunk(), None);
        let notices: Vec<PreviewNotice> = notices.try_iter().collect();
        assert!(notices.contains(&PreviewNotice::Progress(-1)));
        assert!(notices
            .iter()
            .any(|n| matches!(n, PreviewNotice::RenderFailed(log) if log.contains("boom"))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn removing_a_zone_aborts_quietly() {
        let mut f = ready(Some(RENDER_HANG));
        let notices = f.manager.notices();
        f.manager.add_preview_range(0, 50, true).await.unwrap();
        f.manager.start_preview_render(&f.timeline).await.unwrap();
        assert!(f.manager.is_running());

        f.manager.add_preview_range(0, 50, false).await.unwrap();
        assert_eq!(f.manager.state(), PreviewState::Idle);
        assert!(!f.manager.has_defined_range());
        assert!(!notices.try_iter().any(|n| matches!(n, PreviewNotice::RenderFailed(_))));
    }

    #[tokio::test]
    async fn edits_outside_zones_are_ignored() {
        let mut f = ready(None);
        f.manager.add_preview_range(100, 150, true).await.unwrap();
        f.manager.invalidate_preview(0, 40).await;
        assert!(!f.manager.is_gathering());
        f.manager.invalidate_preview(120, 130).await;
        assert!(f.manager.is_gathering());
    }

    #[tokio::test]
    async fn load_and_clear_chunks() {
        let mut f = ready(None);
        let cache = f.manager.cache_dir().unwrap().to_path_buf();
        for chunk in [0, 25] {
            std::fs::write(cache.join(format!("{chunk}.mp4")), "ok").unwrap();
        }
        f.manager.load_chunks(&["0-50"], &["100"]).unwrap();
        let sets = f.manager.chunk_sets();
        assert_eq!(sets.rendered(), &set(&[0, 25]));
        assert_eq!(sets.dirty(), &set(&[50, 100]));
        assert_eq!(preview_clips(&f), vec![0, 25]);
        assert!(f.manager.load_chunks(&["x"], &[]).is_err());

        f.manager.clear_preview_range(false).await.unwrap();
        let sets = f.manager.chunk_sets();
        assert!(sets.rendered().is_empty());
        assert_eq!(sets.dirty(), &set(&[0, 25, 50, 100]));
        assert!(!cache.join("0.mp4").exists());
        assert!(preview_clips(&f).is_empty());

        f.manager.clear_preview_range(true).await.unwrap();
        assert!(!f.manager.has_defined_range());
    }

    #[tokio::test]
    async fn truncated_history_drops_archives() {
        let mut f = ready(None);
        let undo = f.manager.undo_dir().unwrap().to_path_buf();
        for i in 0..3 {
            std::fs::create_dir_all(undo.join(i.to_string())).unwrap();
        }
        f.manager
            .handle_timeline_event(&TimelineEvent::UndoTruncated { from: 1 })
            .await;
        assert!(undo.join("0").is_dir());
        assert!(!undo.join("1").exists());
        assert!(!undo.join("2").exists());
    }

    #[test]
    fn preview_and_overlay_tracks() {
        let mut f = fixture_with(None);
        let base = f.tractor.count();
        assert_eq!(f.manager.added_tracks(), 0);

        assert!(f.manager.build_preview_track());
        assert!(!f.manager.build_preview_track());
        assert_eq!(f.manager.preview_track_index(), Some(base));
        assert_eq!(f.tractor.count(), base + 1);

        assert_eq!(f.manager.set_overlay_track(Playlist::new("effects")), Some(base));
        assert_eq!(f.manager.added_tracks(), 2);
        {
            let tracks = f.tractor.lock();
            assert_eq!(tracks[base].id(), PREVIEW_PLAYLIST_ID);
            assert_eq!(tracks[base + 1].id(), OVERLAY_PLAYLIST_ID);
            assert_eq!(tracks[base + 1].hide(), Hide::Audio);
        }

        f.manager.disable();
        assert!(f.tractor.lock()[base..].iter().all(|t| t.hide() == Hide::All));
        f.manager.enable();
        assert!(f.tractor.lock()[base..].iter().all(|t| t.hide() == Hide::Audio));

        let overlay = f.manager.remove_overlay_track().unwrap();
        assert_eq!(overlay.id(), OVERLAY_PLAYLIST_ID);
        assert_eq!(f.manager.added_tracks(), 1);
        assert!(!f.manager.has_overlay_track());

        f.manager.delete_preview_track();
        assert_eq!(f.manager.added_tracks(), 0);
        assert_eq!(f.manager.preview_track_index(), None);
        assert_eq!(f.tractor.count(), base);
    }

    #[tokio::test]
    async fn dispose_cleans_up() {
        let mut f = ready(None);
        let cache = f.manager.cache_dir().unwrap().to_path_buf();
        f.manager.dispose().await;
        assert_eq!(f.manager.state(), PreviewState::Disposed);
        assert!(!cache.join(UNDO_DIR_NAME).exists());
        assert!(!cache.exists());
        assert!(matches!(
            f.manager.add_preview_range(0, 25, true).await,
            Err(PreviewError::NotInitialized)
        ));
    }
}
