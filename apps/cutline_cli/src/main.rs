use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cutline_core::document::{
    self, CacheKind, Document, ProjectProfile, PROP_DIRTY_PREVIEW_CHUNKS, PROP_PREVIEW_CHUNKS,
};
use cutline_core::functions::{delete_all_blanks_from, delete_blank_at};
use cutline_core::types::{ItemDescriptor, ItemKind, TimelineEvent, TrackId};
use cutline_core::Timeline;
use cutline_preview::{PreviewManager, PreviewNotice, PreviewSettings, Tractor};
use cutline_render::cache_task::CacheScheduler;
use cutline_render::probe::{probe_media, FfprobeChunkProbe};
use cutline_render::tasks::{TaskManager, TaskStatus};
use cutline_render::thumbnail_cache::ThumbnailCache;
use cutline_render::thumbnails::FfmpegExtractor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cutline", version, about = "Timeline editing and chunked preview rendering")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    #[value(name = "720p25")]
    Hd720p25,
    #[value(name = "1080p25")]
    Hd1080p25,
    #[value(name = "1080p30")]
    Hd1080p30,
    #[value(name = "4k25")]
    Uhd4k25,
}

impl Preset {
    fn profile(self) -> ProjectProfile {
        match self {
            Preset::Hd720p25 => document::preset_720p25(),
            Preset::Hd1080p25 => document::preset_1080p25(),
            Preset::Hd1080p30 => document::preset_1080p30(),
            Preset::Uhd4k25 => document::preset_4k25(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty project.
    New {
        project: PathBuf,
        #[arg(long, value_enum, default_value = "1080p25")]
        preset: Preset,
        /// Root folder for preview and thumbnail caches.
        #[arg(long, default_value = ".cutline-cache")]
        cache: PathBuf,
    },
    /// Print tracks and items.
    Info { project: PathBuf },
    /// Insert a media file on a track.
    Insert {
        project: PathBuf,
        resource: PathBuf,
        #[arg(long, default_value_t = 0)]
        track: usize,
        #[arg(long, default_value_t = 0)]
        position: i64,
        /// Length in frames; probed from the file when omitted.
        #[arg(long)]
        length: Option<i64>,
    },
    /// Close blanks on a track.
    DeleteBlanks {
        project: PathBuf,
        #[arg(long, default_value_t = 0)]
        track: usize,
        /// Close only the blank containing this frame.
        #[arg(long, conflicts_with = "from")]
        at: Option<i64>,
        /// Close every blank from this frame onwards.
        #[arg(long, default_value_t = 0)]
        from: i64,
        /// Shift every unlocked track along with the blank.
        #[arg(long)]
        all_tracks: bool,
    },
    /// Render preview chunks for frames [from, to).
    Preview {
        project: PathBuf,
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
        /// JSON file with preview settings.
        #[arg(long)]
        settings: Option<PathBuf>,
        /// Renderer executable, overriding the settings.
        #[arg(long)]
        renderer: Option<PathBuf>,
        /// Discard rendered chunks first.
        #[arg(long)]
        clear: bool,
    },
    /// Build the thumbnail cache for every clip.
    Thumbs {
        project: PathBuf,
        #[arg(long, default_value_t = 10)]
        count: i64,
        #[arg(long, default_value_t = 2)]
        workers: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::New { project, preset, cache } => new_project(&project, preset, cache),
        Command::Info { project } => print_info(&project),
        Command::Insert {
            project,
            resource,
            track,
            position,
            length,
        } => insert(&project, &resource, track, position, length),
        Command::DeleteBlanks {
            project,
            track,
            at,
            from,
            all_tracks,
        } => delete_blanks(&project, track, at, from, all_tracks),
        Command::Preview {
            project,
            from,
            to,
            settings,
            renderer,
            clear,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(preview(&project, from, to, settings.as_deref(), renderer, clear))
        }
        Command::Thumbs {
            project,
            count,
            workers,
        } => thumbs(&project, count, workers),
    }
}

// ---------------------------------------------------------------------------
// Project commands
// ---------------------------------------------------------------------------

fn open(path: &Path) -> Result<(Document, Timeline)> {
    let doc = Document::load_from_file(path).with_context(|| format!("cannot open {}", path.display()))?;
    let timeline = doc.build_timeline()?;
    Ok((doc, timeline))
}

fn save(path: &Path, mut doc: Document, timeline: &Timeline) -> Result<()> {
    if !timeline.check_consistency() {
        bail!("timeline is inconsistent, not saving");
    }
    doc.store_timeline(timeline);
    doc.save_to_file(path)?;
    Ok(())
}

fn track_id(timeline: &Timeline, index: usize) -> Result<TrackId> {
    timeline
        .tracks()
        .get(index)
        .map(|t| t.id)
        .with_context(|| format!("no track {index}, project has {}", timeline.tracks().len()))
}

fn new_project(path: &Path, preset: Preset, cache: PathBuf) -> Result<()> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Untitled")
        .to_string();
    let mut doc = Document::new(name, preset.profile(), cache);
    let timeline = doc.build_timeline()?;
    doc.store_timeline(&timeline);
    let saved = doc.save_to_file(path)?;
    println!("{}", saved.display());
    Ok(())
}

fn print_info(path: &Path) -> Result<()> {
    let (doc, timeline) = open(path)?;
    println!("{} ({})", doc.name, doc.profile.description);
    println!("document id: {}", doc.document_id().unwrap_or("-"));
    println!("duration: {} frames", timeline.duration());
    for (index, track) in timeline.tracks().iter().enumerate() {
        let lock = if track.locked { " [locked]" } else { "" };
        println!("{index}: {}{lock}", track.name);
        for (position, id) in track.items() {
            let Some(item) = timeline.item(id) else {
                continue;
            };
            let label = match &item.kind {
                ItemKind::Clip { resource, .. } => resource.as_str(),
                ItemKind::Composition { service } => service.as_str(),
            };
            println!("   {position:>6} +{:<6} {id} {label}", item.duration);
        }
    }
    Ok(())
}

fn insert(path: &Path, resource: &Path, track: usize, position: i64, length: Option<i64>) -> Result<()> {
    let (doc, mut timeline) = open(path)?;
    let length = match length {
        Some(length) => length,
        None => probe_media(resource)?.frames_at(timeline.fps()),
    };
    let track = track_id(&timeline, track)?;
    let id = timeline.insert_item(
        ItemDescriptor::clip(resource.to_string_lossy(), length),
        track,
        position,
    )?;
    info!(%id, position, length, "clip inserted");
    save(path, doc, &timeline)
}

fn delete_blanks(path: &Path, track: usize, at: Option<i64>, from: i64, all_tracks: bool) -> Result<()> {
    let (doc, mut timeline) = open(path)?;
    let track = track_id(&timeline, track)?;
    match at {
        Some(frame) => delete_blank_at(&mut timeline, track, frame, all_tracks)?,
        None => delete_all_blanks_from(&mut timeline, track, from)?,
    }
    save(path, doc, &timeline)
}

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

fn load_settings(path: Option<&Path>) -> Result<PreviewSettings> {
    match path {
        Some(path) => {
            let data = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
            Ok(serde_json::from_str(&data)?)
        }
        None => Ok(PreviewSettings::default()),
    }
}

fn chunk_tokens(doc: &Document, key: &str) -> Vec<String> {
    doc.property(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

async fn preview(
    path: &Path,
    from: i64,
    to: i64,
    settings: Option<&Path>,
    renderer: Option<PathBuf>,
    clear: bool,
) -> Result<()> {
    let (mut doc, timeline) = open(path)?;
    let mut settings = load_settings(settings)?;
    if let Some(renderer) = renderer {
        settings.renderer = renderer;
    }

    let tractor = Arc::new(Tractor::for_timeline(&timeline));
    let mut manager = PreviewManager::new(settings, tractor, timeline.uuid(), Arc::new(FfprobeChunkProbe));
    manager.initialize(&doc)?;
    manager.build_preview_track();
    manager.load_chunks(
        &chunk_tokens(&doc, PROP_PREVIEW_CHUNKS),
        &chunk_tokens(&doc, PROP_DIRTY_PREVIEW_CHUNKS),
    )?;
    if clear {
        manager.clear_preview_range(false).await?;
    }
    manager.add_preview_range(from, to, true).await?;
    manager.start_preview_render(&timeline).await?;
    manager.wait_for_render().await;

    for notice in manager.notices().try_iter() {
        match notice {
            PreviewNotice::RenderFailed(log) => warn!("preview render failed:\n{log}"),
            PreviewNotice::Error(message) => warn!("{message}"),
            _ => {}
        }
    }

    let (rendered, dirty) = manager.preview_chunks();
    println!("rendered: {}", rendered.join(","));
    println!("dirty: {}", dirty.join(","));
    doc.set_property(PROP_PREVIEW_CHUNKS, rendered.join(","));
    doc.set_property(PROP_DIRTY_PREVIEW_CHUNKS, dirty.join(","));
    save(path, doc, &timeline)
}

// ---------------------------------------------------------------------------
// Thumbnails
// ---------------------------------------------------------------------------

fn thumbs(path: &Path, count: i64, workers: usize) -> Result<()> {
    let (doc, timeline) = open(path)?;
    let cache = ThumbnailCache::new(doc.ensure_cache_dir(CacheKind::Thumbnails, doc.uuid)?)?;
    let scheduler = CacheScheduler::new(cache, Arc::new(FfmpegExtractor::default()), count);
    let tasks = TaskManager::new(workers.max(1));
    let events = tasks.events();

    let mut queued = 0;
    for track in timeline.tracks() {
        for (_, id) in track.items() {
            let inserted = TimelineEvent::ItemInserted { id, track: track.id };
            if scheduler.handle_event(&tasks, &timeline, &inserted) {
                queued += 1;
            }
        }
    }
    info!(queued, "thumbnail jobs queued");
    if !tasks.wait_idle(Duration::from_secs(3600)) {
        tasks.cancel_jobs();
        bail!("thumbnail jobs did not finish");
    }

    let mut failed = 0;
    for event in events.try_iter() {
        if let TaskStatus::Failed(reason) = event.status {
            warn!(owner = %event.key.owner, %reason, "thumbnail job failed");
            failed += 1;
        }
    }
    println!("{} clips cached, {failed} failed", queued - failed);
    Ok(())
}
