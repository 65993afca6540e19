use crate::tasks::{JobKind, Task, TaskContext, TaskManager};
use crate::thumbnail_cache::{content_hash, ThumbnailCache};
use crate::thumbnails::FrameExtractor;
use cutline_core::types::{ItemKind, TimelineEvent};
use cutline_core::Timeline;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Fills the thumbnail cache for one clip's source range.
pub struct CacheTask {
    source: PathBuf,
    in_point: i64,
    out_point: i64,
    fps: f64,
    thumbs_count: i64,
    cache: ThumbnailCache,
    extractor: Arc<dyn FrameExtractor>,
}

impl CacheTask {
    pub fn new(
        source: impl Into<PathBuf>,
        in_point: i64,
        out_point: i64,
        fps: f64,
        thumbs_count: i64,
        cache: ThumbnailCache,
        extractor: Arc<dyn FrameExtractor>,
    ) -> Self {
        Self {
            source: source.into(),
            in_point,
            out_point,
            fps,
            thumbs_count: thumbs_count.max(1),
            cache,
            extractor,
        }
    }

    /// Source frames to cache: at most `thumbs_count`, no closer than one
    /// second apart, starting at the in point.
    pub fn frames(&self) -> Vec<i64> {
        let duration = (self.out_point - self.in_point).max(0);
        let step = self.fps.max(duration as f64 / self.thumbs_count as f64).ceil().max(1.0) as i64;
        let mut frames = Vec::new();
        let mut pos = self.in_point;
        for i in 1..=self.thumbs_count {
            if pos > self.in_point + duration {
                break;
            }
            frames.push(pos);
            pos = self.in_point + step * i;
        }
        frames
    }
}

impl Task for CacheTask {
    fn kind(&self) -> JobKind {
        JobKind::Cache
    }

    fn run(&mut self, ctx: &TaskContext) -> Result<(), String> {
        if ctx.should_stop() {
            return Ok(());
        }
        let hash = content_hash(&self.source).map_err(|e| e.to_string())?;
        std::fs::create_dir_all(self.cache.dir_for(&hash)).map_err(|e| e.to_string())?;
        let frames = self.frames();
        let total = frames.len().max(1);
        for (count, frame) in frames.into_iter().enumerate() {
            ctx.report_progress((100 * count / total) as u8);
            if ctx.should_stop() {
                break;
            }
            if self.cache.contains(&hash, frame) {
                continue;
            }
            let output = self.cache.path_for(&hash, frame);
            self.extractor
                .extract(&self.source, frame, self.fps, &output)
                .map_err(|e| e.to_string())?;
            debug!(frame, source = %self.source.display(), "cached thumbnail");
        }
        Ok(())
    }
}

/// Starts a [`CacheTask`] for every clip placed on the timeline.
pub struct CacheScheduler {
    cache: ThumbnailCache,
    extractor: Arc<dyn FrameExtractor>,
    thumbs_count: i64,
}

impl CacheScheduler {
    pub fn new(cache: ThumbnailCache, extractor: Arc<dyn FrameExtractor>, thumbs_count: i64) -> Self {
        Self {
            cache,
            extractor,
            thumbs_count,
        }
    }

    /// React to one timeline event. Returns true when a job was queued.
    pub fn handle_event(&self, tasks: &TaskManager, timeline: &Timeline, event: &TimelineEvent) -> bool {
        let TimelineEvent::ItemInserted { id, .. } = event else {
            return false;
        };
        let Some(item) = timeline.item(*id) else {
            return false;
        };
        let ItemKind::Clip { resource, .. } = &item.kind else {
            return false;
        };
        if tasks.has_pending_job(*id, JobKind::Cache) {
            return false;
        }
        let task = CacheTask::new(
            resource,
            item.in_point,
            item.out_point(),
            timeline.fps(),
            self.thumbs_count,
            self.cache.clone(),
            self.extractor.clone(),
        );
        tasks.start_task(*id, Box::new(task))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
