use crate::error::{CoreError, Result};
use crate::groups::GroupsModel;
use crate::history::{History, Transaction};
use crate::track::Track;
use crate::types::*;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Serializable state of a timeline: everything except history and
/// subscribers. Two timelines with equal snapshots are indistinguishable to
/// a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineSnapshot {
    pub uuid: Uuid,
    pub fps: f64,
    pub tracks: Vec<Track>,
    /// Sorted by id.
    pub items: Vec<Item>,
    pub groups: GroupsModel,
}

/// The editable multi-track sequence.
///
/// Tracks are ordered top to bottom. Every mutation goes through a
/// `request_*` method recording undo/redo steps into a [`Transaction`], and
/// the committing forms push that transaction onto the owned [`History`].
pub struct Timeline {
    pub(crate) uuid: Uuid,
    pub(crate) fps: f64,
    pub(crate) tracks: Vec<Track>,
    pub(crate) items: HashMap<ItemId, Item>,
    pub(crate) groups: GroupsModel,
    pub(crate) history: History,
    next_id: usize,
    subscribers: Vec<Sender<TimelineEvent>>,
}

impl fmt::Debug for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeline")
            .field("uuid", &self.uuid)
            .field("fps", &self.fps)
            .field("tracks", &self.tracks.len())
            .field("items", &self.items.len())
            .field("history", &self.history)
            .finish()
    }
}

impl Timeline {
    pub fn new(fps: f64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            fps,
            tracks: Vec::new(),
            items: HashMap::new(),
            groups: GroupsModel::new(),
            history: History::default(),
            next_id: 0,
            subscribers: Vec::new(),
        }
    }

    /// A timeline with one track per entry of `kinds`, top to bottom.
    pub fn with_tracks(fps: f64, kinds: &[TrackKind]) -> Self {
        let mut timeline = Self::new(fps);
        for kind in kinds {
            let id = TrackId(timeline.next_id());
            let name = timeline.default_track_name(*kind);
            timeline.tracks.push(Track::new(id, *kind, name));
        }
        timeline
    }

    pub fn from_snapshot(snapshot: TimelineSnapshot) -> Result<Self> {
        let next_id = snapshot
            .tracks
            .iter()
            .map(|t| t.id.0)
            .chain(snapshot.items.iter().map(|i| i.id.0))
            .chain(snapshot.groups.groups().map(|g| g.0))
            .max()
            .map_or(0, |max| max + 1);
        let timeline = Self {
            uuid: snapshot.uuid,
            fps: snapshot.fps,
            tracks: snapshot.tracks,
            items: snapshot.items.into_iter().map(|i| (i.id, i)).collect(),
            groups: snapshot.groups,
            history: History::default(),
            next_id,
            subscribers: Vec::new(),
        };
        if !timeline.check_consistency() {
            return Err(CoreError::InvalidOperation(
                "timeline snapshot is inconsistent".into(),
            ));
        }
        info!(uuid = %timeline.uuid, items = timeline.items.len(), "timeline loaded");
        Ok(timeline)
    }

    pub fn snapshot(&self) -> TimelineSnapshot {
        let mut items: Vec<Item> = self.items.values().cloned().collect();
        items.sort_by_key(|i| i.id);
        TimelineSnapshot {
            uuid: self.uuid,
            fps: self.fps,
            tracks: self.tracks.clone(),
            items,
            groups: self.groups.clone(),
        }
    }

    pub(crate) fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn default_track_name(&self, kind: TrackKind) -> String {
        let (prefix, count) = match kind {
            TrackKind::Video => ("V", self.tracks.iter().filter(|t| t.kind == kind).count()),
            TrackKind::Audio => ("A", self.tracks.iter().filter(|t| t.kind == kind).count()),
        };
        format!("{prefix}{}", count + 1)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Receive every event emitted from now on, in mutation order.
    pub fn subscribe(&mut self) -> Receiver<TimelineEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn emit(&mut self, event: TimelineEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn invalidate(&mut self, start: i64, end: i64) {
        if end > start {
            self.emit(TimelineEvent::Invalidate { start, end });
        }
    }

    fn emit_undo_index(&mut self) {
        let (index, count) = (self.history.index(), self.history.count());
        self.emit(TimelineEvent::UndoIndexChanged { index, count });
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Push an applied transaction as one undo entry. Empty transactions are
    /// dropped.
    pub fn commit(&mut self, transaction: Transaction, description: &str) {
        if transaction.is_empty() {
            return;
        }
        debug!(description, steps = transaction.len(), "commit");
        if let Some(from) = self.history.push(description, transaction) {
            self.emit(TimelineEvent::UndoTruncated { from });
        }
        self.emit_undo_index();
    }

    pub fn undo(&mut self) -> Result<()> {
        let entry = self
            .history
            .undo_entry()
            .cloned()
            .ok_or(CoreError::NothingToUndo)?;
        if !entry.transaction.undo(self) {
            error!(description = %entry.description, "undo failed");
            return Err(CoreError::UndoFailed(entry.description));
        }
        self.history.step_back();
        self.emit_undo_index();
        Ok(())
    }

    pub fn redo(&mut self) -> Result<()> {
        let entry = self
            .history
            .redo_entry()
            .cloned()
            .ok_or(CoreError::NothingToRedo)?;
        if !entry.transaction.redo(self) {
            error!(description = %entry.description, "redo failed");
            return Err(CoreError::UndoFailed(entry.description));
        }
        self.history.step_forward();
        self.emit_undo_index();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub(crate) fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    /// Ordinal of the track, 0 being the top.
    pub fn track_index(&self, id: TrackId) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }

    pub fn track_items_count(&self, id: TrackId) -> Option<usize> {
        self.track(id).map(Track::len)
    }

    pub fn groups(&self) -> &GroupsModel {
        &self.groups
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn items_count(&self) -> usize {
        self.items.len()
    }

    /// Position of a placed item.
    pub fn item_position(&self, id: ItemId) -> Option<i64> {
        self.items
            .get(&id)
            .filter(|i| i.track_id.is_some())
            .map(|i| i.position)
    }

    pub fn item_track(&self, id: ItemId) -> Option<TrackId> {
        self.items.get(&id).and_then(|i| i.track_id)
    }

    /// End of the last item over all tracks.
    pub fn duration(&self) -> i64 {
        self.tracks.iter().map(Track::end).max().unwrap_or(0)
    }

    /// Placed items intersecting `[start, end)`, on one track or on all.
    pub fn items_in_range(&self, track: Option<TrackId>, start: i64, end: i64) -> Vec<ItemId> {
        self.tracks
            .iter()
            .filter(|t| track.map_or(true, |id| t.id == id))
            .flat_map(|t| t.overlapping(start, end))
            .collect()
    }

    /// Placed items starting at or after `frame` on `track`.
    pub fn items_from(&self, track: TrackId, frame: i64) -> Vec<ItemId> {
        self.track(track)
            .map(|t| t.items().filter(|(pos, _)| *pos >= frame).map(|(_, id)| id).collect())
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Consistency
    // -----------------------------------------------------------------------

    /// Verify every structural invariant, logging the first violation.
    pub fn check_consistency(&self) -> bool {
        let mut placed = 0;
        for track in &self.tracks {
            let mut previous_end = i64::MIN;
            for (position, slot) in track.slots() {
                let Some(item) = self.items.get(&slot.id) else {
                    error!(track = %track.id, item = %slot.id, "track references unknown item");
                    return false;
                };
                if item.track_id != Some(track.id) || item.position != position || item.end() != slot.end {
                    error!(track = %track.id, item = %item.id, "track and index disagree");
                    return false;
                }
                if position < previous_end {
                    error!(track = %track.id, item = %item.id, position, "overlapping items");
                    return false;
                }
                previous_end = slot.end;
                placed += 1;
            }
        }
        for item in self.items.values() {
            if item.duration < 1 || item.position < 0 || item.in_point < 0 {
                error!(item = %item.id, "item bounds out of range");
                return false;
            }
            if item
                .source_length()
                .is_some_and(|len| item.in_point + item.duration > len)
            {
                error!(item = %item.id, "item exceeds its source");
                return false;
            }
            if let Some(track) = item.track_id {
                if !self.track(track).is_some_and(|t| t.contains(item.id, item.position)) {
                    error!(item = %item.id, %track, "item missing from its track");
                    return false;
                }
            }
        }
        let assigned = self.items.values().filter(|i| i.track_id.is_some()).count();
        if assigned != placed {
            error!(assigned, placed, "placed item count mismatch");
            return false;
        }
        self.groups.check(|id| self.items.contains_key(&id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_timeline() -> (Timeline, TrackId, TrackId) {
        let tl = Timeline::with_tracks(25.0, &[TrackKind::Video, TrackKind::Audio]);
        let (v, a) = (tl.tracks()[0].id, tl.tracks()[1].id);
        (tl, v, a)
    }

    #[test]
    fn with_tracks_names_lanes() {
        let (tl, v, a) = make_test_timeline();
        assert_eq!(tl.track(v).unwrap().name, "V1");
        assert_eq!(tl.track(a).unwrap().name, "A1");
        assert_eq!(tl.track_index(a), Some(1));
        assert_eq!(tl.duration(), 0);
        assert!(tl.check_consistency());
    }

    #[test]
    fn snapshot_roundtrip_keeps_ids_fresh() {
        let (mut tl, v, _) = make_test_timeline();
        let clip = tl.insert_item(ItemDescriptor::clip("a", 20), v, 5).unwrap();
        let restored = Timeline::from_snapshot(tl.snapshot()).unwrap();
        assert_eq!(restored.snapshot(), tl.snapshot());
        assert_eq!(restored.item_position(clip), Some(5));

        let mut restored = restored;
        let next = restored.insert_item(ItemDescriptor::clip("b", 20), v, 40).unwrap();
        assert!(next.0 > clip.0);
    }

    #[test]
    fn snapshot_json_roundtrip() {
        let (mut tl, v, _) = make_test_timeline();
        tl.insert_item(ItemDescriptor::clip("a", 20), v, 5).unwrap();
        let json = serde_json::to_string(&tl.snapshot()).unwrap();
        let back: TimelineSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tl.snapshot());
    }

    #[test]
    fn inconsistent_snapshot_is_rejected() {
        let (mut tl, v, _) = make_test_timeline();
        tl.insert_item(ItemDescriptor::clip("a", 20), v, 5).unwrap();
        let mut snapshot = tl.snapshot();
        snapshot.items[0].position = 6;
        assert!(Timeline::from_snapshot(snapshot).is_err());
    }

    #[test]
    fn events_reach_subscribers() {
        let (mut tl, v, _) = make_test_timeline();
        let rx = tl.subscribe();
        let clip = tl.insert_item(ItemDescriptor::clip("a", 20), v, 5).unwrap();
        let events: Vec<TimelineEvent> = rx.try_iter().collect();
        assert!(events.contains(&TimelineEvent::ItemInserted { id: clip, track: v }));
        assert!(events.contains(&TimelineEvent::Invalidate { start: 5, end: 25 }));
        assert_eq!(
            events.last(),
            Some(&TimelineEvent::UndoIndexChanged { index: 1, count: 1 })
        );
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let (mut tl, v, _) = make_test_timeline();
        drop(tl.subscribe());
        tl.insert_item(ItemDescriptor::clip("a", 20), v, 5).unwrap();
        assert!(tl.subscribers.is_empty());
    }

    #[test]
    fn commit_after_undo_reports_truncation() {
        let (mut tl, v, _) = make_test_timeline();
        tl.insert_item(ItemDescriptor::clip("a", 10), v, 0).unwrap();
        tl.insert_item(ItemDescriptor::clip("b", 10), v, 20).unwrap();
        tl.undo().unwrap();
        let rx = tl.subscribe();
        tl.insert_item(ItemDescriptor::clip("c", 10), v, 40).unwrap();
        let events: Vec<TimelineEvent> = rx.try_iter().collect();
        assert!(events.contains(&TimelineEvent::UndoTruncated { from: 1 }));
        assert!(!tl.history().can_redo());
    }

    #[test]
    fn undo_redo_on_empty_history() {
        let (mut tl, _, _) = make_test_timeline();
        assert!(matches!(tl.undo(), Err(CoreError::NothingToUndo)));
        assert!(matches!(tl.redo(), Err(CoreError::NothingToRedo)));
    }

    #[test]
    fn range_queries() {
        let (mut tl, v, a) = make_test_timeline();
        let c1 = tl.insert_item(ItemDescriptor::clip("a", 10), v, 0).unwrap();
        let c2 = tl.insert_item(ItemDescriptor::clip("b", 10), a, 15).unwrap();
        assert_eq!(tl.items_in_range(None, 5, 20), vec![c1, c2]);
        assert_eq!(tl.items_in_range(Some(a), 0, 15), Vec::<ItemId>::new());
        assert_eq!(tl.items_from(a, 10), vec![c2]);
        assert_eq!(tl.duration(), 25);
        assert_eq!(tl.track_items_count(v), Some(1));
    }
}
