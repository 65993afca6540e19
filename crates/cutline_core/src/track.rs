use crate::types::{ItemId, TrackId, TrackKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placement of one item on a track: which item, and where it ends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slot {
    pub id: ItemId,
    pub end: i64,
}

/// An ordered lane of non-overlapping items keyed by start frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub kind: TrackKind,
    pub name: String,
    pub locked: bool,
    slots: BTreeMap<i64, Slot>,
}

impl Track {
    pub fn new(id: TrackId, kind: TrackKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            locked: false,
            slots: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Items in position order.
    pub fn items(&self) -> impl Iterator<Item = (i64, ItemId)> + '_ {
        self.slots.iter().map(|(pos, slot)| (*pos, slot.id))
    }

    pub fn slots(&self) -> impl Iterator<Item = (i64, Slot)> + '_ {
        self.slots.iter().map(|(pos, slot)| (*pos, *slot))
    }

    /// End of the last item, 0 for an empty track.
    pub fn end(&self) -> i64 {
        self.slots.values().next_back().map_or(0, |s| s.end)
    }

    pub fn contains(&self, id: ItemId, position: i64) -> bool {
        self.slots.get(&position).is_some_and(|s| s.id == id)
    }

    /// Items intersecting `[start, end)`, in position order.
    pub fn overlapping(&self, start: i64, end: i64) -> Vec<ItemId> {
        // slots never overlap, so ends grow with starts and the hits form a tail
        let mut hits: Vec<ItemId> = self
            .slots
            .range(..end)
            .rev()
            .take_while(|(_, slot)| slot.end > start)
            .map(|(_, slot)| slot.id)
            .collect();
        hits.reverse();
        hits
    }

    /// Whether `[start, end)` is free, ignoring the items for which `ignore` is true.
    pub fn is_free(&self, start: i64, end: i64, ignore: impl Fn(ItemId) -> bool) -> bool {
        self.overlapping(start, end).into_iter().all(ignore)
    }

    /// Item covering `frame`, if any.
    pub fn item_at(&self, frame: i64) -> Option<(i64, Slot)> {
        self.slots
            .range(..=frame)
            .next_back()
            .filter(|(_, slot)| slot.end > frame)
            .map(|(pos, slot)| (*pos, *slot))
    }

    /// First item starting at or after `frame`.
    pub fn next_item_from(&self, frame: i64) -> Option<(i64, Slot)> {
        self.slots.range(frame..).next().map(|(pos, slot)| (*pos, *slot))
    }

    /// The blank containing `frame` as `(start, end)`. `end` is `None` for the
    /// open blank after the last item. `None` when `frame` is inside an item.
    pub fn blank_at(&self, frame: i64) -> Option<(i64, Option<i64>)> {
        if frame < 0 || self.item_at(frame).is_some() {
            return None;
        }
        let start = self
            .slots
            .range(..=frame)
            .next_back()
            .map_or(0, |(_, slot)| slot.end);
        let end = self.next_item_from(frame).map(|(pos, _)| pos);
        Some((start, end))
    }

    pub(crate) fn insert_slot(&mut self, id: ItemId, start: i64, end: i64) {
        self.slots.insert(start, Slot { id, end });
    }

    pub(crate) fn remove_slot(&mut self, start: i64) -> Option<Slot> {
        self.slots.remove(&start)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
