use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

/// Handle of an item (clip or composition) in the timeline's global index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ItemId(pub usize);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct TrackId(pub usize);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct GroupId(pub usize);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item#{}", self.0)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track#{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TrackKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ItemKind {
    /// Media placed from the project bin. `source_length` is `None` for
    /// producers that can be stretched freely (colors, titles, images).
    Clip {
        resource: String,
        source_length: Option<i64>,
    },
    Composition {
        service: String,
    },
}

/// A clip or composition known to the timeline.
///
/// All positions and lengths are in frames. `track_id == None` means the item
/// exists in the global index but is not placed on any track yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub track_id: Option<TrackId>,
    pub position: i64,
    pub duration: i64,
    pub in_point: i64,
    pub kind: ItemKind,
}

impl Item {
    /// First frame after the item.
    pub fn end(&self) -> i64 {
        self.position + self.duration
    }

    /// Last source frame used by the item.
    pub fn out_point(&self) -> i64 {
        self.in_point + self.duration - 1
    }

    pub fn is_clip(&self) -> bool {
        matches!(self.kind, ItemKind::Clip { .. })
    }

    pub fn is_composition(&self) -> bool {
        matches!(self.kind, ItemKind::Composition { .. })
    }

    pub fn resource(&self) -> Option<&str> {
        match &self.kind {
            ItemKind::Clip { resource, .. } => Some(resource),
            ItemKind::Composition { .. } => None,
        }
    }

    pub fn source_length(&self) -> Option<i64> {
        match &self.kind {
            ItemKind::Clip { source_length, .. } => *source_length,
            ItemKind::Composition { .. } => None,
        }
    }

    /// Whether `[start, end)` intersects the item's interval. Touching
    /// intervals do not intersect.
    pub fn intersects(&self, start: i64, end: i64) -> bool {
        self.position < end && start < self.end()
    }
}

/// What to create when inserting a new item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemDescriptor {
    pub kind: ItemKind,
    pub in_point: i64,
    pub duration: i64,
}

impl ItemDescriptor {
    /// A clip using its whole source of `length` frames.
    pub fn clip(resource: impl Into<String>, length: i64) -> Self {
        Self {
            kind: ItemKind::Clip {
                resource: resource.into(),
                source_length: Some(length),
            },
            in_point: 0,
            duration: length,
        }
    }

    /// A clip with no source limit (color, image, title).
    pub fn unlimited_clip(resource: impl Into<String>, duration: i64) -> Self {
        Self {
            kind: ItemKind::Clip {
                resource: resource.into(),
                source_length: None,
            },
            in_point: 0,
            duration,
        }
    }

    pub fn composition(service: impl Into<String>, duration: i64) -> Self {
        Self {
            kind: ItemKind::Composition {
                service: service.into(),
            },
            in_point: 0,
            duration,
        }
    }

    /// Restrict the descriptor to the source range `[in_point, in_point + duration)`.
    pub fn with_range(mut self, in_point: i64, duration: i64) -> Self {
        self.in_point = in_point;
        self.duration = duration;
        self
    }
}

// ---------------------------------------------------------------------------
// MoveTarget
// ---------------------------------------------------------------------------

/// Destination of one item inside an atomic multi-item move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveTarget {
    pub id: ItemId,
    pub track: TrackId,
    pub position: i64,
}

// ---------------------------------------------------------------------------
// TimelineEvent
// ---------------------------------------------------------------------------

/// Notifications published by the timeline, in mutation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    ItemInserted { id: ItemId, track: TrackId },
    ItemRemoved { id: ItemId, track: TrackId },
    ItemMoved { id: ItemId, track: TrackId, position: i64 },
    ItemResized { id: ItemId, duration: i64 },
    /// Frames `[start, end)` changed and their rendered previews are stale.
    Invalidate { start: i64, end: i64 },
    UndoIndexChanged { index: usize, count: usize },
    /// Redo entries from `from` onwards were discarded.
    UndoTruncated { from: usize },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
