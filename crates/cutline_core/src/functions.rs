//! Batch edits composed from the timeline's request operations. Each call is
//! a single undo entry; a failing sub-step rolls back everything applied
//! before it.

use crate::error::{CoreError, Result};
use crate::history::Transaction;
use crate::timeline::Timeline;
use crate::types::{ItemId, MoveTarget, TrackId};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// A spacer drag started with [`spacer_start`] and finished with [`spacer_end`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacerOperation {
    /// First item of the moving set; the drag is measured from its position.
    pub anchor: ItemId,
    pub start: i64,
    pub track: Option<TrackId>,
    items: Vec<ItemId>,
}

impl SpacerOperation {
    pub fn items(&self) -> &[ItemId] {
        &self.items
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Items starting at or after `from` on `tracks`, plus everything grouped
/// with them.
fn shift_set(tl: &Timeline, tracks: &[TrackId], from: i64) -> BTreeSet<ItemId> {
    tracks
        .iter()
        .flat_map(|track| tl.items_from(*track, from))
        .flat_map(|id| tl.groups.group_mates(id))
        .collect()
}

/// Whether shifting `set` would pull a group apart on `track`: a member
/// sits on the same track before `frame`.
fn splits_group(tl: &Timeline, set: &BTreeSet<ItemId>, track: TrackId, frame: i64) -> bool {
    set.iter().any(|id| {
        tl.item(*id)
            .is_some_and(|item| item.track_id == Some(track) && item.position < frame)
    })
}

fn shift_targets(tl: &Timeline, set: &BTreeSet<ItemId>, delta: i64) -> Result<Vec<MoveTarget>> {
    set.iter()
        .map(|id| {
            let item = tl.item(*id).ok_or(CoreError::ItemNotFound(*id))?;
            let track = item.track_id.ok_or(CoreError::Unassigned(*id))?;
            Ok(MoveTarget {
                id: *id,
                track,
                position: item.position + delta,
            })
        })
        .collect()
}

fn unlocked_tracks(tl: &Timeline) -> Vec<TrackId> {
    tl.tracks().iter().filter(|t| !t.locked).map(|t| t.id).collect()
}

// ---------------------------------------------------------------------------
// Blanks
// ---------------------------------------------------------------------------

/// Close every blank on `track` from `start` onwards.
///
/// Blanks between two members of the same group are left in place. If a
/// group member on another track cannot follow, nothing changes.
pub fn delete_all_blanks_from(tl: &mut Timeline, track: TrackId, start: i64) -> Result<()> {
    tl.writable_track(track)?;
    let mut tx = Transaction::new();
    let mut cursor = start.max(0);
    if let Some((_, covering)) = tl.track(track).and_then(|t| t.item_at(cursor)) {
        cursor = covering.end;
    }
    while let Some((next_start, slot)) = tl.track(track).and_then(|t| t.next_item_from(cursor)) {
        let gap = next_start - cursor;
        if gap == 0 {
            cursor = slot.end;
            continue;
        }
        let set = shift_set(tl, &[track], next_start);
        if splits_group(tl, &set, track, next_start) {
            debug!(%track, frame = cursor, "blank inside a group left in place");
            cursor = slot.end;
            continue;
        }
        let applied = shift_targets(tl, &set, -gap)
            .and_then(|targets| tl.request_move_items(&targets, &mut tx));
        if let Err(e) = applied {
            tx.rollback(tl);
            return Err(e);
        }
        cursor = slot.end - gap;
    }
    info!(%track, start, steps = tx.len(), "removed all blanks");
    tl.commit(tx, "Remove all spaces");
    Ok(())
}

/// Close the blank containing `frame` on `track`. With `affect_all_tracks`
/// every unlocked track is shifted, so group members on other tracks move
/// along instead of blocking.
pub fn delete_blank_at(tl: &mut Timeline, track: TrackId, frame: i64, affect_all_tracks: bool) -> Result<()> {
    let lane = tl.writable_track(track)?;
    let (blank_start, blank_end) = lane.blank_at(frame).ok_or(CoreError::NoBlank(frame))?;
    let blank_end = blank_end.ok_or(CoreError::NoBlank(frame))?;
    let gap = blank_end - blank_start;

    let tracks = if affect_all_tracks {
        unlocked_tracks(tl)
    } else {
        vec![track]
    };
    let set = shift_set(tl, &tracks, blank_end);
    if splits_group(tl, &set, track, blank_end) {
        return Err(CoreError::InvalidOperation(format!(
            "blank at frame {frame} lies inside a group"
        )));
    }
    let targets = shift_targets(tl, &set, -gap)?;
    let mut tx = Transaction::new();
    tl.request_move_items(&targets, &mut tx)?;
    tl.commit(tx, "Remove space");
    Ok(())
}

// ---------------------------------------------------------------------------
// Clips
// ---------------------------------------------------------------------------

/// Delete every item on `track` starting at or after `start`.
pub fn delete_all_clips_from(tl: &mut Timeline, track: TrackId, start: i64) -> Result<()> {
    tl.writable_track(track)?;
    let mut tx = Transaction::new();
    for id in tl.items_from(track, start) {
        if let Err(e) = tl.request_delete(id, &mut tx) {
            tx.rollback(tl);
            return Err(e);
        }
    }
    tl.commit(tx, "Delete clips");
    Ok(())
}

// ---------------------------------------------------------------------------
// Spacer
// ---------------------------------------------------------------------------

/// Collect what a spacer drag at `position` moves: items at or after it on
/// `track` (every unlocked track when `None`) and their group members.
pub fn spacer_start(tl: &Timeline, track: Option<TrackId>, position: i64) -> Result<SpacerOperation> {
    let tracks = match track {
        Some(id) => {
            tl.track(id).ok_or(CoreError::TrackNotFound(id))?;
            vec![id]
        }
        None => unlocked_tracks(tl),
    };
    let (anchor, start) = tracks
        .iter()
        .flat_map(|t| tl.items_from(*t, position))
        .filter_map(|id| tl.item_position(id).map(|pos| (id, pos)))
        .min_by_key(|(id, pos)| (*pos, *id))
        .ok_or_else(|| CoreError::InvalidOperation(format!("nothing to move after frame {position}")))?;
    let items = shift_set(tl, &tracks, position).into_iter().collect();
    Ok(SpacerOperation {
        anchor,
        start,
        track,
        items,
    })
}

/// Finish a spacer drag: shift the collected set so the anchor lands on
/// `end_position`.
pub fn spacer_end(tl: &mut Timeline, operation: &SpacerOperation, end_position: i64) -> Result<()> {
    let delta = end_position - operation.start;
    if delta == 0 {
        return Ok(());
    }
    let set: BTreeSet<ItemId> = operation.items.iter().copied().collect();
    let targets = shift_targets(tl, &set, delta)?;
    let mut tx = Transaction::new();
    tl.request_move_items(&targets, &mut tx)?;
    tl.commit(tx, if delta > 0 { "Insert space" } else { "Remove space" });
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
