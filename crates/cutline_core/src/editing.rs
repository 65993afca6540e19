use crate::error::{CoreError, Result};
use crate::history::{Fun, Transaction};
use crate::timeline::Timeline;
use crate::track::Track;
use crate::types::*;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Where an item sits: a track and a start frame, or nowhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    pub id: ItemId,
    pub track: Option<TrackId>,
    pub position: i64,
}

fn validate_descriptor(descriptor: &ItemDescriptor) -> Result<()> {
    if descriptor.duration < 1 {
        return Err(CoreError::InvalidDuration(descriptor.duration));
    }
    if descriptor.in_point < 0 {
        return Err(CoreError::InvalidPosition(descriptor.in_point));
    }
    if let ItemKind::Clip {
        source_length: Some(length),
        ..
    } = descriptor.kind
    {
        if descriptor.in_point + descriptor.duration > length {
            return Err(CoreError::InvalidDuration(descriptor.duration));
        }
    }
    Ok(())
}

impl Timeline {
    // -----------------------------------------------------------------------
    // Raw operations: no validation beyond structural sanity, no journaling.
    // Undo/redo closures are built from these.
    // -----------------------------------------------------------------------

    fn unplace(&mut self, id: ItemId) -> Option<Placement> {
        let item = self.items.get(&id)?;
        let previous = Placement {
            id,
            track: item.track_id,
            position: item.position,
        };
        if let Some(track) = previous.track {
            if let Some(t) = self.track_mut(track) {
                t.remove_slot(previous.position);
            }
        }
        if let Some(item) = self.items.get_mut(&id) {
            item.track_id = None;
        }
        Some(previous)
    }

    fn place(&mut self, placement: &Placement) -> bool {
        let Some(duration) = self.items.get(&placement.id).map(|i| i.duration) else {
            return false;
        };
        if let Some(track) = placement.track {
            let end = placement.position + duration;
            let Some(t) = self.track_mut(track) else {
                return false;
            };
            if !t.is_free(placement.position, end, |_| false) {
                return false;
            }
            t.insert_slot(placement.id, placement.position, end);
        }
        if let Some(item) = self.items.get_mut(&placement.id) {
            item.track_id = placement.track;
            item.position = placement.position;
        }
        true
    }

    pub(crate) fn insert_raw(&mut self, item: Item) -> bool {
        if self.items.contains_key(&item.id) {
            return false;
        }
        let placement = Placement {
            id: item.id,
            track: item.track_id,
            position: item.position,
        };
        let (start, end) = (item.position, item.end());
        self.items.insert(item.id, Item { track_id: None, ..item });
        if !self.place(&placement) {
            self.items.remove(&placement.id);
            return false;
        }
        if let Some(track) = placement.track {
            self.emit(TimelineEvent::ItemInserted {
                id: placement.id,
                track,
            });
            self.invalidate(start, end);
        }
        true
    }

    pub(crate) fn remove_raw(&mut self, id: ItemId) -> Option<Item> {
        let previous = self.unplace(id)?;
        let item = self.items.remove(&id)?;
        if let Some(track) = previous.track {
            self.emit(TimelineEvent::ItemRemoved { id, track });
            self.invalidate(item.position, item.end());
        }
        Some(Item {
            track_id: previous.track,
            ..item
        })
    }

    /// Move several items at once; all or nothing.
    pub(crate) fn move_raw(&mut self, placements: &[Placement]) -> bool {
        let valid = placements.iter().all(|p| {
            self.items.contains_key(&p.id) && p.track.map_or(true, |t| self.track(t).is_some())
        });
        if !valid {
            return false;
        }
        let previous: Vec<Placement> = placements.iter().filter_map(|p| self.unplace(p.id)).collect();
        let placed = placements.iter().take_while(|p| self.place(p)).count();
        if placed < placements.len() {
            for p in &placements[..placed] {
                self.unplace(p.id);
            }
            for p in &previous {
                self.place(p);
            }
            return false;
        }
        for (old, new) in previous.iter().zip(placements) {
            let duration = self.items.get(&new.id).map_or(0, |i| i.duration);
            let event = match (old.track, new.track) {
                (None, Some(track)) => Some(TimelineEvent::ItemInserted { id: new.id, track }),
                (Some(track), None) => Some(TimelineEvent::ItemRemoved { id: new.id, track }),
                (Some(_), Some(track)) => Some(TimelineEvent::ItemMoved {
                    id: new.id,
                    track,
                    position: new.position,
                }),
                (None, None) => None,
            };
            if let Some(event) = event {
                self.emit(event);
            }
            if old.track.is_some() {
                self.invalidate(old.position, old.position + duration);
            }
            if new.track.is_some() {
                self.invalidate(new.position, new.position + duration);
            }
        }
        true
    }

    pub(crate) fn resize_raw(&mut self, id: ItemId, position: i64, duration: i64, in_point: i64) -> bool {
        let Some(old) = self.items.get(&id).cloned() else {
            return false;
        };
        if let Some(track) = old.track_id {
            let Some(t) = self.track_mut(track) else {
                return false;
            };
            t.remove_slot(old.position);
            if !t.is_free(position, position + duration, |_| false) {
                t.insert_slot(id, old.position, old.end());
                return false;
            }
            t.insert_slot(id, position, position + duration);
        }
        if let Some(item) = self.items.get_mut(&id) {
            item.position = position;
            item.duration = duration;
            item.in_point = in_point;
        }
        if old.track_id.is_some() {
            self.emit(TimelineEvent::ItemResized { id, duration });
            self.invalidate(old.position.min(position), old.end().max(position + duration));
        }
        true
    }

    fn insert_track_raw(&mut self, track: Track, index: usize) -> bool {
        if index > self.tracks.len() || self.track(track.id).is_some() {
            return false;
        }
        self.tracks.insert(index, track);
        true
    }

    fn remove_track_raw(&mut self, id: TrackId) -> bool {
        match self.track_index(id) {
            Some(index) if self.tracks[index].is_empty() => {
                self.tracks.remove(index);
                true
            }
            _ => false,
        }
    }

    fn set_locked_raw(&mut self, id: TrackId, locked: bool) -> bool {
        match self.track_mut(id) {
            Some(track) => {
                track.locked = locked;
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Validation helpers
    // -----------------------------------------------------------------------

    pub(crate) fn writable_track(&self, id: TrackId) -> Result<&Track> {
        let track = self.track(id).ok_or(CoreError::TrackNotFound(id))?;
        if track.locked {
            return Err(CoreError::TrackLocked(id));
        }
        Ok(track)
    }

    /// Targets for moving `primary`'s whole group by the given deltas.
    pub fn propose_group_move(
        &self,
        primary: ItemId,
        delta_position: i64,
        delta_track: i64,
    ) -> Result<Vec<MoveTarget>> {
        let proposal = self
            .groups
            .propose_move(primary, delta_position, delta_track, |id| {
                let item = self.items.get(&id)?;
                let index = self.track_index(item.track_id?)?;
                Some((index, item.position))
            })
            .ok_or(CoreError::Unassigned(primary))?;
        proposal
            .into_iter()
            .map(|p| {
                let track = usize::try_from(p.track_index)
                    .ok()
                    .and_then(|i| self.tracks.get(i))
                    .map(|t| t.id)
                    .ok_or_else(|| {
                        CoreError::InvalidOperation(format!("no track at index {}", p.track_index))
                    })?;
                Ok(MoveTarget {
                    id: p.id,
                    track,
                    position: p.position,
                })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Request forms
    // -----------------------------------------------------------------------

    /// Create an item that is not placed on any track.
    pub fn request_create(&mut self, descriptor: ItemDescriptor, tx: &mut Transaction) -> Result<ItemId> {
        validate_descriptor(&descriptor)?;
        let id = ItemId(self.next_id());
        let item = Item {
            id,
            track_id: None,
            position: 0,
            duration: descriptor.duration,
            in_point: descriptor.in_point,
            kind: descriptor.kind,
        };
        let redo: Fun = Arc::new(move |tl| tl.insert_raw(item.clone()));
        let undo: Fun = Arc::new(move |tl| tl.remove_raw(id).is_some());
        if !tx.apply(self, undo, redo) {
            return Err(CoreError::InvalidOperation(format!("could not create {id}")));
        }
        Ok(id)
    }

    pub fn request_insert(
        &mut self,
        descriptor: ItemDescriptor,
        track: TrackId,
        position: i64,
        tx: &mut Transaction,
    ) -> Result<ItemId> {
        validate_descriptor(&descriptor)?;
        if position < 0 {
            return Err(CoreError::InvalidPosition(position));
        }
        if !self
            .writable_track(track)?
            .is_free(position, position + descriptor.duration, |_| false)
        {
            return Err(CoreError::OverlapDetected { track, position });
        }
        let id = ItemId(self.next_id());
        let item = Item {
            id,
            track_id: Some(track),
            position,
            duration: descriptor.duration,
            in_point: descriptor.in_point,
            kind: descriptor.kind,
        };
        let redo: Fun = Arc::new(move |tl| tl.insert_raw(item.clone()));
        let undo: Fun = Arc::new(move |tl| tl.remove_raw(id).is_some());
        if !tx.apply(self, undo, redo) {
            return Err(CoreError::OverlapDetected { track, position });
        }
        debug!(%id, %track, position, "item inserted");
        Ok(id)
    }

    /// Move an item, dragging its whole group along when it is grouped.
    pub fn request_move(&mut self, id: ItemId, track: TrackId, position: i64, tx: &mut Transaction) -> Result<()> {
        let item = self.items.get(&id).ok_or(CoreError::ItemNotFound(id))?;
        let targets = if self.groups.is_in_group(id) {
            let current = item.track_id.ok_or(CoreError::Unassigned(id))?;
            let from = self.track_index(current).ok_or(CoreError::TrackNotFound(current))?;
            let to = self.track_index(track).ok_or(CoreError::TrackNotFound(track))?;
            self.propose_group_move(id, position - item.position, to as i64 - from as i64)?
        } else {
            vec![MoveTarget { id, track, position }]
        };
        self.request_move_items(&targets, tx)
    }

    /// Move several items atomically. Items in `targets` may swap or slide
    /// over each other's current places; only final positions are checked.
    pub fn request_move_items(&mut self, targets: &[MoveTarget], tx: &mut Transaction) -> Result<()> {
        let members: HashSet<ItemId> = targets.iter().map(|t| t.id).collect();
        if members.len() != targets.len() {
            return Err(CoreError::InvalidOperation("item listed twice in move".into()));
        }
        let mut old = Vec::with_capacity(targets.len());
        let mut new = Vec::with_capacity(targets.len());
        let mut intervals = Vec::with_capacity(targets.len());
        for target in targets {
            let item = self.items.get(&target.id).ok_or(CoreError::ItemNotFound(target.id))?;
            if target.position < 0 {
                return Err(CoreError::InvalidPosition(target.position));
            }
            self.writable_track(target.track)?;
            if let Some(source) = item.track_id {
                self.writable_track(source)?;
            }
            old.push(Placement {
                id: target.id,
                track: item.track_id,
                position: item.position,
            });
            new.push(Placement {
                id: target.id,
                track: Some(target.track),
                position: target.position,
            });
            intervals.push((target.track, target.position, target.position + item.duration));
        }
        if old == new {
            return Ok(());
        }
        for (track, start, end) in &intervals {
            let free = self
                .track(*track)
                .is_some_and(|t| t.is_free(*start, *end, |other| members.contains(&other)));
            if !free {
                return Err(CoreError::OverlapDetected {
                    track: *track,
                    position: *start,
                });
            }
        }
        intervals.sort();
        for pair in intervals.windows(2) {
            let ((ta, _, end_a), (tb, start_b, _)) = (pair[0], pair[1]);
            if ta == tb && end_a > start_b {
                return Err(CoreError::OverlapDetected {
                    track: tb,
                    position: start_b,
                });
            }
        }
        let redo: Fun = Arc::new(move |tl| tl.move_raw(&new));
        let undo: Fun = Arc::new(move |tl| tl.move_raw(&old));
        if !tx.apply(self, undo, redo) {
            return Err(CoreError::InvalidOperation("move could not be applied".into()));
        }
        Ok(())
    }

    /// Change an item's duration keeping the opposite edge fixed. Returns
    /// the new duration.
    pub fn request_resize(
        &mut self,
        id: ItemId,
        new_duration: i64,
        from_start: bool,
        tx: &mut Transaction,
    ) -> Result<i64> {
        let item = self.items.get(&id).ok_or(CoreError::ItemNotFound(id))?.clone();
        if new_duration < 1 {
            return Err(CoreError::InvalidDuration(new_duration));
        }
        if new_duration == item.duration {
            return Ok(new_duration);
        }
        let delta = new_duration - item.duration;
        let (position, in_point) = if from_start {
            (item.position - delta, item.in_point - delta)
        } else {
            (item.position, item.in_point)
        };
        if position < 0 {
            return Err(CoreError::InvalidPosition(position));
        }
        if in_point < 0 {
            return Err(CoreError::InvalidDuration(new_duration));
        }
        if item
            .source_length()
            .is_some_and(|len| in_point + new_duration > len)
        {
            return Err(CoreError::InvalidDuration(new_duration));
        }
        if let Some(track) = item.track_id {
            let free = self
                .writable_track(track)?
                .is_free(position, position + new_duration, |other| other == id);
            if !free {
                return Err(CoreError::OverlapDetected { track, position });
            }
        }
        let (old_position, old_duration, old_in) = (item.position, item.duration, item.in_point);
        let redo: Fun = Arc::new(move |tl| tl.resize_raw(id, position, new_duration, in_point));
        let undo: Fun = Arc::new(move |tl| tl.resize_raw(id, old_position, old_duration, old_in));
        if !tx.apply(self, undo, redo) {
            return Err(CoreError::InvalidOperation(format!("could not resize {id}")));
        }
        Ok(new_duration)
    }

    /// Remove an item from its track and from the index. Group membership is
    /// restored exactly on undo.
    pub fn request_delete(&mut self, id: ItemId, tx: &mut Transaction) -> Result<()> {
        let item = self.items.get(&id).ok_or(CoreError::ItemNotFound(id))?.clone();
        if let Some(track) = item.track_id {
            self.writable_track(track)?;
        }
        let groups_before = self.groups.clone();
        let redo: Fun = Arc::new(move |tl| {
            if tl.remove_raw(id).is_none() {
                return false;
            }
            tl.groups.detach(id);
            true
        });
        let undo: Fun = Arc::new(move |tl| {
            if !tl.insert_raw(item.clone()) {
                return false;
            }
            tl.groups = groups_before.clone();
            true
        });
        if !tx.apply(self, undo, redo) {
            return Err(CoreError::InvalidOperation(format!("could not delete {id}")));
        }
        Ok(())
    }

    /// Delete every item of the root group containing `id`.
    pub fn request_delete_group(&mut self, id: ItemId, tx: &mut Transaction) -> Result<()> {
        if !self.items.contains_key(&id) {
            return Err(CoreError::ItemNotFound(id));
        }
        let mut local = Transaction::new();
        for member in self.groups.group_mates(id) {
            if let Err(e) = self.request_delete(member, &mut local) {
                local.rollback(self);
                return Err(e);
            }
        }
        tx.append(local);
        Ok(())
    }

    /// Group the root-most nodes of `ids` under a new group.
    pub fn request_group(&mut self, ids: &[ItemId], tx: &mut Transaction) -> Result<GroupId> {
        if let Some(missing) = ids.iter().find(|id| !self.items.contains_key(id)) {
            return Err(CoreError::ItemNotFound(*missing));
        }
        let roots: BTreeSet<usize> = ids.iter().map(|id| self.groups.root_of(id.0)).collect();
        if roots.len() < 2 {
            return Err(CoreError::InvalidOperation(
                "grouping needs at least two distinct items or groups".into(),
            ));
        }
        let group = GroupId(self.next_id());
        let redo: Fun = Arc::new(move |tl| tl.groups.create(group, &roots));
        let undo: Fun = Arc::new(move |tl| tl.groups.destroy(group).is_some());
        if !tx.apply(self, undo, redo) {
            return Err(CoreError::InvalidOperation(format!("could not create {group}")));
        }
        Ok(group)
    }

    /// Dissolve the root group containing `id`; its children become roots.
    pub fn request_ungroup(&mut self, id: ItemId, tx: &mut Transaction) -> Result<()> {
        if !self.items.contains_key(&id) {
            return Err(CoreError::ItemNotFound(id));
        }
        let group = self.groups.root_group(id).ok_or(CoreError::NotGrouped(id))?;
        let children = self
            .groups
            .children(group)
            .cloned()
            .ok_or(CoreError::GroupNotFound(group))?;
        let redo: Fun = Arc::new(move |tl| tl.groups.destroy(group).is_some());
        let undo: Fun = Arc::new(move |tl| tl.groups.create(group, &children));
        if !tx.apply(self, undo, redo) {
            return Err(CoreError::InvalidOperation(format!("could not dissolve {group}")));
        }
        Ok(())
    }

    pub fn request_add_track(&mut self, kind: TrackKind, index: usize, tx: &mut Transaction) -> Result<TrackId> {
        if index > self.tracks.len() {
            return Err(CoreError::InvalidOperation(format!("track index {index} out of range")));
        }
        let id = TrackId(self.next_id());
        let track = Track::new(id, kind, self.default_track_name(kind));
        let redo: Fun = Arc::new(move |tl| tl.insert_track_raw(track.clone(), index));
        let undo: Fun = Arc::new(move |tl| tl.remove_track_raw(id));
        if !tx.apply(self, undo, redo) {
            return Err(CoreError::InvalidOperation(format!("could not add {id}")));
        }
        Ok(id)
    }

    pub fn request_set_track_locked(&mut self, id: TrackId, locked: bool, tx: &mut Transaction) -> Result<()> {
        let track = self.track(id).ok_or(CoreError::TrackNotFound(id))?;
        if track.locked == locked {
            return Ok(());
        }
        let redo: Fun = Arc::new(move |tl| tl.set_locked_raw(id, locked));
        let undo: Fun = Arc::new(move |tl| tl.set_locked_raw(id, !locked));
        if !tx.apply(self, undo, redo) {
            return Err(CoreError::TrackNotFound(id));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Committing forms
    // -----------------------------------------------------------------------

    pub fn create_item(&mut self, descriptor: ItemDescriptor) -> Result<ItemId> {
        let mut tx = Transaction::new();
        let id = self.request_create(descriptor, &mut tx)?;
        self.commit(tx, "Create clip");
        Ok(id)
    }

    pub fn insert_item(&mut self, descriptor: ItemDescriptor, track: TrackId, position: i64) -> Result<ItemId> {
        let mut tx = Transaction::new();
        let id = self.request_insert(descriptor, track, position, &mut tx)?;
        self.commit(tx, "Insert clip");
        Ok(id)
    }

    pub fn move_item(&mut self, id: ItemId, track: TrackId, position: i64) -> Result<()> {
        let mut tx = Transaction::new();
        self.request_move(id, track, position, &mut tx)?;
        self.commit(tx, "Move clip");
        Ok(())
    }

    pub fn resize_item(&mut self, id: ItemId, new_duration: i64, from_start: bool) -> Result<i64> {
        let mut tx = Transaction::new();
        let duration = self.request_resize(id, new_duration, from_start, &mut tx)?;
        self.commit(tx, "Resize clip");
        Ok(duration)
    }

    pub fn delete_item(&mut self, id: ItemId) -> Result<()> {
        let mut tx = Transaction::new();
        self.request_delete(id, &mut tx)?;
        self.commit(tx, "Delete clip");
        Ok(())
    }

    pub fn delete_group(&mut self, id: ItemId) -> Result<()> {
        let mut tx = Transaction::new();
        self.request_delete_group(id, &mut tx)?;
        self.commit(tx, "Delete group");
        Ok(())
    }

    pub fn group_items(&mut self, ids: &[ItemId]) -> Result<GroupId> {
        let mut tx = Transaction::new();
        let group = self.request_group(ids, &mut tx)?;
        self.commit(tx, "Group clips");
        Ok(group)
    }

    pub fn ungroup_items(&mut self, id: ItemId) -> Result<()> {
        let mut tx = Transaction::new();
        self.request_ungroup(id, &mut tx)?;
        self.commit(tx, "Ungroup clips");
        Ok(())
    }

    pub fn add_track(&mut self, kind: TrackKind, index: usize) -> Result<TrackId> {
        let mut tx = Transaction::new();
        let id = self.request_add_track(kind, index, &mut tx)?;
        self.commit(tx, "Add track");
        Ok(id)
    }

    pub fn set_track_locked(&mut self, id: TrackId, locked: bool) -> Result<()> {
        let mut tx = Transaction::new();
        self.request_set_track_locked(id, locked, &mut tx)?;
        self.commit(tx, if locked { "Lock track" } else { "Unlock track" });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
