use crate::types::{GroupId, ItemId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::error;

/// Where one member of a group should go when the group moves.
///
/// `track_index` is an ordinal in the timeline's track list and may fall out
/// of range; the timeline rejects such proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposedMove {
    pub id: ItemId,
    pub track_index: i64,
    pub position: i64,
}

/// Forest of groups over items.
///
/// Item ids and group ids come from the same counter, so both live in one
/// node namespace. Leaves are items, inner nodes are groups.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GroupsModel {
    up: BTreeMap<usize, usize>,
    down: BTreeMap<usize, BTreeSet<usize>>,
}

impl GroupsModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_group(&self, node: usize) -> bool {
        self.down.contains_key(&node)
    }

    pub fn is_in_group(&self, item: ItemId) -> bool {
        self.up.contains_key(&item.0)
    }

    pub fn parent_of(&self, node: usize) -> Option<GroupId> {
        self.up.get(&node).copied().map(GroupId)
    }

    pub fn children(&self, group: GroupId) -> Option<&BTreeSet<usize>> {
        self.down.get(&group.0)
    }

    /// Topmost ancestor of `node`, or `node` itself when it has no parent.
    pub fn root_of(&self, node: usize) -> usize {
        let mut current = node;
        let mut hops = 0;
        while let Some(parent) = self.up.get(&current) {
            current = *parent;
            hops += 1;
            if hops > self.up.len() {
                error!(node, "cycle in group hierarchy");
                break;
            }
        }
        current
    }

    /// Root group of `item`, `None` when the item is not grouped.
    pub fn root_group(&self, item: ItemId) -> Option<GroupId> {
        let root = self.root_of(item.0);
        (root != item.0).then_some(GroupId(root))
    }

    /// All items under `node`. A leaf yields itself.
    pub fn leaves_of(&self, node: usize) -> BTreeSet<ItemId> {
        let mut leaves = BTreeSet::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            match self.down.get(&current) {
                Some(children) => stack.extend(children.iter().copied()),
                None => {
                    leaves.insert(ItemId(current));
                }
            }
        }
        leaves
    }

    /// Every item moving together with `item`, the item included.
    pub fn group_mates(&self, item: ItemId) -> BTreeSet<ItemId> {
        self.leaves_of(self.root_of(item.0))
    }

    pub fn groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.down.keys().copied().map(GroupId)
    }

    pub fn len(&self) -> usize {
        self.down.len()
    }

    pub fn is_empty(&self) -> bool {
        self.down.is_empty()
    }

    /// Member targets for moving `primary`'s whole group by the given deltas.
    /// `locate` returns an item's track ordinal and position; `None` when any
    /// member cannot be located.
    pub fn propose_move(
        &self,
        primary: ItemId,
        delta_position: i64,
        delta_track: i64,
        locate: impl Fn(ItemId) -> Option<(usize, i64)>,
    ) -> Option<Vec<ProposedMove>> {
        self.group_mates(primary)
            .into_iter()
            .map(|id| {
                let (track_index, position) = locate(id)?;
                Some(ProposedMove {
                    id,
                    track_index: track_index as i64 + delta_track,
                    position: position + delta_position,
                })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Structural changes (driven by timeline undo/redo steps)
    // -----------------------------------------------------------------------

    /// Make `group` the parent of `children`, which must be current roots.
    pub(crate) fn create(&mut self, group: GroupId, children: &BTreeSet<usize>) -> bool {
        if children.len() < 2
            || self.down.contains_key(&group.0)
            || self.up.contains_key(&group.0)
            || children.iter().any(|c| self.up.contains_key(c) || *c == group.0)
        {
            return false;
        }
        for child in children {
            self.up.insert(*child, group.0);
        }
        self.down.insert(group.0, children.clone());
        true
    }

    /// Remove a root group; its children become roots.
    pub(crate) fn destroy(&mut self, group: GroupId) -> Option<BTreeSet<usize>> {
        if self.up.contains_key(&group.0) {
            return None;
        }
        let children = self.down.remove(&group.0)?;
        for child in &children {
            self.up.remove(child);
        }
        Some(children)
    }

    /// Take `item` out of its group. A parent left with a single child is
    /// dissolved and that child takes its place in the hierarchy.
    pub(crate) fn detach(&mut self, item: ItemId) {
        let Some(parent) = self.up.remove(&item.0) else {
            return;
        };
        let Some(siblings) = self.down.get_mut(&parent) else {
            return;
        };
        siblings.remove(&item.0);
        if siblings.len() >= 2 {
            return;
        }
        let remaining: Vec<usize> = siblings.iter().copied().collect();
        self.down.remove(&parent);
        let grandparent = self.up.remove(&parent);
        for child in remaining {
            self.up.remove(&child);
            if let Some(gp) = grandparent {
                self.up.insert(child, gp);
                if let Some(set) = self.down.get_mut(&gp) {
                    set.insert(child);
                }
            }
        }
        if let Some(gp) = grandparent {
            if let Some(set) = self.down.get_mut(&gp) {
                set.remove(&parent);
            }
        }
    }

    /// Structural check: maps agree, groups have two or more children, leaves
    /// are live items and the hierarchy is acyclic.
    pub fn check(&self, item_exists: impl Fn(ItemId) -> bool) -> bool {
        for (child, parent) in &self.up {
            if !self.down.get(parent).is_some_and(|c| c.contains(child)) {
                error!(child, parent, "group parent does not list child");
                return false;
            }
        }
        for (group, children) in &self.down {
            if children.len() < 2 {
                error!(group, "group has fewer than two children");
                return false;
            }
            for child in children {
                if self.up.get(child) != Some(group) {
                    error!(group, child, "group child points elsewhere");
                    return false;
                }
                if !self.down.contains_key(child) && !item_exists(ItemId(*child)) {
                    error!(group, child, "group references a missing item");
                    return false;
                }
            }
        }
        for node in self.up.keys() {
            let mut current = *node;
            let mut hops = 0;
            while let Some(parent) = self.up.get(&current) {
                current = *parent;
                hops += 1;
                if hops > self.up.len() {
                    error!(node, "cycle in group hierarchy");
                    return false;
                }
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
