use crate::timeline::Timeline;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// One reversible step. Returns `false` when the step could not be applied.
pub type Fun = Arc<dyn Fn(&mut Timeline) -> bool + Send + Sync>;

/// A step that does nothing and always succeeds.
pub fn noop() -> Fun {
    Arc::new(|_| true)
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Ordered list of `(undo, redo)` pairs forming one user-visible action.
///
/// Redo replays the pairs in insertion order, undo replays them backwards.
#[derive(Clone, Default)]
pub struct Transaction {
    steps: Vec<(Fun, Fun)>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step whose redo has already been applied.
    pub fn push(&mut self, undo: Fun, redo: Fun) {
        self.steps.push((undo, redo));
    }

    /// Apply `redo` to `timeline` and record the pair if it succeeded.
    pub fn apply(&mut self, timeline: &mut Timeline, undo: Fun, redo: Fun) -> bool {
        if !redo(timeline) {
            return false;
        }
        self.push(undo, redo);
        true
    }

    pub fn append(&mut self, mut other: Transaction) {
        self.steps.append(&mut other.steps);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn undo(&self, timeline: &mut Timeline) -> bool {
        self.steps.iter().rev().all(|(undo, _)| undo(timeline))
    }

    pub fn redo(&self, timeline: &mut Timeline) -> bool {
        self.steps.iter().all(|(_, redo)| redo(timeline))
    }

    /// Revert every applied step, newest first, discarding the transaction.
    pub fn rollback(self, timeline: &mut Timeline) {
        if !self.undo(timeline) {
            warn!(steps = self.steps.len(), "transaction rollback incomplete");
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct UndoEntry {
    pub description: String,
    pub transaction: Transaction,
}

/// Linear undo stack with a cursor.
///
/// `index()` is absolute: entries dropped from the front because of
/// `max_size` still count, so an index keeps naming the same state for the
/// lifetime of the stack.
pub struct History {
    entries: Vec<UndoEntry>,
    cursor: usize,
    dropped: usize,
    max_size: usize,
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("index", &self.index())
            .field("count", &self.count())
            .field("max_size", &self.max_size)
            .finish()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(100)
    }
}

impl History {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            dropped: 0,
            max_size: max_size.max(1),
        }
    }

    /// Push an already-applied transaction. Returns the index from which redo
    /// entries were discarded, if any were.
    pub fn push(&mut self, description: impl Into<String>, transaction: Transaction) -> Option<usize> {
        let truncated = if self.cursor < self.entries.len() {
            self.entries.truncate(self.cursor);
            Some(self.index())
        } else {
            None
        };
        self.entries.push(UndoEntry {
            description: description.into(),
            transaction,
        });
        self.cursor += 1;
        if self.entries.len() > self.max_size {
            self.entries.remove(0);
            self.cursor -= 1;
            self.dropped += 1;
        }
        truncated
    }

    /// Entry undone by the next `undo`.
    pub fn undo_entry(&self) -> Option<&UndoEntry> {
        self.cursor.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// Entry reapplied by the next `redo`.
    pub fn redo_entry(&self) -> Option<&UndoEntry> {
        self.entries.get(self.cursor)
    }

    pub(crate) fn step_back(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub(crate) fn step_forward(&mut self) {
        if self.cursor < self.entries.len() {
            self.cursor += 1;
        }
    }

    pub fn index(&self) -> usize {
        self.dropped + self.cursor
    }

    pub fn count(&self) -> usize {
        self.dropped + self.entries.len()
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.entries.len()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo_entry().map(|e| e.description.as_str())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_entry().map(|e| e.description.as_str())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
        self.dropped = 0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemDescriptor, TrackKind};

    fn make_test_timeline() -> Timeline {
        Timeline::with_tracks(25.0, &[TrackKind::Video])
    }

    fn tagged(name: &str) -> Transaction {
        let mut tx = Transaction::new();
        let label = name.to_string();
        tx.push(noop(), Arc::new(move |_| !label.is_empty()));
        tx
    }

    #[test]
    fn transaction_undo_runs_in_reverse() {
        let mut tl = make_test_timeline();
        let track = tl.tracks()[0].id;
        let mut tx = Transaction::new();
        let a = tl
            .request_insert(ItemDescriptor::clip("a", 10), track, 0, &mut tx)
            .unwrap();
        // moving `a` is only possible while it exists, so a forward-order undo would fail
        tl.request_move(a, track, 50, &mut tx).unwrap();
        assert_eq!(tx.len(), 2);

        assert!(tx.undo(&mut tl));
        assert_eq!(tl.items_count(), 0);
        assert!(tx.redo(&mut tl));
        assert_eq!(tl.item_position(a), Some(50));
        assert!(tl.check_consistency());
    }

    #[test]
    fn rollback_restores_previous_state() {
        let mut tl = make_test_timeline();
        let track = tl.tracks()[0].id;
        let before = tl.snapshot();
        let mut tx = Transaction::new();
        tl.request_insert(ItemDescriptor::clip("a", 10), track, 0, &mut tx)
            .unwrap();
        tl.request_insert(ItemDescriptor::clip("b", 10), track, 10, &mut tx)
            .unwrap();
        tx.rollback(&mut tl);
        assert_eq!(tl.snapshot(), before);
    }

    #[test]
    fn apply_only_records_successful_steps() {
        let mut tl = make_test_timeline();
        let mut tx = Transaction::new();
        assert!(!tx.apply(&mut tl, noop(), Arc::new(|_| false)));
        assert!(tx.is_empty());
        assert!(tx.apply(&mut tl, noop(), noop()));
        assert_eq!(tx.len(), 1);
    }

    #[test]
    fn push_truncates_redo_tail() {
        let mut history = History::new(100);
        history.push("one", tagged("one"));
        history.push("two", tagged("two"));
        history.push("three", tagged("three"));
        history.step_back();
        history.step_back();
        assert_eq!(history.index(), 1);
        assert!(history.can_redo());

        let truncated = history.push("four", tagged("four"));
        assert_eq!(truncated, Some(1));
        assert_eq!(history.count(), 2);
        assert!(!history.can_redo());
        assert_eq!(history.undo_description(), Some("four"));
    }

    #[test]
    fn push_at_top_does_not_truncate() {
        let mut history = History::new(100);
        assert_eq!(history.push("one", tagged("one")), None);
        assert_eq!(history.push("two", tagged("two")), None);
        assert_eq!(history.index(), 2);
    }

    #[test]
    fn max_size_keeps_absolute_index() {
        let mut history = History::new(2);
        history.push("one", tagged("one"));
        history.push("two", tagged("two"));
        history.push("three", tagged("three"));
        assert_eq!(history.index(), 3);
        assert_eq!(history.count(), 3);

        history.step_back();
        history.step_back();
        // the oldest entry is gone
        assert!(!history.can_undo());
        assert_eq!(history.index(), 1);
        assert_eq!(history.redo_description(), Some("two"));
    }

    #[test]
    fn step_bounds_are_clamped() {
        let mut history = History::new(10);
        history.step_back();
        assert_eq!(history.index(), 0);
        history.push("one", tagged("one"));
        history.step_forward();
        assert_eq!(history.index(), 1);
        history.clear();
        assert_eq!(history.count(), 0);
    }
}
