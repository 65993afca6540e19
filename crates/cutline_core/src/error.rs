use crate::types::{GroupId, ItemId, TrackId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("Track not found: {0}")]
    TrackNotFound(TrackId),

    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("Track is locked: {0}")]
    TrackLocked(TrackId),

    #[error("Overlap detected on track {track} at frame {position}")]
    OverlapDetected { track: TrackId, position: i64 },

    #[error("Invalid position: {0}")]
    InvalidPosition(i64),

    #[error("Invalid duration: {0}")]
    InvalidDuration(i64),

    #[error("Item is not on a track: {0}")]
    Unassigned(ItemId),

    #[error("Item is not grouped: {0}")]
    NotGrouped(ItemId),

    #[error("No blank at frame {0}")]
    NoBlank(i64),

    #[error("Wrong document ID: {0:?}")]
    InvalidDocumentId(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Undo step failed: {0}")]
    UndoFailed(String),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,
}

pub type Result<T> = std::result::Result<T, CoreError>;
