use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] cutline_core::CoreError),

    #[error(transparent)]
    Render(#[from] cutline_render::RenderError),

    #[error("Wrong document ID, cannot create temporary folder: {0:?}")]
    InvalidDocumentId(String),

    #[error("Something is wrong with cache folder {}", .0.display())]
    InvalidCacheDir(PathBuf),

    #[error("Invalid timeline preview parameters")]
    InvalidParameters,

    #[error("Invalid chunk list token: {0:?}")]
    InvalidChunkList(String),

    #[error("Scene description failed: {0}")]
    Scene(String),

    #[error("Preview manager is not initialized")]
    NotInitialized,
}

pub type Result<T> = std::result::Result<T, PreviewError>;

/// Messages for whoever displays preview state to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewNotice {
    /// A non-fatal error; the manager keeps running, possibly inert.
    Error(String),
    /// Render progress of the current batch in thousandths, `-1` when the
    /// render failed.
    Progress(i32),
    /// A render failed; carries the renderer's diagnostic output.
    RenderFailed(String),
    WorkingChunkChanged(Option<i64>),
    DirtyChunksChanged,
    RenderedChunksChanged,
}
