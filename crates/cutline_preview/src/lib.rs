pub mod archive;
pub mod chunks;
pub mod error;
pub mod manager;
pub mod scene;
pub mod settings;
pub mod timer;
pub mod tractor;

pub use error::{PreviewError, PreviewNotice, Result};
pub use manager::{PreviewManager, PreviewParams, PreviewState};
pub use settings::PreviewSettings;
pub use tractor::{Playlist, Tractor};
