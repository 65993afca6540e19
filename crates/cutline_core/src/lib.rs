pub mod document;
pub mod editing;
pub mod error;
pub mod functions;
pub mod groups;
pub mod history;
pub mod timeline;
pub mod track;
pub mod types;

pub use error::{CoreError, Result};
pub use timeline::{Timeline, TimelineSnapshot};
