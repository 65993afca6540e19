pub mod cache_task;
pub mod error;
pub mod probe;
pub mod render;
pub mod tasks;
pub mod thumbnail_cache;
pub mod thumbnails;

pub use error::{RenderError, Result};
