use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const UNDO_DIR_NAME: &str = "undo";

/// Rendered chunk files kept per undo index: `undo/<index>/<chunk>.<ext>`
/// holds the chunks that were valid at that index.
#[derive(Debug, Clone)]
pub struct UndoArchive {
    dir: PathBuf,
    depth: usize,
}

impl UndoArchive {
    /// Open (and create) the archive in `cache_dir/undo`.
    pub fn open(cache_dir: &Path, depth: usize) -> Result<Self> {
        let dir = cache_dir.join(UNDO_DIR_NAME);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, depth })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn folder(&self, index: usize) -> PathBuf {
        self.dir.join(index.to_string())
    }

    pub fn exists(&self, index: usize) -> bool {
        self.folder(index).is_dir()
    }

    /// Numeric archive folders, oldest first.
    pub fn indexes(&self) -> Vec<usize> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut indexes: Vec<usize> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<usize>().ok())
            .collect();
        indexes.sort_unstable();
        indexes
    }

    /// Move the files of `chunks` out of `cache_dir` into folder `index`.
    /// Returns true when at least one file was archived; an empty folder is
    /// not left behind.
    pub fn archive(&self, index: usize, cache_dir: &Path, chunks: &[i64], extension: &str) -> Result<bool> {
        let folder = self.folder(index);
        std::fs::create_dir_all(&folder)?;
        let mut found = false;
        for chunk in chunks {
            let name = chunk_file_name(*chunk, extension);
            if std::fs::rename(cache_dir.join(&name), folder.join(&name)).is_ok() {
                found = true;
            }
        }
        if !found {
            std::fs::remove_dir(&folder)?;
        } else {
            debug!(index, "archived preview chunks");
        }
        Ok(found)
    }

    /// Copy the archived files of `chunks` in folder `index` back to
    /// `cache_dir`. Returns the chunks restored.
    pub fn restore(&self, index: usize, cache_dir: &Path, chunks: &[i64], extension: &str) -> Vec<i64> {
        let folder = self.folder(index);
        if !folder.is_dir() {
            return Vec::new();
        }
        chunks
            .iter()
            .copied()
            .filter(|chunk| {
                let name = chunk_file_name(*chunk, extension);
                let source = folder.join(&name);
                source.is_file() && std::fs::copy(&source, cache_dir.join(&name)).is_ok()
            })
            .collect()
    }

    /// Keep only the most recent folders.
    pub fn cleanup_old(&self) {
        let indexes = self.indexes();
        let excess = indexes.len().saturating_sub(self.depth);
        for index in &indexes[..excess] {
            self.remove_folder(*index);
        }
    }

    /// Drop folders from `index` onwards, once those undo entries are gone.
    pub fn remove_from(&self, index: usize) {
        for i in self.indexes().into_iter().filter(|i| *i >= index) {
            self.remove_folder(i);
        }
    }

    /// Delete the whole archive.
    pub fn remove_all(&self) -> Result<()> {
        if self.dir.file_name().and_then(|n| n.to_str()) == Some(UNDO_DIR_NAME) && self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }

    fn remove_folder(&self, index: usize) {
        if let Err(e) = std::fs::remove_dir_all(self.folder(index)) {
            warn!(index, error = %e, "could not remove undo archive folder");
        }
    }
}

pub fn chunk_file_name(chunk: i64, extension: &str) -> String {
    format!("{chunk}.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, UndoArchive) {
        let dir = TempDir::new().unwrap();
        let archive = UndoArchive::open(dir.path(), 5).unwrap();
        (dir, archive)
    }

    fn touch(dir: &Path, chunk: i64) {
        std::fs::write(dir.join(chunk_file_name(chunk, "mp4")), format!("chunk {chunk}")).unwrap();
    }

    #[test]
    fn archive_moves_files() {
        let (dir, archive) = setup();
        touch(dir.path(), 0);
        touch(dir.path(), 25);

        assert!(archive.archive(3, dir.path(), &[0, 25, 50], "mp4").unwrap());
        assert!(!dir.path().join("0.mp4").exists());
        assert!(archive.folder(3).join("0.mp4").is_file());
        assert!(archive.folder(3).join("25.mp4").is_file());
    }

    #[test]
    fn archive_without_files_leaves_no_folder() {
        let (dir, archive) = setup();
        assert!(!archive.archive(1, dir.path(), &[0], "mp4").unwrap());
        assert!(!archive.exists(1));
    }

    #[test]
    fn restore_copies_back() {
        let (dir, archive) = setup();
        touch(dir.path(), 50);
        archive.archive(0, dir.path(), &[50], "mp4").unwrap();

        assert_eq!(archive.restore(0, dir.path(), &[25, 50], "mp4"), vec![50]);
        assert_eq!(std::fs::read_to_string(dir.path().join("50.mp4")).unwrap(), "chunk 50");
        assert!(archive.folder(0).join("50.mp4").is_file());
        assert!(archive.restore(7, dir.path(), &[50], "mp4").is_empty());
    }

    #[test]
    fn cleanup_keeps_most_recent_numerically() {
        let (_dir, archive) = setup();
        for i in [1, 2, 3, 9, 10, 11, 12] {
            std::fs::create_dir_all(archive.folder(i)).unwrap();
        }
        std::fs::create_dir_all(archive.dir().join("notes")).unwrap();
        archive.cleanup_old();
        assert_eq!(archive.indexes(), vec![3, 9, 10, 11, 12]);
        assert!(archive.dir().join("notes").is_dir());
    }

    #[test]
    fn remove_from_drops_later_folders() {
        let (dir, archive) = setup();
        for i in 0..4 {
            std::fs::create_dir_all(archive.folder(i)).unwrap();
        }
        archive.remove_from(2);
        assert_eq!(archive.indexes(), vec![0, 1]);

        archive.remove_all().unwrap();
        assert!(!dir.path().join(UNDO_DIR_NAME).exists());
    }
}
