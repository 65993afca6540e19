use crate::error::{RenderError, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

const HASH_WINDOW: u64 = 1024 * 1024;

/// Identify a media file by its size and the bytes at both ends, so that
/// renames keep their thumbnails and large files hash quickly.
pub fn content_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RenderError::FileNotFound(path.to_path_buf())
        } else {
            RenderError::Io(e)
        }
    })?;
    let len = file.metadata()?.len();
    let mut hasher = Sha256::new();
    hasher.update(len.to_le_bytes());

    let mut buf = Vec::new();
    (&mut file).take(HASH_WINDOW).read_to_end(&mut buf)?;
    hasher.update(&buf);
    if len > 2 * HASH_WINDOW {
        buf.clear();
        file.seek(SeekFrom::End(-(HASH_WINDOW as i64)))?;
        file.read_to_end(&mut buf)?;
        hasher.update(&buf);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// On-disk thumbnail store: `<root>/<content hash>/<frame>.jpg`.
#[derive(Debug, Clone)]
pub struct ThumbnailCache {
    root: PathBuf,
}

impl ThumbnailCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_for(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    pub fn path_for(&self, hash: &str, frame: i64) -> PathBuf {
        self.dir_for(hash).join(format!("{frame}.jpg"))
    }

    pub fn contains(&self, hash: &str, frame: i64) -> bool {
        self.path_for(hash, frame).is_file()
    }

    /// Frames with a stored thumbnail for `hash`.
    pub fn cached_frames(&self, hash: &str) -> BTreeSet<i64> {
        let Ok(entries) = std::fs::read_dir(self.dir_for(hash)) else {
            return BTreeSet::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("jpg"))
            .filter_map(|path| path.file_stem()?.to_str()?.parse::<i64>().ok())
            .collect()
    }

    /// Drop every thumbnail of `hash`.
    pub fn remove(&self, hash: &str) -> Result<()> {
        let dir = self.dir_for(hash);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            debug!(hash, "thumbnails removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn hash_depends_on_content() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let c = dir.path().join("c.bin");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        std::fs::write(&c, b"other bytes").unwrap();
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
        assert_ne!(content_hash(&a).unwrap(), content_hash(&c).unwrap());
        assert_eq!(content_hash(&a).unwrap().len(), 64);
    }

    #[test]
    fn hash_of_large_file_reads_both_ends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let mut data = vec![0u8; 3 * HASH_WINDOW as usize];
        std::fs::write(&path, &data).unwrap();
        let before = content_hash(&path).unwrap();
        if let Some(last) = data.last_mut() {
            *last = 1;
        }
        std::fs::write(&path, &data).unwrap();
        assert_ne!(content_hash(&path).unwrap(), before);
    }

    #[test]
    fn missing_file_is_reported() {
        assert!(matches!(
            content_hash(Path::new("/nonexistent/media.mp4")),
            Err(RenderError::FileNotFound(_))
        ));
    }

    #[test]
    fn cache_layout_and_listing() {
        let dir = TempDir::new().unwrap();
        let cache = ThumbnailCache::new(dir.path().join("thumbs")).unwrap();
        assert!(cache.cached_frames("abc").is_empty());

        std::fs::create_dir_all(cache.dir_for("abc")).unwrap();
        std::fs::write(cache.path_for("abc", 0), b"jpg").unwrap();
        std::fs::write(cache.path_for("abc", 25), b"jpg").unwrap();
        std::fs::write(cache.dir_for("abc").join("notes.txt"), b"x").unwrap();

        assert!(cache.contains("abc", 25));
        assert!(!cache.contains("abc", 50));
        assert_eq!(cache.cached_frames("abc"), BTreeSet::from([0, 25]));

        cache.remove("abc").unwrap();
        assert!(cache.cached_frames("abc").is_empty());
    }
}
