use crate::error::{PreviewError, Result};
use std::collections::BTreeSet;

/// Start frame of the chunk containing `frame`.
pub fn chunk_key(frame: i64, chunk_size: i64) -> i64 {
    frame - frame % chunk_size
}

/// Keys of the chunks covering frames `[start, end)`.
pub fn chunks_in(start: i64, end: i64, chunk_size: i64) -> impl Iterator<Item = i64> {
    let first = chunk_key(start.max(0), chunk_size);
    let last = if end > start {
        chunk_key(end - 1, chunk_size)
    } else {
        first - chunk_size
    };
    (first..=last).step_by(chunk_size.max(1) as usize)
}

/// Collapse sorted chunk keys into range tokens: consecutive chunks become
/// `"first-last"`, isolated ones stay a single number.
pub fn compressed_chunks(chunks: impl IntoIterator<Item = i64>, chunk_size: i64) -> Vec<String> {
    fn token((first, last): (i64, i64)) -> String {
        if first == last {
            first.to_string()
        } else {
            format!("{first}-{last}")
        }
    }

    let mut tokens = Vec::new();
    let mut run: Option<(i64, i64)> = None;
    for chunk in chunks {
        run = match run {
            Some((first, last)) if chunk - last == chunk_size => Some((first, chunk)),
            Some(done) => {
                tokens.push(token(done));
                Some((chunk, chunk))
            }
            None => Some((chunk, chunk)),
        };
    }
    if let Some(done) = run {
        tokens.push(token(done));
    }
    tokens
}

/// Inverse of [`compressed_chunks`].
pub fn parse_compressed_chunks<S: AsRef<str>>(tokens: &[S], chunk_size: i64) -> Result<BTreeSet<i64>> {
    let mut chunks = BTreeSet::new();
    for raw in tokens {
        let token = raw.as_ref().trim();
        let invalid = || PreviewError::InvalidChunkList(token.to_string());
        let (first, last) = match token.split_once('-') {
            Some((a, b)) => (a.parse::<i64>().map_err(|_| invalid())?, b.parse::<i64>().map_err(|_| invalid())?),
            None => {
                let frame = token.parse::<i64>().map_err(|_| invalid())?;
                (frame, frame)
            }
        };
        if first < 0 || last < first {
            return Err(invalid());
        }
        chunks.extend((first..=last).step_by(chunk_size.max(1) as usize));
    }
    Ok(chunks)
}

/// Which chunks have a valid rendered file and which still need one.
/// A chunk is never in both sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSets {
    rendered: BTreeSet<i64>,
    dirty: BTreeSet<i64>,
}

impl ChunkSets {
    pub fn rendered(&self) -> &BTreeSet<i64> {
        &self.rendered
    }

    pub fn dirty(&self) -> &BTreeSet<i64> {
        &self.dirty
    }

    pub fn is_rendered(&self, chunk: i64) -> bool {
        self.rendered.contains(&chunk)
    }

    pub fn is_dirty(&self, chunk: i64) -> bool {
        self.dirty.contains(&chunk)
    }

    /// Whether any preview zone is defined.
    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty() && self.dirty.is_empty()
    }

    /// Queue a chunk unless it is already known. Returns true when added.
    pub fn add(&mut self, chunk: i64) -> bool {
        !self.rendered.contains(&chunk) && self.dirty.insert(chunk)
    }

    /// Mark a chunk dirty whatever its current state.
    pub fn make_dirty(&mut self, chunk: i64) -> bool {
        self.rendered.remove(&chunk);
        self.dirty.insert(chunk)
    }

    pub fn make_rendered(&mut self, chunk: i64) {
        self.dirty.remove(&chunk);
        self.rendered.insert(chunk);
    }

    /// Forget a chunk. Returns true when it had been rendered.
    pub fn remove(&mut self, chunk: i64) -> bool {
        self.dirty.remove(&chunk);
        self.rendered.remove(&chunk)
    }

    /// Move every rendered chunk back to dirty, returning them.
    pub fn evict_all(&mut self) -> Vec<i64> {
        let evicted: Vec<i64> = std::mem::take(&mut self.rendered).into_iter().collect();
        self.dirty.extend(evicted.iter().copied());
        evicted
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    pub fn clear(&mut self) {
        self.rendered.clear();
        self.dirty.clear();
    }
}
