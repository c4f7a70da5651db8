//! Consumers of the ordered boundary stream
//!
//! - `BoundaryCollector`: keeps every batch in memory
//! - `PointWriter`: prints `prev s1 .. -- sn` per batch
//! - `RecordWriter`: hashes each fragment and writes `<hex> <len>` records
//! - `DirectoryWriter`: stores each fragment as `<dir>/<start:016x>`
//!
//! Sinks run under the ring's emit baton, so their locks are uncontended;
//! they exist to satisfy `Sync`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use frag_core::{fragment_file_name, FragError, FragResult};
use tracing::debug;

use crate::hasher::hash_ranges;
use crate::record::format_record;
use crate::source::Source;
use crate::splitter::SplitSink;

/// Progress callback type (bytes_done, bytes_total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── BoundaryCollector ────────────────────────────────────────────────────────

/// Records every batch as delivered.
#[derive(Debug, Default)]
pub struct BoundaryCollector {
    batches: Mutex<Vec<Vec<u64>>>,
}

impl BoundaryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<u64>> {
        lock(&self.batches).clone()
    }

    /// The flattened boundary sequence, starting at 0.
    pub fn boundaries(&self) -> Vec<u64> {
        let mut out = vec![0];
        for batch in lock(&self.batches).iter() {
            out.extend_from_slice(&batch[1..]);
        }
        out
    }

    /// Fragments as `(start, end)` pairs.
    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.boundaries().windows(2).map(|w| (w[0], w[1])).collect()
    }
}

impl SplitSink for BoundaryCollector {
    fn fragments(&self, _source: &dyn Source, boundaries: &[u64]) -> FragResult<()> {
        lock(&self.batches).push(boundaries.to_vec());
        Ok(())
    }
}

// ── PointWriter ──────────────────────────────────────────────────────────────

/// Writes one line per batch: the starts of its fragments, then `--` and the
/// end of the last one.
pub struct PointWriter<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> PointWriter<W> {
    pub fn new(out: W) -> Self {
        PointWriter {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> SplitSink for PointWriter<W> {
    fn fragments(&self, _source: &dyn Source, boundaries: &[u64]) -> FragResult<()> {
        let (last, starts) = match boundaries.split_last() {
            Some(split) => split,
            None => return Ok(()),
        };
        let mut line = String::new();
        for start in starts {
            line.push_str(&start.to_string());
            line.push(' ');
        }
        line.push_str(&format!("-- {last}\n"));
        lock(&self.out).write_all(line.as_bytes())?;
        Ok(())
    }
}

// ── RecordWriter ─────────────────────────────────────────────────────────────

/// Hashes every fragment and writes its record, in fragment order.
pub struct RecordWriter<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> RecordWriter<W> {
    pub fn new(out: W) -> Self {
        RecordWriter {
            out: Mutex::new(out),
        }
    }

    pub fn flush(&self) -> FragResult<()> {
        lock(&self.out).flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> SplitSink for RecordWriter<W> {
    fn fragments(&self, source: &dyn Source, boundaries: &[u64]) -> FragResult<()> {
        let records = hash_ranges(source, boundaries)?;
        let mut text = String::with_capacity(records.len() * 150);
        for (hash, length) in &records {
            text.push_str(&format_record(hash, *length));
        }
        lock(&self.out).write_all(text.as_bytes())?;
        Ok(())
    }
}

// ── DirectoryWriter ──────────────────────────────────────────────────────────

/// Largest single read while copying a fragment to disk.
pub const COPY_CHUNK: usize = 1 << 20;

/// Stores each fragment in its own file, named by its start offset.
///
/// Fragments are copied in pieces of at most `chunk` bytes, so memory use
/// does not grow with fragment length.
pub struct DirectoryWriter {
    dir: PathBuf,
    total: u64,
    chunk: usize,
    progress: Option<ProgressFn>,
}

impl DirectoryWriter {
    /// `dir` must exist. `total` is only used for progress reporting.
    pub fn new(dir: &Path, total: u64) -> Self {
        DirectoryWriter {
            dir: dir.to_path_buf(),
            total,
            chunk: COPY_CHUNK,
            progress: None,
        }
    }

    /// Override the copy piece size (clamped to at least one byte).
    pub fn with_chunk_size(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn path_for(&self, start: u64) -> PathBuf {
        self.dir.join(fragment_file_name(start))
    }

    fn copy_fragment(
        &self,
        source: &dyn Source,
        start: u64,
        end: u64,
        path: &Path,
    ) -> FragResult<()> {
        let piece = (end - start).min(self.chunk as u64) as usize;
        let mut buf = Vec::new();
        buf.try_reserve_exact(piece)
            .map_err(|_| FragError::alloc("fragment copy buffer", piece))?;
        buf.resize(piece, 0);

        let mut out = BufWriter::new(File::create(path)?);
        let mut pos = start;
        while pos < end {
            let n = (end - pos).min(piece as u64) as usize;
            source.read_exact_at(&mut buf[..n], pos)?;
            out.write_all(&buf[..n])?;
            pos += n as u64;
        }
        out.flush()?;
        Ok(())
    }
}

impl SplitSink for DirectoryWriter {
    fn fragments(&self, source: &dyn Source, boundaries: &[u64]) -> FragResult<()> {
        for w in boundaries.windows(2) {
            let (start, end) = (w[0], w[1]);
            let path = self.path_for(start);
            self.copy_fragment(source, start, end, &path)?;
            debug!(path = %path.display(), bytes = end - start, "fragment written");

            if let Some(progress) = &self.progress {
                progress(end, self.total, &fragment_file_name(start));
            }
        }
        Ok(())
    }
}
