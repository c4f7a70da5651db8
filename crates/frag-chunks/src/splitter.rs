//! Parallel, order-preserving split-point detection
//!
//! The source is cut into fixed blocks. Ring workers claim blocks in order,
//! scan them concurrently and hand their split points to the sink in block
//! order:
//!
//! ```text
//!   claim  (claim baton):  reserve [off, off + block), advance file_offset
//!   process (unordered):   read [off, off + block + window - 1), scan windows
//!   emit   (emit baton):   sink([prev_splitpoint, s1, .., sn]), prev = sn
//! ```
//!
//! Each block is read with `window - 1` trailing bytes so that windows
//! starting near its end are tested exactly once. After the ring drains a
//! final `[prev_splitpoint, file_size]` batch is issued, so every byte of a
//! non-empty source lands in exactly one fragment even if no window ever
//! matched.

use std::sync::atomic::{AtomicU64, Ordering};

use frag_core::config::ChunkerConfig;
use frag_core::{FragError, FragResult, Ring, RingJob};
use tracing::{debug, info};

use crate::checksum;
use crate::source::Source;

/// Chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitParams {
    /// Checksum window in bytes
    pub window: usize,
    /// Split where the window checksum is <= threshold
    pub threshold: u32,
    /// Bytes claimed per ring turn
    pub block_size: usize,
}

impl SplitParams {
    pub fn from_config(config: &ChunkerConfig) -> Self {
        SplitParams {
            window: config.window,
            threshold: config.threshold,
            block_size: config.block_size,
        }
    }

    pub fn validate(&self) -> FragResult<()> {
        if self.window == 0 {
            return Err(FragError::Config("window must be at least 1".into()));
        }
        if self.block_size < self.window {
            return Err(FragError::Config(format!(
                "block size ({}) must not be smaller than window ({})",
                self.block_size, self.window
            )));
        }
        Ok(())
    }
}

impl Default for SplitParams {
    fn default() -> Self {
        Self::from_config(&ChunkerConfig::default())
    }
}

/// Consumer of the ordered boundary stream.
pub trait SplitSink: Sync {
    /// `boundaries` holds at least two strictly increasing offsets and each
    /// adjacent pair is one fragment. `boundaries[0]` is the last offset of
    /// the previous call (0 on the first call). Calls never overlap and
    /// arrive in file order.
    fn fragments(&self, source: &dyn Source, boundaries: &[u64]) -> FragResult<()>;
}

/// Outcome of one split job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitReport {
    pub file_size: u64,
    pub blocks: u64,
    pub fragments: u64,
}

struct Block {
    start: u64,
    end: u64,
}

struct SplitJob<'a, S: ?Sized> {
    source: &'a dyn Source,
    sink: &'a S,
    params: SplitParams,
    file_size: u64,
    // Both cursors are only touched by the holder of the matching baton.
    file_offset: AtomicU64,
    prev_splitpoint: AtomicU64,
    blocks: AtomicU64,
    fragments: AtomicU64,
}

impl<S: SplitSink + ?Sized> RingJob for SplitJob<'_, S> {
    type Unit = Block;
    type Output = Vec<u64>;

    fn claim(&self) -> FragResult<Option<Block>> {
        let start = self.file_offset.load(Ordering::Relaxed);
        if start == self.file_size {
            return Ok(None);
        }
        let end = start
            .saturating_add(self.params.block_size as u64)
            .min(self.file_size);
        self.file_offset.store(end, Ordering::Relaxed);
        self.blocks.fetch_add(1, Ordering::Relaxed);
        Ok(Some(Block { start, end }))
    }

    fn process(&self, block: Block) -> FragResult<Vec<u64>> {
        let window = self.params.window as u64;
        let read_end = block
            .end
            .saturating_add(window - 1)
            .min(self.file_size);
        let len = usize::try_from(read_end - block.start)
            .map_err(|_| FragError::alloc("scan buffer", usize::MAX))?;

        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| FragError::alloc("scan buffer", len))?;
        buf.resize(len, 0);
        self.source.read_exact_at(&mut buf, block.start)?;

        // At most block_size positions, so this fits in usize.
        let positions = (block.end - block.start) as usize;
        let splits: Vec<u64> =
            checksum::scan(&buf, positions, self.params.window, self.params.threshold)
                .into_iter()
                .map(|i| block.start + i as u64)
                // Offset 0 would open an empty fragment.
                .filter(|&offset| offset != 0)
                .collect();

        debug!(
            start = block.start,
            end = block.end,
            splits = splits.len(),
            "block scanned"
        );
        Ok(splits)
    }

    fn emit(&self, splits: Vec<u64>) -> FragResult<()> {
        let Some(&last) = splits.last() else {
            return Ok(());
        };
        let mut boundaries = Vec::with_capacity(splits.len() + 1);
        boundaries.push(self.prev_splitpoint.load(Ordering::Relaxed));
        boundaries.extend_from_slice(&splits);

        self.sink.fragments(self.source, &boundaries)?;

        self.prev_splitpoint.store(last, Ordering::Relaxed);
        self.fragments
            .fetch_add(splits.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Split `source` into content-defined fragments, delivering boundaries to
/// `sink` in order. Any read or sink failure aborts the whole job.
pub fn split<S: SplitSink + ?Sized>(
    source: &dyn Source,
    params: &SplitParams,
    ring: &Ring,
    sink: &S,
) -> FragResult<SplitReport> {
    params.validate()?;
    let file_size = source.size()?;

    info!(
        file_size,
        window = params.window,
        threshold = params.threshold,
        block_size = params.block_size,
        workers = ring.workers(),
        "splitting"
    );

    let job = SplitJob {
        source,
        sink,
        params: *params,
        file_size,
        file_offset: AtomicU64::new(0),
        prev_splitpoint: AtomicU64::new(0),
        blocks: AtomicU64::new(0),
        fragments: AtomicU64::new(0),
    };
    ring.run(&job)?;

    let prev = job.prev_splitpoint.load(Ordering::Relaxed);
    let mut fragments = job.fragments.load(Ordering::Relaxed);
    if file_size > prev {
        sink.fragments(source, &[prev, file_size])?;
        fragments += 1;
    }

    let report = SplitReport {
        file_size,
        blocks: job.blocks.load(Ordering::Relaxed),
        fragments,
    };
    info!(
        file_size,
        blocks = report.blocks,
        fragments = report.fragments,
        "split done"
    );
    Ok(report)
}
