//! Fused split, hash and count

use frag_chunks::{hash_ranges, split, Source, SplitParams, SplitReport, SplitSink};
use frag_core::{FragResult, Ring};
use tracing::info;

use crate::index::FragmentIndex;

/// Hashes each fragment of a batch and counts it in the index.
pub struct CountingSink<'a> {
    index: &'a FragmentIndex,
}

impl<'a> CountingSink<'a> {
    pub fn new(index: &'a FragmentIndex) -> Self {
        CountingSink { index }
    }
}

impl SplitSink for CountingSink<'_> {
    fn fragments(&self, source: &dyn Source, boundaries: &[u64]) -> FragResult<()> {
        for (hash, length) in hash_ranges(source, boundaries)? {
            self.index.record(&hash, length)?;
        }
        Ok(())
    }
}

/// Split `source` and count every fragment into `index` without an
/// intermediate record stream.
pub fn scan_source(
    source: &dyn Source,
    params: &SplitParams,
    ring: &Ring,
    index: &FragmentIndex,
) -> FragResult<SplitReport> {
    let report = split(source, params, ring, &CountingSink::new(index))?;
    info!(
        bytes = report.file_size,
        fragments = report.fragments,
        "source scanned"
    );
    Ok(report)
}
