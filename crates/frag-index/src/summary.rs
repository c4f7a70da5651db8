use serde::Serialize;
use std::fmt;

use crate::index::FragmentRecord;

/// Corpus-wide totals over every recorded fragment.
///
/// "Total" counts each occurrence, "unique" counts each distinct hash once.
/// Page totals round every fragment up to a whole number of pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub fragments: u64,
    pub unique_fragments: u64,
    pub bytes: u64,
    pub unique_bytes: u64,
    pub page_bytes: u64,
    pub unique_page_bytes: u64,
}

impl Summary {
    /// Fold one record in. Panics if `page_size` is zero; callers go
    /// through `FragmentIndex::summarize`, which rejects it.
    pub fn add(&mut self, record: &FragmentRecord, page_size: u64) {
        let paged = record.length.div_ceil(page_size) * page_size;

        self.fragments += record.count;
        self.unique_fragments += 1;

        self.bytes += record.count * record.length;
        self.unique_bytes += record.length;

        self.page_bytes += record.count * paged;
        self.unique_page_bytes += paged;
    }

    pub fn merge(&mut self, other: &Summary) {
        self.fragments += other.fragments;
        self.unique_fragments += other.unique_fragments;
        self.bytes += other.bytes;
        self.unique_bytes += other.unique_bytes;
        self.page_bytes += other.page_bytes;
        self.unique_page_bytes += other.unique_page_bytes;
    }

    /// Total bytes per unique byte; 1.0 for an empty corpus.
    pub fn dedup_ratio(&self) -> f64 {
        if self.unique_bytes == 0 {
            return 1.0;
        }
        self.bytes as f64 / self.unique_bytes as f64
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fragments (total)\t{:>15}", self.fragments)?;
        writeln!(f, "fragments (unique)\t{:>15}", self.unique_fragments)?;
        writeln!(f, "bytes (total)\t\t{:>15}", self.bytes)?;
        writeln!(f, "bytes (unique)\t\t{:>15}", self.unique_bytes)?;
        writeln!(f, "bytes in pages (total)\t{:>15}", self.page_bytes)?;
        writeln!(f, "bytes in pages (unique)\t{:>15}", self.unique_page_bytes)
    }
}
