//! frag-chunks: content-defined split points and fragment hashing
//!
//! # Overview
//! - `source`: positional byte sources (files, in-memory slices)
//! - `checksum`: window checksum and the split predicate
//! - `splitter`: parallel, order-preserving split-point detection
//! - `hasher`: SHA-512 fragment identity
//! - `record`: the `<hex> <length>\n` fragment record format
//! - `sinks`: consumers of the boundary stream (printing, hashing, files)

pub mod checksum;
pub mod hasher;
pub mod record;
pub mod sinks;
pub mod source;
pub mod splitter;

// Convenience re-exports for the most common operations
pub use hasher::{hash_bytes, hash_range, hash_ranges, read_fragment};
pub use record::{format_record, parse_record};
pub use sinks::{BoundaryCollector, DirectoryWriter, PointWriter, ProgressFn, RecordWriter};
pub use source::Source;
pub use splitter::{split, SplitParams, SplitReport, SplitSink};
