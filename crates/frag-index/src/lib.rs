//! frag-index: deduplicating fragment index and corpus statistics
//!
//! - `index`: sharded hash → (length, count) map, safe for many writers
//! - `summary`: the six corpus totals and their text report
//! - `reader`: parallel parser for `<hex> <length>` record streams
//! - `scan`: fused split + hash + count in a single pass

pub mod index;
pub mod reader;
pub mod scan;
pub mod summary;

pub use index::{FragmentIndex, FragmentRecord};
pub use reader::read_records;
pub use scan::{scan_source, CountingSink};
pub use summary::Summary;
