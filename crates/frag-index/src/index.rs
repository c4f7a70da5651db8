//! Sharded fragment index
//!
//! Fragments are routed to a shard by the top `shard_bits` bits of their
//! hash, so routing is a pure function of the hash and no operation ever
//! needs two shard locks. Each shard is an ordered map behind its own mutex;
//! a `record` call holds exactly one shard lock and nothing else.
//!
//! Routing uses the leading hash bits and each shard is ordered, so visiting
//! shards in index order visits every record in global hash order.

use std::collections::btree_map::{BTreeMap, Entry};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use frag_core::config::{IndexConfig, MAX_SHARD_BITS};
use frag_core::{FragError, FragResult, FragmentHash, Ring, RingJob};
use tracing::{debug, info};

use crate::summary::Summary;

/// Shards folded per ring claim during `summarize`.
const SHARDS_PER_CLAIM: usize = 256;

#[derive(Debug, Clone, Copy)]
struct Tally {
    length: u64,
    count: u64,
}

type Shard = BTreeMap<FragmentHash, Tally>;

/// One distinct fragment and how often it was seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRecord {
    pub hash: FragmentHash,
    pub length: u64,
    pub count: u64,
}

pub struct FragmentIndex {
    shards: Box<[Mutex<Shard>]>,
    shard_bits: u32,
}

impl FragmentIndex {
    /// Create an empty index with `2^shard_bits` shards.
    pub fn new(shard_bits: u32) -> FragResult<Self> {
        if shard_bits > MAX_SHARD_BITS {
            return Err(FragError::Config(format!(
                "shard_bits ({shard_bits}) exceeds the {MAX_SHARD_BITS}-bit routing prefix"
            )));
        }
        let count = 1usize << shard_bits;
        let mut shards = Vec::new();
        shards
            .try_reserve_exact(count)
            .map_err(|_| FragError::alloc("index shards", count))?;
        shards.extend((0..count).map(|_| Mutex::new(Shard::new())));
        debug!(shards = count, "fragment index created");
        Ok(FragmentIndex {
            shards: shards.into_boxed_slice(),
            shard_bits,
        })
    }

    pub fn from_config(config: &IndexConfig) -> FragResult<Self> {
        Self::new(config.shard_bits)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_of(&self, hash: &FragmentHash) -> usize {
        (hash.prefix24() >> (MAX_SHARD_BITS - self.shard_bits)) as usize
    }

    fn lock(&self, shard: usize) -> MutexGuard<'_, Shard> {
        self.shards[shard]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one occurrence of `hash`.
    ///
    /// The first occurrence inserts the fragment with count 1; later ones
    /// must agree on `length`. A disagreement means a hash collision or
    /// corrupted input and is returned as [`FragError::LengthMismatch`].
    pub fn record(&self, hash: &FragmentHash, length: u64) -> FragResult<()> {
        let mut shard = self.lock(self.shard_of(hash));
        match shard.entry(*hash) {
            Entry::Vacant(slot) => {
                slot.insert(Tally { length, count: 1 });
            }
            Entry::Occupied(mut slot) => {
                let tally = slot.get_mut();
                if tally.length != length {
                    return Err(FragError::LengthMismatch {
                        hash: hash.to_hex(),
                        stored: tally.length,
                        observed: length,
                    });
                }
                tally.count += 1;
            }
        }
        Ok(())
    }

    pub fn get(&self, hash: &FragmentHash) -> Option<FragmentRecord> {
        self.lock(self.shard_of(hash))
            .get(hash)
            .map(|t| FragmentRecord {
                hash: *hash,
                length: t.length,
                count: t.count,
            })
    }

    /// Number of distinct fragments.
    pub fn len(&self) -> usize {
        (0..self.shards.len()).map(|i| self.lock(i).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fold shards `range` in hash order.
    fn fold_shards(&self, range: std::ops::Range<usize>, page_size: u64) -> Summary {
        let mut summary = Summary::default();
        for i in range {
            for (hash, tally) in self.lock(i).iter() {
                summary.add(
                    &FragmentRecord {
                        hash: *hash,
                        length: tally.length,
                        count: tally.count,
                    },
                    page_size,
                );
            }
        }
        summary
    }

    /// Corpus totals, folding shard ranges on the ring. `page_size` must
    /// be nonzero.
    pub fn summarize(&self, ring: &Ring, page_size: u64) -> FragResult<Summary> {
        check_page_size(page_size)?;
        let job = SummaryJob {
            index: self,
            page_size,
            next_shard: AtomicUsize::new(0),
            total: Mutex::new(Summary::default()),
        };
        ring.run(&job)?;
        let summary = job.total.into_inner().unwrap_or_else(PoisonError::into_inner);
        info!(
            fragments = summary.fragments,
            unique = summary.unique_fragments,
            bytes = summary.bytes,
            unique_bytes = summary.unique_bytes,
            "index summarized"
        );
        Ok(summary)
    }

    /// Corpus totals on the calling thread.
    pub fn summarize_serial(&self, page_size: u64) -> FragResult<Summary> {
        check_page_size(page_size)?;
        Ok(self.fold_shards(0..self.shards.len(), page_size))
    }

    /// Every fragment seen at least `min_count` times, in hash order.
    pub fn duplicates(&self, min_count: u64) -> Vec<FragmentRecord> {
        let mut out = Vec::new();
        for i in 0..self.shards.len() {
            out.extend(
                self.lock(i)
                    .iter()
                    .filter(|(_, t)| t.count >= min_count)
                    .map(|(hash, t)| FragmentRecord {
                        hash: *hash,
                        length: t.length,
                        count: t.count,
                    }),
            );
        }
        out
    }

    /// The `limit` most repeated fragments, most repeated first. Ties are
    /// broken by bytes saved, then by hash.
    pub fn most_duplicated(&self, limit: usize) -> Vec<FragmentRecord> {
        let mut dups = self.duplicates(2);
        dups.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| {
                    let saved = |r: &FragmentRecord| r.length.saturating_mul(r.count);
                    saved(b).cmp(&saved(a))
                })
                .then_with(|| a.hash.cmp(&b.hash))
        });
        dups.truncate(limit);
        dups
    }
}

fn check_page_size(page_size: u64) -> FragResult<()> {
    if page_size == 0 {
        return Err(FragError::Config("page_size must be nonzero".into()));
    }
    Ok(())
}

struct SummaryJob<'a> {
    index: &'a FragmentIndex,
    page_size: u64,
    next_shard: AtomicUsize,
    total: Mutex<Summary>,
}

impl RingJob for SummaryJob<'_> {
    type Unit = std::ops::Range<usize>;
    type Output = Summary;

    fn claim(&self) -> FragResult<Option<Self::Unit>> {
        let start = self.next_shard.load(Ordering::Relaxed);
        let shards = self.index.shard_count();
        if start == shards {
            return Ok(None);
        }
        let end = (start + SHARDS_PER_CLAIM).min(shards);
        self.next_shard.store(end, Ordering::Relaxed);
        Ok(Some(start..end))
    }

    fn process(&self, range: Self::Unit) -> FragResult<Summary> {
        Ok(self.index.fold_shards(range, self.page_size))
    }

    fn emit(&self, partial: Summary) -> FragResult<()> {
        self.total
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(&partial);
        Ok(())
    }
}
