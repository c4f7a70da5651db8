//! Parallel record reader
//!
//! Claims pull fixed-size chunks off a sequential reader under the claim
//! baton, cut them at the last newline and carry the partial line into the
//! next claim. Parsing and index updates happen outside the baton.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use frag_chunks::record::for_each_record;
use frag_core::{FragError, FragResult, Ring, RingJob};
use tracing::{debug, info};

use crate::index::FragmentIndex;

/// Bytes pulled from the reader per claim.
pub const READ_CHUNK: usize = 1 << 20;

struct ReaderState<R> {
    reader: R,
    carry: Vec<u8>,
    eof: bool,
}

struct RecordJob<'a, R> {
    state: Mutex<ReaderState<R>>,
    index: &'a FragmentIndex,
    records: AtomicU64,
}

/// Fill `buf` from `reader` until it is full or the reader is exhausted.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> FragResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

impl<R: Read + Send> RingJob for RecordJob<'_, R> {
    type Unit = Vec<u8>;
    type Output = u64;

    fn claim(&self) -> FragResult<Option<Vec<u8>>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.eof && state.carry.is_empty() {
            return Ok(None);
        }

        let mut chunk = std::mem::take(&mut state.carry);
        let kept = chunk.len();
        chunk
            .try_reserve_exact(READ_CHUNK)
            .map_err(|_| FragError::alloc("record chunk", READ_CHUNK))?;
        chunk.resize(kept + READ_CHUNK, 0);
        let got = if state.eof {
            0
        } else {
            fill(&mut state.reader, &mut chunk[kept..])?
        };
        chunk.truncate(kept + got);
        if got < READ_CHUNK {
            state.eof = true;
        }

        if chunk.is_empty() {
            return Ok(None);
        }

        match chunk.iter().rposition(|&b| b == b'\n') {
            Some(nl) => {
                state.carry = chunk.split_off(nl + 1);
                debug!(bytes = chunk.len(), carry = state.carry.len(), "record chunk claimed");
                Ok(Some(chunk))
            }
            // A full line never fits in one chunk, or the input ends mid-line.
            None => Err(FragError::Malformed(format!(
                "no newline found after: {}",
                String::from_utf8_lossy(&chunk[..chunk.len().min(200)])
            ))),
        }
    }

    fn process(&self, chunk: Vec<u8>) -> FragResult<u64> {
        let mut n = 0;
        for_each_record(&chunk, |hash, length| {
            n += 1;
            self.index.record(&hash, length)
        })?;
        Ok(n)
    }

    fn emit(&self, n: u64) -> FragResult<()> {
        self.records.fetch_add(n, Ordering::Relaxed);
        Ok(())
    }
}

/// Count every record read from `reader` into `index`.
///
/// Returns the number of records read. Input that ends without a final
/// newline, or any line that is not a valid record, is fatal.
pub fn read_records<R: Read + Send>(
    reader: R,
    index: &FragmentIndex,
    ring: &Ring,
) -> FragResult<u64> {
    let job = RecordJob {
        state: Mutex::new(ReaderState {
            reader,
            carry: Vec::new(),
            eof: false,
        }),
        index,
        records: AtomicU64::new(0),
    };
    ring.run(&job)?;
    let records = job.records.into_inner();
    info!(records, "records read");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use frag_chunks::{format_record, hash_bytes};
    use std::io::Cursor;

    fn records(n: u32) -> String {
        let mut out = String::new();
        for i in 0..n {
            out.push_str(&format_record(&hash_bytes(&(i % 100).to_le_bytes()), u64::from(i % 100)));
        }
        out
    }

    /// Hands out at most `step` bytes per read.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.step).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn counts_every_record() {
        // ~20000 records at 133+ bytes each spans several chunks.
        let text = records(20_000);
        assert!(text.len() > 2 * READ_CHUNK);
        let index = FragmentIndex::new(8).unwrap();
        let n = read_records(Cursor::new(text.into_bytes()), &index, &Ring::new(4)).unwrap();
        assert_eq!(n, 20_000);
        assert_eq!(index.len(), 100);
        let summary = index.summarize_serial(4096).unwrap();
        assert_eq!(summary.fragments, 20_000);
    }

    #[test]
    fn short_reads_are_reassembled() {
        let text = records(500);
        let index = FragmentIndex::new(4).unwrap();
        let reader = Trickle {
            data: text.into_bytes(),
            pos: 0,
            step: 7,
        };
        assert_eq!(read_records(reader, &index, &Ring::new(3)).unwrap(), 500);
        assert_eq!(index.get(&hash_bytes(&5u32.to_le_bytes())).unwrap().count, 5);
    }

    #[test]
    fn empty_input_reads_nothing() {
        let index = FragmentIndex::new(4).unwrap();
        assert_eq!(read_records(std::io::empty(), &index, &Ring::new(2)).unwrap(), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn missing_final_newline_is_fatal() {
        let mut text = records(3);
        text.pop();
        let index = FragmentIndex::new(4).unwrap();
        let err = read_records(Cursor::new(text.into_bytes()), &index, &Ring::new(2)).unwrap_err();
        assert!(matches!(err, FragError::Malformed(ref m) if m.starts_with("no newline found")));
    }

    #[test]
    fn garbage_line_is_fatal() {
        let mut text = records(3);
        text.push_str("not a record\n");
        let index = FragmentIndex::new(4).unwrap();
        let err = read_records(Cursor::new(text.into_bytes()), &index, &Ring::new(2)).unwrap_err();
        assert!(matches!(err, FragError::Malformed(_)));
    }

    #[test]
    fn conflicting_lengths_are_fatal() {
        let h = hash_bytes(b"same");
        let text = format!("{}{}", format_record(&h, 1), format_record(&h, 2));
        let index = FragmentIndex::new(4).unwrap();
        let err = read_records(Cursor::new(text.into_bytes()), &index, &Ring::new(1)).unwrap_err();
        assert!(matches!(err, FragError::LengthMismatch { .. }));
    }
}
