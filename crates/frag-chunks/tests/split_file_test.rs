//! Integration test: splitting real files through the ring
//!
//! Exercises the `File` source (positional reads from many threads), the
//! forced final boundary, and boundary stability across ring sizes.

use std::fs::File;
use std::io::Write;

use frag_chunks::{split, BoundaryCollector, SplitParams};
use frag_core::Ring;
use rand::{RngCore, SeedableRng};
use tempfile::NamedTempFile;

fn write_temp(content: &[u8]) -> NamedTempFile {
    let mut tmp = NamedTempFile::new().expect("temp file");
    tmp.write_all(content).expect("write temp file");
    tmp.flush().expect("flush temp file");
    tmp
}

#[test]
fn zero_file_ends_at_exact_size() {
    const SIZE: usize = 10 * 1024 * 1024;
    let tmp = write_temp(&vec![0u8; SIZE]);
    let file = File::open(tmp.path()).unwrap();

    let params = SplitParams {
        window: 64,
        threshold: 0x1000,
        block_size: 1024 * 1024,
    };
    let sink = BoundaryCollector::new();
    let report = split(&file, &params, &Ring::new(8), &sink).unwrap();

    assert_eq!(report.file_size, SIZE as u64);
    assert_eq!(report.blocks, 10);
    // No zero window passes the threshold: one fragment covering everything.
    assert_eq!(report.fragments, 1);
    assert_eq!(sink.boundaries(), vec![0, 10_485_760]);
}

#[test]
fn file_boundaries_identical_for_any_ring_size() {
    let mut content = vec![0u8; 3 * 1024 * 1024 + 17];
    rand::rngs::StdRng::seed_from_u64(42).fill_bytes(&mut content);
    let tmp = write_temp(&content);
    let file = File::open(tmp.path()).unwrap();

    let params = SplitParams {
        window: 64,
        threshold: 0x0010_0000,
        block_size: 128 * 1024,
    };

    let serial = BoundaryCollector::new();
    split(&file, &params, &Ring::new(1), &serial).unwrap();
    let expected = serial.boundaries();
    assert!(expected.len() > 100, "expected ~768 fragments, got {}", expected.len() - 1);
    assert_eq!(*expected.last().unwrap(), content.len() as u64);

    for workers in [2, 5, 32] {
        let sink = BoundaryCollector::new();
        split(&file, &params, &Ring::new(workers), &sink).unwrap();
        assert_eq!(sink.boundaries(), expected, "workers = {workers}");
    }
}

#[test]
fn truncated_file_is_fatal() {
    // A source that claims more bytes than it can deliver must fail loudly.
    struct Shrunk(File);

    impl frag_chunks::Source for Shrunk {
        fn size(&self) -> std::io::Result<u64> {
            Ok(self.0.metadata()?.len() + 4096)
        }

        fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
            frag_chunks::Source::read_exact_at(&self.0, buf, offset)
        }
    }

    let tmp = write_temp(&[1u8; 8192]);
    let source = Shrunk(File::open(tmp.path()).unwrap());
    let sink = BoundaryCollector::new();
    let result = split(&source, &SplitParams::default(), &Ring::new(2), &sink);
    assert!(matches!(result, Err(frag_core::FragError::Io(_))));
}
