use frag_chunks::checksum::scan;
use frag_chunks::{hash_bytes, split, BoundaryCollector, RecordWriter, SplitParams};
use frag_core::Ring;

fn make_data(size: usize) -> Vec<u8> {
    // Semi-realistic data: repeating pattern with some entropy
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [65536, 1048576])]
fn window_scan(bencher: divan::Bencher, size: usize) {
    let data = make_data(size + 63);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| scan(divan::black_box(&data), size, 64, 0x1000));
}

#[divan::bench(args = [1024, 65536, 1048576, 10485760])]
fn sha512_hash(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| hash_bytes(divan::black_box(&data)));
}

#[divan::bench(args = [1, 4, 16])]
fn ring_split(bencher: divan::Bencher, workers: usize) {
    let data = make_data(4 * 1024 * 1024);
    let params = SplitParams {
        window: 64,
        threshold: 0x10_0000,
        block_size: 256 * 1024,
    };
    let ring = Ring::new(workers);
    bencher
        .counter(divan::counter::BytesCount::new(data.len()))
        .bench(|| {
            let sink = BoundaryCollector::new();
            split(divan::black_box(&data), &params, &ring, &sink).unwrap()
        });
}

#[divan::bench(args = [1, 4, 16])]
fn full_pipeline(bencher: divan::Bencher, workers: usize) {
    let data = make_data(4 * 1024 * 1024);
    let params = SplitParams {
        window: 64,
        threshold: 0x10_0000,
        block_size: 256 * 1024,
    };
    let ring = Ring::new(workers);
    bencher
        .counter(divan::counter::BytesCount::new(data.len()))
        .bench(|| {
            let sink = RecordWriter::new(std::io::sink());
            split(divan::black_box(&data), &params, &ring, &sink).unwrap()
        });
}

fn main() {
    divan::main();
}
