//! Window checksum and split predicate
//!
//! Every offset `i` with a full window `[i, i + window)` is tested by
//! checksumming that window from scratch. Offset `i` is a split point when the
//! checksum is at or below the threshold. A uniformly distributed 32-bit
//! checksum passes with probability `threshold / 2^32`, so the mean fragment
//! size is about `2^32 / threshold` and depends only on local content.

/// CRC-32C (Castagnoli) of one window.
#[inline]
pub fn window_checksum(window: &[u8]) -> u32 {
    crc32c::crc32c(window)
}

/// True when the window starting at this position ends a fragment.
#[inline]
pub fn is_split_point(window: &[u8], threshold: u32) -> bool {
    window_checksum(window) <= threshold
}

/// Expected mean fragment size for `threshold`.
pub fn expected_fragment_size(threshold: u32) -> u64 {
    if threshold == 0 {
        return u64::MAX;
    }
    (1u64 << 32) / u64::from(threshold)
}

/// Offsets (relative to `buf`) of every split point among the first
/// `positions` window starts of `buf`.
///
/// `buf` must hold `positions + window - 1` bytes; positions without a full
/// window are never tested.
pub fn scan(buf: &[u8], positions: usize, window: usize, threshold: u32) -> Vec<usize> {
    let positions = positions.min((buf.len() + 1).saturating_sub(window));
    (0..positions)
        .filter(|&i| is_split_point(&buf[i..i + window], threshold))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_window_checksum_is_above_default_threshold() {
        // A run of zeros must never split at the default threshold, or
        // all-zero files would shatter into one-byte fragments.
        assert_eq!(window_checksum(&[0u8; 64]), 0x03c8_eb67);
        assert!(!is_split_point(&[0u8; 64], 0x1000));
    }

    #[test]
    fn checksum_is_castagnoli() {
        assert_eq!(window_checksum(b"123456789"), 0xe306_9283);
    }

    #[test]
    fn max_threshold_splits_everywhere() {
        let buf = vec![7u8; 100];
        assert_eq!(scan(&buf, 100, 8, u32::MAX).len(), 93);
    }

    #[test]
    fn zero_threshold_only_matches_zero_checksum() {
        let buf: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        let hits = scan(&buf, buf.len(), 16, 0);
        for i in hits {
            assert_eq!(window_checksum(&buf[i..i + 16]), 0);
        }
    }

    #[test]
    fn short_buffer_has_no_positions() {
        assert!(scan(&[1, 2, 3], 3, 8, u32::MAX).is_empty());
    }

    #[test]
    fn positions_limit_is_respected() {
        let buf = vec![1u8; 64];
        let hits = scan(&buf, 10, 4, u32::MAX);
        assert_eq!(hits, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn mean_size_from_threshold() {
        assert_eq!(expected_fragment_size(0x1000), 1 << 20);
        assert_eq!(expected_fragment_size(u32::MAX), 1);
    }
}
