//! SHA-512 fragment identity
//!
//! Pure functions: the same bytes always give the same hash, and nothing is
//! shared between calls, so fragments of a batch are hashed in parallel.

use frag_core::{FragError, FragResult, FragmentHash, HASH_LEN};
use rayon::prelude::*;
use sha2::{Digest, Sha512};

use crate::source::Source;

/// Hash a byte slice in memory.
pub fn hash_bytes(data: &[u8]) -> FragmentHash {
    let digest = Sha512::digest(data);
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&digest);
    FragmentHash(out)
}

/// Read the bytes of fragment `[start, end)`.
///
/// Fragments must fit in one allocation; anything larger than `isize::MAX`
/// bytes is a size-limit violation rather than an I/O error.
pub fn read_fragment(source: &dyn Source, start: u64, end: u64) -> FragResult<Vec<u8>> {
    let length = end.saturating_sub(start);
    let len = usize::try_from(length)
        .ok()
        .filter(|&len| len <= isize::MAX as usize)
        .ok_or(FragError::FragmentTooLarge { start, length })?;

    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| FragError::alloc("fragment", len))?;
    buf.resize(len, 0);
    source.read_exact_at(&mut buf, start)?;
    Ok(buf)
}

/// Hash fragment `[start, end)` of `source`, returning `(hash, length)`.
pub fn hash_range(source: &dyn Source, start: u64, end: u64) -> FragResult<(FragmentHash, u64)> {
    let data = read_fragment(source, start, end)?;
    Ok((hash_bytes(&data), end - start))
}

/// Hash every fragment of a boundary batch, in parallel, preserving order.
pub fn hash_ranges(source: &dyn Source, boundaries: &[u64]) -> FragResult<Vec<(FragmentHash, u64)>> {
    boundaries
        .par_windows(2)
        .map(|w| hash_range(source, w[0], w[1]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            hash_bytes(b"abc").to_hex(),
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
    }

    #[test]
    fn empty_hash_is_deterministic() {
        assert_eq!(hash_bytes(b""), hash_bytes(b""));
        assert!(hash_bytes(b"").to_hex().starts_with("cf83e1357eefb8bd"));
    }

    #[test]
    fn different_content_different_hash() {
        assert_ne!(hash_bytes(b"foo"), hash_bytes(b"bar"));
    }

    #[test]
    fn ranges_hash_in_boundary_order() {
        let data: Vec<u8> = (0u8..=255).cycle().take(10_000).collect();
        let boundaries = [0u64, 10, 500, 4096, 10_000];
        let hashed = hash_ranges(&data, &boundaries).unwrap();
        assert_eq!(hashed.len(), 4);
        for (i, (hash, len)) in hashed.iter().enumerate() {
            let (s, e) = (boundaries[i] as usize, boundaries[i + 1] as usize);
            assert_eq!(*hash, hash_bytes(&data[s..e]));
            assert_eq!(*len, (e - s) as u64);
        }
    }

    #[test]
    fn read_past_end_is_io_error() {
        let data = vec![0u8; 16];
        let err = hash_range(&data, 8, 32).unwrap_err();
        assert!(matches!(err, FragError::Io(_)));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_fragment_is_rejected() {
        let data = vec![0u8; 16];
        let err = read_fragment(&data, 0, u64::MAX).unwrap_err();
        assert!(matches!(err, FragError::FragmentTooLarge { start: 0, .. }));
    }

    proptest! {
        #[test]
        fn hash_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..=4096)) {
            prop_assert_eq!(hash_bytes(&data), hash_bytes(&data));
        }
    }
}
