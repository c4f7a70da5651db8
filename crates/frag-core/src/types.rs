use std::fmt;

use crate::error::{FragError, FragResult};

/// SHA-512 digest width in bytes.
pub const HASH_LEN: usize = 64;

/// Width of a fragment file name: the start offset as zero-padded hex.
pub const FRAGMENT_NAME_LEN: usize = 16;

/// Content hash of one fragment. Ordered bytewise, which is the order
/// shards iterate in.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentHash(pub [u8; HASH_LEN]);

impl FragmentHash {
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Big-endian value of the first three bytes, the routing prefix.
    pub fn prefix24(&self) -> u32 {
        (u32::from(self.0[0]) << 16) | (u32::from(self.0[1]) << 8) | u32::from(self.0[2])
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse exactly `2 * HASH_LEN` hex digits (either case).
    pub fn from_hex(text: &str) -> FragResult<Self> {
        if text.len() != 2 * HASH_LEN {
            return Err(FragError::Malformed(format!(
                "can't parse hash [{text}]: expected {} hex digits, got {}",
                2 * HASH_LEN,
                text.len()
            )));
        }
        let mut out = [0u8; HASH_LEN];
        hex::decode_to_slice(text, &mut out)
            .map_err(|e| FragError::Malformed(format!("can't parse hash [{text}]: {e}")))?;
        Ok(FragmentHash(out))
    }
}

impl fmt::Display for FragmentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for FragmentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FragmentHash({})", &self.to_hex()[..16])
    }
}

/// Name of the file holding the fragment that starts at `start`.
pub fn fragment_file_name(start: u64) -> String {
    format!("{start:016x}")
}

/// Inverse of [`fragment_file_name`]. Anything but 16 hex digits is `None`.
pub fn parse_fragment_file_name(name: &str) -> Option<u64> {
    if name.len() != FRAGMENT_NAME_LEN || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(name, 16).ok()
}
