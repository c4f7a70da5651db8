//! Fragment record format
//!
//! One fragment per line, in fragment order:
//! ```text
//! <128 hex digits of SHA-512> <decimal length>\n
//! ```

use frag_core::{FragError, FragResult, FragmentHash};

/// Render one record line, newline included.
pub fn format_record(hash: &FragmentHash, length: u64) -> String {
    format!("{hash} {length}\n")
}

/// Parse one record line without its trailing newline.
pub fn parse_record(line: &[u8]) -> FragResult<(FragmentHash, u64)> {
    let text = std::str::from_utf8(line)
        .map_err(|_| FragError::Malformed(format!("can't parse line: {}", String::from_utf8_lossy(line))))?;
    let (hash, length) = text
        .split_once(' ')
        .ok_or_else(|| FragError::Malformed(format!("can't parse line: {text}")))?;
    let hash = FragmentHash::from_hex(hash)?;
    let length = length
        .parse::<u64>()
        .map_err(|e| FragError::Malformed(format!("can't parse length in line [{text}]: {e}")))?;
    Ok((hash, length))
}

/// Parse a buffer of complete lines, calling `f` for each record.
///
/// The buffer must end in a newline; trailing bytes after the last newline
/// are a malformed (truncated) record.
pub fn for_each_record<F>(buf: &[u8], mut f: F) -> FragResult<()>
where
    F: FnMut(FragmentHash, u64) -> FragResult<()>,
{
    let mut rest = buf;
    while !rest.is_empty() {
        let nl = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| {
                FragError::Malformed(format!(
                    "no newline found after: {}",
                    String::from_utf8_lossy(rest)
                ))
            })?;
        let (hash, length) = parse_record(&rest[..nl])?;
        f(hash, length)?;
        rest = &rest[nl + 1..];
    }
    Ok(())
}
