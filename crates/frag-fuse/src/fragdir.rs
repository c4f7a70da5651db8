//! Fragment directories read back as one logical file.
//!
//! A fragment directory holds one regular file per fragment, named by the
//! fragment's start offset as 16 zero-padded hex digits. The logical size is
//! the furthest fragment end.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use frag_core::{fragment_file_name, parse_fragment_file_name, FragError, FragResult};
use tracing::debug;

/// True when `path` is a directory holding a first fragment.
pub fn is_fragment_dir(path: &Path) -> bool {
    path.is_dir() && path.join(fragment_file_name(0)).is_file()
}

#[derive(Debug, Clone)]
pub struct FragmentedFile {
    dir: PathBuf,
    /// start → length
    fragments: BTreeMap<u64, u64>,
    size: u64,
}

impl FragmentedFile {
    /// Enumerate the fragments under `dir`. Entries whose names are not
    /// fragment names, and anything that is not a regular file, are ignored.
    pub fn open(dir: &Path) -> FragResult<Self> {
        let mut fragments = BTreeMap::new();
        let mut size = 0u64;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(start) = entry.file_name().to_str().and_then(parse_fragment_file_name) else {
                continue;
            };
            let len = entry.metadata()?.len();
            size = size.max(start.saturating_add(len));
            fragments.insert(start, len);
        }
        debug!(dir = %dir.display(), fragments = fragments.len(), size, "fragment directory opened");
        Ok(FragmentedFile {
            dir: dir.to_path_buf(),
            fragments,
            size,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The fragment covering `offset`, as `(start, end)`.
    fn covering(&self, offset: u64) -> Option<(u64, u64)> {
        self.fragments
            .range(..=offset)
            .next_back()
            .map(|(&start, &len)| (start, start.saturating_add(len)))
            .filter(|&(_, end)| offset < end)
    }

    /// Read up to `len` bytes at `offset`, crossing fragment boundaries.
    ///
    /// Reads past the end are clamped. If a gap in the fragment set (or a
    /// fragment shorter than listed) stops the read, the bytes read so far
    /// are returned; a read that gets nothing at all is an error.
    pub fn read_at(&self, offset: u64, len: usize) -> FragResult<Vec<u8>> {
        if offset >= self.size {
            return Ok(Vec::new());
        }
        let end = offset.saturating_add(len as u64).min(self.size);
        let want = (end - offset) as usize;

        let mut out = Vec::new();
        out.try_reserve_exact(want)
            .map_err(|_| FragError::alloc("reconstruction read", want))?;

        let mut pos = offset;
        while pos < end {
            let Some((start, frag_end)) = self.covering(pos) else {
                break;
            };
            let chunk = (frag_end.min(end) - pos) as usize;
            let at = out.len();
            out.resize(at + chunk, 0);
            let path = self.dir.join(fragment_file_name(start));
            match read_exact_at(&path, &mut out[at..], pos - start) {
                Ok(()) => pos += chunk as u64,
                Err(e) => {
                    out.truncate(at);
                    if out.is_empty() {
                        return Err(e.into());
                    }
                    break;
                }
            }
        }

        if out.is_empty() {
            return Err(FragError::Io(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("no fragment of {} covers offset {pos}", self.dir.display()),
            )));
        }
        Ok(out)
    }

    /// Copy the whole logical file into `out`, fragment by fragment.
    pub fn copy_to<W: io::Write>(&self, out: &mut W) -> FragResult<u64> {
        let mut pos = 0;
        for (&start, &len) in &self.fragments {
            if start != pos {
                return Err(FragError::Malformed(format!(
                    "{}: fragments do not cover offset {pos}",
                    self.dir.display()
                )));
            }
            let mut file = File::open(self.dir.join(fragment_file_name(start)))?;
            io::copy(&mut file, out)?;
            pos = pos.saturating_add(len);
        }
        Ok(pos)
    }
}

#[cfg(unix)]
fn read_exact_at(path: &Path, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    File::open(path)?.read_exact_at(buf, offset)
}

#[cfg(not(unix))]
fn read_exact_at(path: &Path, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fragment_dir(parts: &[(u64, &[u8])]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for (start, data) in parts {
            fs::write(tmp.path().join(fragment_file_name(*start)), data).unwrap();
        }
        tmp
    }

    #[test]
    fn read_crosses_fragment_boundary() {
        let first: Vec<u8> = (0u8..16).collect();
        let second: Vec<u8> = (16u8..32).collect();
        let tmp = fragment_dir(&[(0, &first), (16, &second)]);

        let file = FragmentedFile::open(tmp.path()).unwrap();
        assert_eq!(file.size(), 32);
        assert_eq!(file.fragment_count(), 2);
        let got = file.read_at(8, 16).unwrap();
        assert_eq!(got, (8u8..24).collect::<Vec<_>>());
    }

    #[test]
    fn reads_clamp_to_size() {
        let tmp = fragment_dir(&[(0, b"hello "), (6, b"world")]);
        let file = FragmentedFile::open(tmp.path()).unwrap();
        assert_eq!(file.read_at(6, 100).unwrap(), b"world");
        assert!(file.read_at(11, 4).unwrap().is_empty());
        assert!(file.read_at(500, 4).unwrap().is_empty());
    }

    #[test]
    fn hole_returns_partial_then_errors() {
        let tmp = fragment_dir(&[(0, b"0123"), (8, b"89ab")]);
        let file = FragmentedFile::open(tmp.path()).unwrap();
        assert_eq!(file.size(), 12);
        assert_eq!(file.read_at(2, 8).unwrap(), b"23");
        assert!(file.read_at(4, 2).is_err());
        assert_eq!(file.read_at(9, 8).unwrap(), b"9ab");
    }

    #[test]
    fn fragment_at_top_of_offset_space() {
        let tmp = fragment_dir(&[(u64::MAX - 1, b"wxyz")]);
        let file = FragmentedFile::open(tmp.path()).unwrap();
        assert_eq!(file.size(), u64::MAX);
        assert_eq!(file.read_at(u64::MAX - 1, 4).unwrap(), b"w");
        assert!(file.read_at(0, 4).is_err());
    }

    #[test]
    fn unrelated_entries_are_ignored() {
        let tmp = fragment_dir(&[(0, b"abc")]);
        fs::write(tmp.path().join("notes.txt"), b"ignored").unwrap();
        fs::create_dir(tmp.path().join("0000000000000010")).unwrap();
        let file = FragmentedFile::open(tmp.path()).unwrap();
        assert_eq!(file.fragment_count(), 1);
        assert_eq!(file.size(), 3);
    }

    #[test]
    fn detects_fragment_dirs() {
        let tmp = fragment_dir(&[(0, b"abc")]);
        assert!(is_fragment_dir(tmp.path()));
        let empty = TempDir::new().unwrap();
        assert!(!is_fragment_dir(empty.path()));
        assert!(!is_fragment_dir(&tmp.path().join(fragment_file_name(0))));
    }

    #[test]
    fn copy_to_reassembles_and_rejects_gaps() {
        let tmp = fragment_dir(&[(0, b"abc"), (3, b"def")]);
        let mut out = Vec::new();
        let n = FragmentedFile::open(tmp.path()).unwrap().copy_to(&mut out).unwrap();
        assert_eq!(n, 6);
        assert_eq!(out, b"abcdef");

        let gap = fragment_dir(&[(0, b"abc"), (5, b"def")]);
        let err = FragmentedFile::open(gap.path())
            .unwrap()
            .copy_to(&mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, FragError::Malformed(_)));
    }
}
