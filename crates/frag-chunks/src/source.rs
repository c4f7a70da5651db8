//! Positional byte sources
//!
//! The splitter and the hashing sinks read arbitrary ranges from many threads
//! at once, so a source must support `pread`-style access through `&self`.

use std::fs::File;
use std::io;

/// A fixed-size byte source readable at any offset from any thread.
pub trait Source: Sync {
    /// Total size in bytes, fixed for the duration of a job.
    fn size(&self) -> io::Result<u64>;

    /// Fill `buf` from `offset`. A short read is an error.
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;
}

impl Source for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    #[cfg(unix)]
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        // Retries EINTR and reports EOF as UnexpectedEof.
        std::os::unix::fs::FileExt::read_exact_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            match self.seek_read(buf, offset) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Source for [u8] {
    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= self.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(&self[start..end]);
        Ok(())
    }
}

impl Source for Vec<u8> {
    fn size(&self) -> io::Result<u64> {
        self.as_slice().size()
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.as_slice().read_exact_at(buf, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn slice_reads_in_range() {
        let data: Vec<u8> = (0u8..32).collect();
        let mut buf = [0u8; 4];
        data.read_exact_at(&mut buf, 10).unwrap();
        assert_eq!(buf, [10, 11, 12, 13]);
        assert_eq!(data.size().unwrap(), 32);
    }

    #[test]
    fn slice_short_read_is_error() {
        let data = vec![0u8; 8];
        let mut buf = [0u8; 4];
        let err = data.read_exact_at(&mut buf, 6).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn file_reads_at_offset() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        let file = File::open(tmp.path()).unwrap();
        let mut buf = [0u8; 3];
        file.read_exact_at(&mut buf, 4).unwrap();
        assert_eq!(&buf, b"456");
        assert_eq!(Source::size(&file).unwrap(), 10);
        assert!(file.read_exact_at(&mut buf, 9).is_err());
    }
}
