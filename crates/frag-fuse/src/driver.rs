//! FUSE filesystem driver: mounts a backing directory read-only.
//!
//! ## Virtual filesystem layout
//!
//! Everything in the backing directory is passed through unchanged, except
//! that fragment directories are presented as regular files:
//!
//! ```text
//! backing/                         mountpoint/
//!   notes.txt                  →     notes.txt
//!   disk.img/                  →     disk.img      (regular file, 3 GiB)
//!     0000000000000000
//!     00000000000a3f10
//!     ...
//!   other/                     →     other/
//! ```
//!
//! Reads of a fragment directory are served by [`FragmentedFile`].

#[cfg(feature = "fuse")]
mod inner {
    use std::collections::HashMap;
    use std::ffi::{OsStr, OsString};
    use std::fs::{self, File, Metadata};
    use std::io;
    use std::num::NonZeroU32;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::{FileExt, MetadataExt};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use bytes::Bytes;
    use frag_core::FragError;
    use fuse3::path::prelude::*;
    use fuse3::{Errno, FileType, MountOptions};
    use futures_util::stream;
    use tokio::sync::Mutex;
    use tracing::{debug, info, warn};

    use crate::fragdir::{is_fragment_dir, FragmentedFile};

    /// TTL for dentry/attr cache entries (FUSE kernel cache)
    const ATTR_TTL: Duration = Duration::from_secs(1);

    // ── File handle table ─────────────────────────────────────────────────────

    enum FileHandle {
        Plain(File),
        Fragmented(FragmentedFile),
    }

    impl FileHandle {
        fn read(&self, offset: u64, size: usize) -> io::Result<Vec<u8>> {
            match self {
                FileHandle::Plain(file) => {
                    let mut buf = vec![0u8; size];
                    let mut filled = 0;
                    while filled < size {
                        match file.read_at(&mut buf[filled..], offset + filled as u64) {
                            Ok(0) => break,
                            Ok(n) => filled += n,
                            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                            Err(e) => return Err(e),
                        }
                    }
                    buf.truncate(filled);
                    Ok(buf)
                }
                FileHandle::Fragmented(frags) => frags.read_at(offset, size).map_err(|e| match e {
                    FragError::Io(e) => e,
                    other => io::Error::other(other.to_string()),
                }),
            }
        }
    }

    fn errno(e: &io::Error) -> Errno {
        Errno::from(e.raw_os_error().unwrap_or(libc::EIO))
    }

    fn system_time(secs: i64, nsecs: i64) -> SystemTime {
        if secs >= 0 {
            UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
        } else {
            UNIX_EPOCH
        }
    }

    // ── FragFs ────────────────────────────────────────────────────────────────

    /// The FUSE filesystem driver.
    pub struct FragFs {
        backing: PathBuf,
        /// Open file handles: fh → backing file or fragment set
        handles: Arc<Mutex<HashMap<u64, Arc<FileHandle>>>>,
        /// Monotonically increasing file-handle counter
        next_fh: Arc<AtomicU64>,
    }

    impl FragFs {
        pub fn new(backing: PathBuf) -> Self {
            FragFs {
                backing,
                handles: Arc::new(Mutex::new(HashMap::new())),
                next_fh: Arc::new(AtomicU64::new(1)),
            }
        }

        /// `/a/b` → `{backing}/a/b`
        fn backing_path(&self, vpath: &OsStr) -> PathBuf {
            let rel = vpath.as_bytes();
            let rel = rel.strip_prefix(b"/").unwrap_or(rel);
            if rel.is_empty() {
                self.backing.clone()
            } else {
                self.backing.join(OsStr::from_bytes(rel))
            }
        }

        /// Attributes of a backing entry, with fragment directories shown as
        /// read-only regular files of their reconstructed size.
        fn attr_of(&self, path: &Path, meta: &Metadata) -> io::Result<FileAttr> {
            let (kind, perm, size) = if meta.is_dir() && is_fragment_dir(path) {
                let size = FragmentedFile::open(path)
                    .map_err(|e| io::Error::other(e.to_string()))?
                    .size();
                (FileType::RegularFile, (meta.mode() & 0o666) as u16, size)
            } else {
                let kind = if meta.is_dir() {
                    FileType::Directory
                } else if meta.file_type().is_symlink() {
                    FileType::Symlink
                } else {
                    FileType::RegularFile
                };
                (kind, (meta.mode() & 0o7777) as u16, meta.len())
            };
            Ok(FileAttr {
                size,
                blocks: size.div_ceil(512),
                atime: system_time(meta.atime(), meta.atime_nsec()),
                mtime: system_time(meta.mtime(), meta.mtime_nsec()),
                ctime: system_time(meta.ctime(), meta.ctime_nsec()),
                #[cfg(target_os = "macos")]
                crtime: system_time(meta.ctime(), meta.ctime_nsec()),
                kind,
                perm,
                nlink: meta.nlink() as u32,
                uid: meta.uid(),
                gid: meta.gid(),
                rdev: meta.rdev() as u32,
                blksize: meta.blksize() as u32,
                #[cfg(target_os = "macos")]
                flags: 0,
            })
        }

        fn stat(&self, vpath: &OsStr) -> fuse3::Result<FileAttr> {
            let path = self.backing_path(vpath);
            let meta = fs::symlink_metadata(&path).map_err(|e| errno(&e))?;
            self.attr_of(&path, &meta).map_err(|e| errno(&e))
        }

        /// Directory listing in backing order, starting at `offset`.
        fn list(&self, vpath: &OsStr, offset: i64) -> fuse3::Result<Vec<(OsString, FileAttr, i64)>> {
            let dir = self.backing_path(vpath);
            let dir_meta = fs::symlink_metadata(&dir).map_err(|e| errno(&e))?;
            let dir_attr = self.attr_of(&dir, &dir_meta).map_err(|e| errno(&e))?;

            let mut out = Vec::new();
            if offset < 1 {
                out.push((OsString::from("."), dir_attr, 1));
            }
            if offset < 2 {
                out.push((OsString::from(".."), dir_attr, 2));
            }

            let mut next_offset = 3i64;
            for entry in fs::read_dir(&dir).map_err(|e| errno(&e))? {
                let entry = entry.map_err(|e| errno(&e))?;
                if next_offset > offset {
                    let path = entry.path();
                    match entry.metadata().and_then(|m| self.attr_of(&path, &m)) {
                        Ok(attr) => out.push((entry.file_name(), attr, next_offset)),
                        // Entry vanished or became unreadable mid-listing.
                        Err(e) => debug!(path = %path.display(), "skipping entry: {e}"),
                    }
                }
                next_offset += 1;
            }
            Ok(out)
        }
    }

    // ── PathFilesystem impl ────────────────────────────────────────────────────

    impl PathFilesystem for FragFs {
        async fn init(&self, _req: Request) -> fuse3::Result<ReplyInit> {
            debug!(backing = %self.backing.display(), "frag-fuse init");
            Ok(ReplyInit {
                max_write: NonZeroU32::new(128 * 1024).unwrap_or(NonZeroU32::MIN),
            })
        }

        async fn destroy(&self, _req: Request) {
            info!("frag-fuse unmounted");
        }

        async fn getattr(
            &self,
            _req: Request,
            path: Option<&OsStr>,
            _fh: Option<u64>,
            _flags: u32,
        ) -> fuse3::Result<ReplyAttr> {
            let path = path.ok_or(Errno::from(libc::ENOENT))?;
            Ok(ReplyAttr {
                ttl: ATTR_TTL,
                attr: self.stat(path)?,
            })
        }

        async fn lookup(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
        ) -> fuse3::Result<ReplyEntry> {
            let mut full = PathBuf::from(parent);
            full.push(name);
            Ok(ReplyEntry {
                ttl: ATTR_TTL,
                attr: self.stat(full.as_os_str())?,
            })
        }

        async fn readlink(&self, _req: Request, path: &OsStr) -> fuse3::Result<ReplyData> {
            let target = fs::read_link(self.backing_path(path)).map_err(|e| errno(&e))?;
            Ok(ReplyData {
                data: Bytes::copy_from_slice(target.as_os_str().as_bytes()),
            })
        }

        // Directory entry stream types
        type DirEntryStream<'a>
            = stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntry>>>
        where
            Self: 'a;

        type DirEntryPlusStream<'a>
            = stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntryPlus>>>
        where
            Self: 'a;

        async fn readdir<'a>(
            &'a self,
            _req: Request,
            path: &'a OsStr,
            _fh: u64,
            offset: i64,
        ) -> fuse3::Result<ReplyDirectory<Self::DirEntryStream<'a>>> {
            let entries: Vec<fuse3::Result<DirectoryEntry>> = self
                .list(path, offset)?
                .into_iter()
                .map(|(name, attr, offset)| {
                    Ok(DirectoryEntry {
                        kind: attr.kind,
                        name,
                        offset,
                    })
                })
                .collect();
            Ok(ReplyDirectory {
                entries: stream::iter(entries),
            })
        }

        async fn readdirplus<'a>(
            &'a self,
            _req: Request,
            path: &'a OsStr,
            _fh: u64,
            offset: u64,
            _lock_owner: u64,
        ) -> fuse3::Result<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
            let entries: Vec<fuse3::Result<DirectoryEntryPlus>> = self
                .list(path, offset as i64)?
                .into_iter()
                .map(|(name, attr, offset)| {
                    Ok(DirectoryEntryPlus {
                        kind: attr.kind,
                        name,
                        offset,
                        attr,
                        entry_ttl: ATTR_TTL,
                        attr_ttl: ATTR_TTL,
                    })
                })
                .collect();
            Ok(ReplyDirectoryPlus {
                entries: stream::iter(entries),
            })
        }

        async fn opendir(
            &self,
            _req: Request,
            _path: &OsStr,
            _flags: u32,
        ) -> fuse3::Result<ReplyOpen> {
            Ok(ReplyOpen { fh: 0, flags: 0 })
        }

        async fn open(&self, _req: Request, path: &OsStr, flags: u32) -> fuse3::Result<ReplyOpen> {
            if flags as i32 & libc::O_ACCMODE != libc::O_RDONLY {
                return Err(Errno::from(libc::EACCES));
            }

            let backing = self.backing_path(path);
            let handle = tokio::task::spawn_blocking(move || -> io::Result<FileHandle> {
                if is_fragment_dir(&backing) {
                    FragmentedFile::open(&backing)
                        .map(FileHandle::Fragmented)
                        .map_err(|e| io::Error::other(e.to_string()))
                } else {
                    File::open(&backing).map(FileHandle::Plain)
                }
            })
            .await
            .map_err(|_| Errno::from(libc::EIO))?
            .map_err(|e| {
                warn!(path = ?path, "open failed: {e}");
                errno(&e)
            })?;

            let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
            self.handles.lock().await.insert(fh, Arc::new(handle));

            Ok(ReplyOpen { fh, flags: 0 })
        }

        async fn read(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            offset: u64,
            size: u32,
        ) -> fuse3::Result<ReplyData> {
            let handle = self
                .handles
                .lock()
                .await
                .get(&fh)
                .cloned()
                .ok_or(Errno::from(libc::EBADF))?;

            let data = tokio::task::spawn_blocking(move || handle.read(offset, size as usize))
                .await
                .map_err(|_| Errno::from(libc::EIO))?
                .map_err(|e| errno(&e))?;

            Ok(ReplyData {
                data: Bytes::from(data),
            })
        }

        async fn release(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            _flags: u32,
            _lock_owner: u64,
            _flush: bool,
        ) -> fuse3::Result<()> {
            self.handles.lock().await.remove(&fh);
            Ok(())
        }

        async fn flush(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            _fh: u64,
            _lock_owner: u64,
        ) -> fuse3::Result<()> {
            Ok(())
        }

        async fn statfs(&self, _req: Request, _path: &OsStr) -> fuse3::Result<ReplyStatFs> {
            let c_path = std::ffi::CString::new(self.backing.as_os_str().as_bytes())
                .map_err(|_| Errno::from(libc::EINVAL))?;
            let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
            if unsafe { libc::statvfs(c_path.as_ptr(), &mut st) } != 0 {
                return Err(errno(&io::Error::last_os_error()));
            }
            Ok(ReplyStatFs {
                blocks: st.f_blocks as u64,
                bfree: st.f_bfree as u64,
                bavail: st.f_bavail as u64,
                files: st.f_files as u64,
                ffree: st.f_ffree as u64,
                bsize: st.f_bsize as u32,
                namelen: st.f_namemax as u32,
                frsize: st.f_frsize as u32,
            })
        }
    }

    // ── Public mount API ──────────────────────────────────────────────────────

    /// Mount configuration
    pub struct MountConfig {
        pub backing: PathBuf,
        pub mountpoint: PathBuf,
        pub allow_other: bool,
    }

    /// Mount the FUSE filesystem and block until unmounted.
    ///
    /// Call from an async context. Returns when the filesystem is unmounted
    /// (e.g. via `fusermount3 -u <mountpoint>`).
    pub async fn mount(cfg: MountConfig) -> io::Result<()> {
        if !cfg.backing.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("backing directory {} not found", cfg.backing.display()),
            ));
        }
        let fs = FragFs::new(cfg.backing);

        let mut opts = MountOptions::default();
        opts.fs_name("frag");
        opts.read_only(true);
        opts.force_readdir_plus(true);
        if cfg.allow_other {
            opts.allow_other(true);
        }

        info!(mountpoint = %cfg.mountpoint.display(), "mounting frag (unprivileged via fusermount3)");

        let handle = Session::new(opts)
            .mount_with_unprivileged(fs, &cfg.mountpoint)
            .await?;

        handle.await
    }
}

#[cfg(feature = "fuse")]
pub use inner::{mount, FragFs, MountConfig};
