//! The capability contract: the operations a backend may advertise.
//!
//! Both traits are wide, with every optional operation defaulting to
//! [`Error::NotImplemented`]. A backend advertises a capability by
//! overriding the method; the dispatcher in [`crate::ops`] probes by
//! calling and recovers with a derived composition where one exists.

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

use crate::attr::{DirEntry, FileInfo};
use crate::error::{Error, Result};
use crate::mode::FileMode;

/// Maximum symbolic links followed during one resolution before the
/// traversal is declared cyclic and fails with `Invalid`.
pub const MAX_SYMLINK_HOPS: usize = 40;

/// Flags for [`Fs::open_file`]: an access mode in the low two bits plus
/// open behavior bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags(0);
    pub const WRITE_ONLY: OpenFlags = OpenFlags(1);
    pub const READ_WRITE: OpenFlags = OpenFlags(2);

    pub const CREATE: OpenFlags = OpenFlags(1 << 2);
    pub const EXCL: OpenFlags = OpenFlags(1 << 3);
    pub const TRUNCATE: OpenFlags = OpenFlags(1 << 4);
    pub const APPEND: OpenFlags = OpenFlags(1 << 5);

    const ACCESS_MASK: u32 = 0b11;

    pub fn access(self) -> OpenFlags {
        OpenFlags(self.0 & Self::ACCESS_MASK)
    }

    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn readable(self) -> bool {
        self.access() != Self::WRITE_ONLY
    }

    pub fn writable(self) -> bool {
        self.access() != Self::READ_ONLY
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;
    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// A filesystem backend.
///
/// All paths are canonical slash paths (see [`crate::path`]); callers going
/// through the dispatcher get validation and error wrapping for free.
/// Implementations return bare causes without op/path context.
#[allow(unused_variables)]
pub trait Fs: Send + Sync {
    /// Open the named file for reading.
    fn open(&self, path: &str) -> Result<Box<dyn File>> {
        Err(Error::NotImplemented)
    }

    /// Open with explicit flags; `mode` applies when the file is created.
    fn open_file(&self, path: &str, flags: OpenFlags, mode: FileMode) -> Result<Box<dyn File>> {
        Err(Error::NotImplemented)
    }

    /// Create (or truncate) the named file, open for reading and writing.
    fn create(&self, path: &str) -> Result<Box<dyn File>> {
        Err(Error::NotImplemented)
    }

    fn mkdir(&self, path: &str, mode: FileMode) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn mkdir_all(&self, path: &str, mode: FileMode) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        Err(Error::NotImplemented)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        Err(Error::NotImplemented)
    }

    fn write_file(&self, path: &str, data: &[u8], mode: FileMode) -> Result<()> {
        Err(Error::NotImplemented)
    }

    /// Remove the named file or empty directory.
    fn remove(&self, path: &str) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn remove_all(&self, path: &str) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        Err(Error::NotImplemented)
    }

    /// Stat the named entity, following symbolic links.
    fn stat(&self, path: &str) -> Result<FileInfo> {
        Err(Error::NotImplemented)
    }

    /// Stat without following a final symbolic link.
    fn lstat(&self, path: &str) -> Result<FileInfo> {
        Err(Error::NotImplemented)
    }

    fn chmod(&self, path: &str, mode: FileMode) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        Err(Error::NotImplemented)
    }

    /// Create a symbolic link at `link_path` pointing at `target`.
    /// The target is stored verbatim and is not required to exist.
    fn symlink(&self, target: &str, link_path: &str) -> Result<()> {
        Err(Error::NotImplemented)
    }

    fn read_link(&self, path: &str) -> Result<String> {
        Err(Error::NotImplemented)
    }

    /// Narrow this filesystem to the subtree rooted at `dir`. Backends that
    /// can do better than the generic prefix decorator override this; a
    /// sub-filesystem overrides it to collapse prefixes.
    fn sub(&self, dir: &str) -> Result<Box<dyn Fs>> {
        Err(Error::NotImplemented)
    }
}

impl Fs for Arc<dyn Fs> {
    fn open(&self, path: &str) -> Result<Box<dyn File>> {
        self.as_ref().open(path)
    }

    fn open_file(&self, path: &str, flags: OpenFlags, mode: FileMode) -> Result<Box<dyn File>> {
        self.as_ref().open_file(path, flags, mode)
    }

    fn create(&self, path: &str) -> Result<Box<dyn File>> {
        self.as_ref().create(path)
    }

    fn mkdir(&self, path: &str, mode: FileMode) -> Result<()> {
        self.as_ref().mkdir(path, mode)
    }

    fn mkdir_all(&self, path: &str, mode: FileMode) -> Result<()> {
        self.as_ref().mkdir_all(path, mode)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.as_ref().read_dir(path)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.as_ref().read_file(path)
    }

    fn write_file(&self, path: &str, data: &[u8], mode: FileMode) -> Result<()> {
        self.as_ref().write_file(path, data, mode)
    }

    fn remove(&self, path: &str) -> Result<()> {
        self.as_ref().remove(path)
    }

    fn remove_all(&self, path: &str) -> Result<()> {
        self.as_ref().remove_all(path)
    }

    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.as_ref().rename(old_path, new_path)
    }

    fn stat(&self, path: &str) -> Result<FileInfo> {
        self.as_ref().stat(path)
    }

    fn lstat(&self, path: &str) -> Result<FileInfo> {
        self.as_ref().lstat(path)
    }

    fn chmod(&self, path: &str, mode: FileMode) -> Result<()> {
        self.as_ref().chmod(path, mode)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.as_ref().chown(path, uid, gid)
    }

    fn chtimes(&self, path: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        self.as_ref().chtimes(path, atime, mtime)
    }

    fn symlink(&self, target: &str, link_path: &str) -> Result<()> {
        self.as_ref().symlink(target, link_path)
    }

    fn read_link(&self, path: &str) -> Result<String> {
        self.as_ref().read_link(path)
    }

    fn sub(&self, dir: &str) -> Result<Box<dyn Fs>> {
        self.as_ref().sub(dir)
    }
}

/// An open file handle.
///
/// Cursor operations take `&mut self`; sharing a handle across tasks means
/// wrapping it in a lock, which serializes them. Positional `read_at` and
/// `write_at` take `&self` and are safe to issue concurrently. Operations
/// after [`File::close`] fail with `Closed`.
#[allow(unused_variables)]
pub trait File: Send + Sync {
    /// Stat the open file. The reported name is the handle's identity: the
    /// base of the path it was opened against.
    fn stat(&self) -> Result<FileInfo>;

    /// Close the handle. Exactly once; a second close fails with `Closed`.
    fn close(&mut self) -> Result<()>;

    /// Read at the cursor, advancing it. `Ok(0)` signals end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Err(Error::NotImplemented)
    }

    /// Read at an absolute offset without touching the cursor.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        Err(Error::NotImplemented)
    }

    /// Write at the cursor, advancing it.
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Err(Error::NotImplemented)
    }

    /// Write at an absolute offset without touching the cursor.
    fn write_at(&self, data: &[u8], offset: u64) -> Result<usize> {
        Err(Error::NotImplemented)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Err(Error::NotImplemented)
    }

    fn sync(&self) -> Result<()> {
        Err(Error::NotImplemented)
    }

    /// Resize the file. Unlike a blob, a file may be extended here; the new
    /// tail reads as zeros.
    fn truncate(&mut self, size: u64) -> Result<()> {
        Err(Error::NotImplemented)
    }

    /// Read up to `n` directory entries, advancing the iteration cursor.
    /// `n == 0` reads the remainder. An exhausted cursor yields an empty
    /// vector.
    fn read_dir(&mut self, n: usize) -> Result<Vec<DirEntry>> {
        Err(Error::NotImplemented)
    }
}

impl std::fmt::Debug for dyn File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File").finish()
    }
}
