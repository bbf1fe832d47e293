//! Mount composition: graft backends onto a base filesystem at prefixes.

use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use tracing::debug;

use crate::attr::{DirEntry, FileInfo};
use crate::error::{Error, Result};
use crate::fs::{File, Fs, OpenFlags};
use crate::mode::FileMode;
use crate::path;

/// A filesystem assembled from a base backend plus backends mounted at
/// path prefixes. Every call resolves its path against the longest
/// matching mount point, rewrites it into that backend's namespace, and
/// delegates; errors come back with the mount prefix restored. A mount
/// shadows the base subtree beneath its point.
pub struct MountFs {
    base: Arc<dyn Fs>,
    mounts: DashMap<String, Arc<dyn Fs>>,
}

impl MountFs {
    pub fn new(base: Arc<dyn Fs>) -> MountFs {
        MountFs {
            base,
            mounts: DashMap::new(),
        }
    }

    /// Mount `fs` at `point`. Mounting over an existing mount point is
    /// `Exist`; the root cannot be a mount point.
    pub fn add_mount(&self, point: &str, fs: Arc<dyn Fs>) -> Result<()> {
        if !path::is_valid(point) || point == path::ROOT {
            return Err(Error::Invalid);
        }
        if self.mounts.contains_key(point) {
            return Err(Error::Exist);
        }
        debug!("mount added at {}", point);
        self.mounts.insert(point.to_string(), fs);
        Ok(())
    }

    /// Resolve a path to (backend, path within backend, mount prefix).
    fn resolve(&self, p: &str) -> (Arc<dyn Fs>, String, String) {
        let mut best: Option<(String, Arc<dyn Fs>)> = None;
        for entry in self.mounts.iter() {
            let point = entry.key();
            let matches = p == point || p.starts_with(&format!("{point}/"));
            if matches && best.as_ref().map_or(true, |(b, _)| point.len() > b.len()) {
                best = Some((point.clone(), entry.value().clone()));
            }
        }
        match best {
            Some((point, fs)) => {
                let rest = path::strip_prefix(p, &point).to_string();
                (fs, rest, point)
            }
            None => (self.base.clone(), p.to_string(), path::ROOT.to_string()),
        }
    }

    fn delegate<T>(
        &self,
        p: &str,
        f: impl FnOnce(&dyn Fs, &str) -> Result<T>,
    ) -> Result<T> {
        if !path::is_valid(p) {
            return Err(Error::Invalid);
        }
        let (fs, rest, prefix) = self.resolve(p);
        f(&*fs, &rest).map_err(|e| {
            let prefix = prefix.as_str();
            e.map_paths(|sub_path| path::join(prefix, sub_path))
        })
    }
}

impl Fs for MountFs {
    fn open(&self, p: &str) -> Result<Box<dyn File>> {
        self.delegate(p, |fs, rest| fs.open(rest))
    }

    fn open_file(&self, p: &str, flags: OpenFlags, mode: FileMode) -> Result<Box<dyn File>> {
        self.delegate(p, |fs, rest| fs.open_file(rest, flags, mode))
    }

    fn create(&self, p: &str) -> Result<Box<dyn File>> {
        self.delegate(p, |fs, rest| fs.create(rest))
    }

    fn mkdir(&self, p: &str, mode: FileMode) -> Result<()> {
        self.delegate(p, |fs, rest| fs.mkdir(rest, mode))
    }

    fn mkdir_all(&self, p: &str, mode: FileMode) -> Result<()> {
        self.delegate(p, |fs, rest| fs.mkdir_all(rest, mode))
    }

    fn read_dir(&self, p: &str) -> Result<Vec<DirEntry>> {
        self.delegate(p, |fs, rest| fs.read_dir(rest))
    }

    fn read_file(&self, p: &str) -> Result<Vec<u8>> {
        self.delegate(p, |fs, rest| fs.read_file(rest))
    }

    fn write_file(&self, p: &str, data: &[u8], mode: FileMode) -> Result<()> {
        self.delegate(p, |fs, rest| fs.write_file(rest, data, mode))
    }

    fn remove(&self, p: &str) -> Result<()> {
        self.delegate(p, |fs, rest| fs.remove(rest))
    }

    fn remove_all(&self, p: &str) -> Result<()> {
        self.delegate(p, |fs, rest| fs.remove_all(rest))
    }

    /// Rename within a single backend. Paths resolving to two different
    /// backends cannot be renamed across; that is `Invalid`.
    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        if !path::is_valid(old_path) || !path::is_valid(new_path) {
            return Err(Error::Invalid);
        }
        let (old_fs, old_rest, prefix) = self.resolve(old_path);
        let (new_fs, new_rest, new_prefix) = self.resolve(new_path);
        if prefix != new_prefix || !Arc::ptr_eq(&old_fs, &new_fs) {
            debug!(
                "cross-mount rename rejected: {} -> {}",
                old_path, new_path
            );
            return Err(Error::Invalid);
        }
        old_fs.rename(&old_rest, &new_rest).map_err(|e| {
            let prefix = prefix.as_str();
            e.map_paths(|sub_path| path::join(prefix, sub_path))
        })
    }

    fn stat(&self, p: &str) -> Result<FileInfo> {
        self.delegate(p, |fs, rest| fs.stat(rest))
    }

    fn lstat(&self, p: &str) -> Result<FileInfo> {
        self.delegate(p, |fs, rest| fs.lstat(rest))
    }

    fn chmod(&self, p: &str, mode: FileMode) -> Result<()> {
        self.delegate(p, |fs, rest| fs.chmod(rest, mode))
    }

    fn chown(&self, p: &str, uid: u32, gid: u32) -> Result<()> {
        self.delegate(p, |fs, rest| fs.chown(rest, uid, gid))
    }

    fn chtimes(&self, p: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        self.delegate(p, |fs, rest| fs.chtimes(rest, atime, mtime))
    }

    fn symlink(&self, target: &str, link_path: &str) -> Result<()> {
        self.delegate(link_path, |fs, rest| fs.symlink(target, rest))
    }

    fn read_link(&self, p: &str) -> Result<String> {
        self.delegate(p, |fs, rest| fs.read_link(rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::kv::KvFs;
    use crate::ops;

    fn mounted() -> MountFs {
        let base: Arc<dyn Fs> = Arc::new(KvFs::new().unwrap());
        let mounted: Arc<dyn Fs> = Arc::new(KvFs::new().unwrap());
        let fs = MountFs::new(base);
        fs.add_mount("mnt", mounted).unwrap();
        fs
    }

    #[test]
    fn longest_prefix_wins() {
        let base: Arc<dyn Fs> = Arc::new(KvFs::new().unwrap());
        let outer: Arc<dyn Fs> = Arc::new(KvFs::new().unwrap());
        let nested: Arc<dyn Fs> = Arc::new(KvFs::new().unwrap());
        let fs = MountFs::new(base);
        fs.add_mount("a", outer).unwrap();
        fs.add_mount("a/b", nested).unwrap();

        ops::write_file(&fs, "a/b/f", b"nested", FileMode(0o644)).unwrap();
        ops::write_file(&fs, "a/f", b"outer", FileMode(0o644)).unwrap();
        assert_eq!(ops::read_file(&fs, "a/b/f").unwrap(), b"nested");
        assert_eq!(ops::read_file(&fs, "a/f").unwrap(), b"outer");
    }

    #[test]
    fn rename_within_one_mount() {
        let fs = mounted();
        ops::write_file(&fs, "mnt/a", b"data", FileMode(0o644)).unwrap();
        ops::rename(&fs, "mnt/a", "mnt/b").unwrap();
        assert_eq!(ops::read_file(&fs, "mnt/b").unwrap(), b"data");
        assert_eq!(
            ops::stat(&fs, "mnt/a").unwrap_err().kind(),
            ErrorKind::NotExist
        );
    }

    #[test]
    fn cross_mount_rename_is_invalid() {
        let fs = mounted();
        ops::write_file(&fs, "mnt/a", b"data", FileMode(0o644)).unwrap();
        let err = ops::rename(&fs, "mnt/a", "elsewhere").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn error_paths_carry_the_mount_prefix() {
        let fs = mounted();
        let err = ops::read_file(&fs, "mnt/missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotExist);
        assert_eq!(err.path(), Some("mnt/missing"));
    }
}
