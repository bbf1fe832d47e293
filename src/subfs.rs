//! Prefix narrowing: expose a subtree of a parent filesystem.

use std::sync::Arc;
use std::time::SystemTime;

use crate::attr::{DirEntry, FileInfo};
use crate::error::{Error, Result};
use crate::fs::{File, Fs, OpenFlags};
use crate::mode::FileMode;
use crate::path;

/// A view of a parent filesystem restricted to a path prefix.
///
/// Every operation joins the prefix on the way in and strips it from
/// wrapped error paths on the way out, so errors read in the sub
/// namespace. Entry and info names are base names and pass through
/// unchanged. The parent's capability set is forwarded as-is: whatever the
/// parent answers, the sub answers.
pub struct SubFs {
    parent: Arc<dyn Fs>,
    prefix: String,
}

impl SubFs {
    /// Narrow `parent` to the subtree rooted at `dir`. The directory is not
    /// required to exist yet.
    pub fn new(parent: Arc<dyn Fs>, dir: &str) -> Result<SubFs> {
        if !path::is_valid(dir) {
            return Err(Error::Invalid);
        }
        Ok(SubFs {
            parent,
            prefix: dir.to_string(),
        })
    }

    fn full(&self, p: &str) -> Result<String> {
        if !path::is_valid(p) {
            return Err(Error::Invalid);
        }
        Ok(path::join(&self.prefix, p))
    }

    fn rewrite(&self, err: Error) -> Error {
        let prefix = self.prefix.as_str();
        err.map_paths(|p| path::strip_prefix(p, prefix).to_string())
    }
}

impl Fs for SubFs {
    fn open(&self, p: &str) -> Result<Box<dyn File>> {
        let full = self.full(p)?;
        self.parent.open(&full).map_err(|e| self.rewrite(e))
    }

    fn open_file(&self, p: &str, flags: OpenFlags, mode: FileMode) -> Result<Box<dyn File>> {
        let full = self.full(p)?;
        self.parent
            .open_file(&full, flags, mode)
            .map_err(|e| self.rewrite(e))
    }

    fn create(&self, p: &str) -> Result<Box<dyn File>> {
        let full = self.full(p)?;
        self.parent.create(&full).map_err(|e| self.rewrite(e))
    }

    fn mkdir(&self, p: &str, mode: FileMode) -> Result<()> {
        let full = self.full(p)?;
        self.parent.mkdir(&full, mode).map_err(|e| self.rewrite(e))
    }

    fn mkdir_all(&self, p: &str, mode: FileMode) -> Result<()> {
        let full = self.full(p)?;
        self.parent
            .mkdir_all(&full, mode)
            .map_err(|e| self.rewrite(e))
    }

    fn read_dir(&self, p: &str) -> Result<Vec<DirEntry>> {
        let full = self.full(p)?;
        self.parent.read_dir(&full).map_err(|e| self.rewrite(e))
    }

    fn read_file(&self, p: &str) -> Result<Vec<u8>> {
        let full = self.full(p)?;
        self.parent.read_file(&full).map_err(|e| self.rewrite(e))
    }

    fn write_file(&self, p: &str, data: &[u8], mode: FileMode) -> Result<()> {
        let full = self.full(p)?;
        self.parent
            .write_file(&full, data, mode)
            .map_err(|e| self.rewrite(e))
    }

    fn remove(&self, p: &str) -> Result<()> {
        let full = self.full(p)?;
        self.parent.remove(&full).map_err(|e| self.rewrite(e))
    }

    fn remove_all(&self, p: &str) -> Result<()> {
        let full = self.full(p)?;
        self.parent.remove_all(&full).map_err(|e| self.rewrite(e))
    }

    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old_full = self.full(old_path)?;
        let new_full = self.full(new_path)?;
        self.parent
            .rename(&old_full, &new_full)
            .map_err(|e| self.rewrite(e))
    }

    fn stat(&self, p: &str) -> Result<FileInfo> {
        let full = self.full(p)?;
        self.parent.stat(&full).map_err(|e| self.rewrite(e))
    }

    fn lstat(&self, p: &str) -> Result<FileInfo> {
        let full = self.full(p)?;
        self.parent.lstat(&full).map_err(|e| self.rewrite(e))
    }

    fn chmod(&self, p: &str, mode: FileMode) -> Result<()> {
        let full = self.full(p)?;
        self.parent.chmod(&full, mode).map_err(|e| self.rewrite(e))
    }

    fn chown(&self, p: &str, uid: u32, gid: u32) -> Result<()> {
        let full = self.full(p)?;
        self.parent
            .chown(&full, uid, gid)
            .map_err(|e| self.rewrite(e))
    }

    fn chtimes(&self, p: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let full = self.full(p)?;
        self.parent
            .chtimes(&full, atime, mtime)
            .map_err(|e| self.rewrite(e))
    }

    fn symlink(&self, target: &str, link_path: &str) -> Result<()> {
        let link_full = self.full(link_path)?;
        // Targets are stored verbatim; relative targets resolve naturally
        // inside the subtree.
        self.parent
            .symlink(target, &link_full)
            .map_err(|e| self.rewrite(e))
    }

    fn read_link(&self, p: &str) -> Result<String> {
        let full = self.full(p)?;
        self.parent.read_link(&full).map_err(|e| self.rewrite(e))
    }

    fn sub(&self, dir: &str) -> Result<Box<dyn Fs>> {
        // Collapse: a sub of a sub shares the parent with a joined prefix.
        let full = self.full(dir)?;
        Ok(Box::new(SubFs {
            parent: self.parent.clone(),
            prefix: full,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::kv::KvFs;
    use crate::ops;

    fn fixture() -> (Arc<dyn Fs>, Arc<dyn Fs>) {
        let parent: Arc<dyn Fs> = Arc::new(KvFs::new().unwrap());
        ops::mkdir_all(&*parent, "s/t", FileMode(0o755)).unwrap();
        let sub = ops::sub(parent.clone(), "s/t").unwrap();
        (parent, sub)
    }

    #[test]
    fn writes_are_visible_from_parent() {
        let (parent, sub) = fixture();
        ops::write_file(&*sub, "a", b"X", FileMode(0o644)).unwrap();
        assert_eq!(ops::read_file(&*parent, "s/t/a").unwrap(), b"X");
    }

    #[test]
    fn error_paths_are_in_sub_namespace() {
        let (_, sub) = fixture();
        let err = ops::stat(&*sub, "missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotExist);
        assert_eq!(err.path(), Some("missing"));
    }

    #[test]
    fn sub_of_sub_collapses_prefixes() {
        let parent: Arc<dyn Fs> = Arc::new(KvFs::new().unwrap());
        ops::mkdir_all(&*parent, "s/t", FileMode(0o755)).unwrap();
        let outer = ops::sub(parent.clone(), "s").unwrap();
        let inner = ops::sub(outer, "t").unwrap();
        ops::write_file(&*inner, "a", b"deep", FileMode(0o644)).unwrap();
        assert_eq!(ops::read_file(&*parent, "s/t/a").unwrap(), b"deep");
    }
}
