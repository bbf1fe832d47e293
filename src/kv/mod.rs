//! A filesystem over any transactional ordered key-value store.
//!
//! Layout: `inode/<id>` holds a metadata record (directories embed an
//! ordered name-to-id map, files their chunk-key list), `blob/<id>/<chunk>`
//! holds fixed-size content chunks, and `meta/last-inode` is the id
//! allocator. Every public operation runs in a single store transaction
//! spanning all keys it touches, so concurrent writers are serialized and
//! readers see consistent snapshots.

mod file;
mod inode;
mod store;

pub use file::KvFile;
pub use inode::ROOT_INO;
pub use store::{MemoryStore, Store, Txn};

use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::attr::{DirEntry, FileInfo};
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{File, Fs, OpenFlags};
use crate::mode::FileMode;
use crate::path;

use inode::{Follow, InodeRecord};

/// Construction options for [`KvFs`].
#[derive(Debug, Clone)]
pub struct KvOptions {
    /// Content chunk size in bytes. Small values are useful in tests.
    pub chunk_size: usize,
}

impl Default for KvOptions {
    fn default() -> Self {
        KvOptions {
            chunk_size: 64 * 1024,
        }
    }
}

pub(crate) struct KvInner<S: Store> {
    pub(crate) store: S,
    pub(crate) chunk_size: usize,
}

/// A filesystem backed by a [`Store`]. Cheap to clone; clones share the
/// same backing store.
pub struct KvFs<S: Store = MemoryStore> {
    inner: Arc<KvInner<S>>,
}

impl<S: Store> Clone for KvFs<S> {
    fn clone(&self) -> Self {
        KvFs {
            inner: self.inner.clone(),
        }
    }
}

impl KvFs<MemoryStore> {
    /// A fresh volatile filesystem over the in-memory store.
    pub fn new() -> Result<Self> {
        Self::with_store(MemoryStore::new())
    }
}

impl<S: Store> KvFs<S> {
    pub fn with_store(store: S) -> Result<Self> {
        Self::with_options(store, KvOptions::default())
    }

    /// Open a filesystem over `store`, creating the root directory if the
    /// store is empty.
    pub fn with_options(store: S, options: KvOptions) -> Result<Self> {
        if options.chunk_size == 0 {
            return Err(Error::Invalid);
        }
        let fs = KvFs {
            inner: Arc::new(KvInner {
                store,
                chunk_size: options.chunk_size,
            }),
        };
        fs.inner.store.transact(|txn| {
            if txn.get(&inode::inode_key(ROOT_INO))?.is_none() {
                debug!("initializing root inode");
                let root = InodeRecord::new_dir(FileMode(0o755), ROOT_INO);
                inode::save(txn, ROOT_INO, &root)?;
            }
            Ok(())
        })?;
        Ok(fs)
    }

    fn check(p: &str) -> Result<()> {
        if path::is_valid(p) {
            Ok(())
        } else {
            Err(Error::Invalid)
        }
    }

    /// Open-or-create inside one transaction, returning the target inode.
    fn open_ino(&self, p: &str, flags: OpenFlags, mode: FileMode) -> Result<u64> {
        let chunk_size = self.inner.chunk_size;
        self.inner.store.transact(|txn| {
            if p == path::ROOT {
                if flags.writable() {
                    return Err(Error::IsDir);
                }
                return Ok(ROOT_INO);
            }
            let (parent_ino, mut parent, name) = inode::resolve_parent(txn, p)?;
            let existing = parent.entries()?.get(&name).copied();
            match existing {
                Some(child) => {
                    if flags.contains(OpenFlags::CREATE | OpenFlags::EXCL) {
                        return Err(Error::Exist);
                    }
                    let child_record = inode::load(txn, child)?;
                    let (child, mut child_record) = if child_record.mode.is_symlink() {
                        inode::resolve(txn, p, Follow::All)?
                    } else {
                        (child, child_record)
                    };
                    if child_record.is_dir() {
                        if flags.writable() {
                            return Err(Error::IsDir);
                        }
                        return Ok(child);
                    }
                    if flags.writable() && flags.contains(OpenFlags::TRUNCATE) {
                        inode::set_len(txn, child, &mut child_record, chunk_size, 0)?;
                        child_record.mtime = Utc::now();
                        inode::save(txn, child, &child_record)?;
                    }
                    Ok(child)
                }
                None => {
                    if !flags.contains(OpenFlags::CREATE) {
                        return Err(Error::NotExist);
                    }
                    let ino = inode::alloc_ino(txn)?;
                    let record = InodeRecord::new_file(mode, parent_ino);
                    inode::save(txn, ino, &record)?;
                    parent.entries_mut()?.insert(name, ino);
                    parent.mtime = Utc::now();
                    inode::save(txn, parent_ino, &parent)?;
                    Ok(ino)
                }
            }
        })
    }
}

impl<S: Store + 'static> Fs for KvFs<S> {
    fn open(&self, p: &str) -> Result<Box<dyn File>> {
        self.open_file(p, OpenFlags::READ_ONLY, FileMode(0))
    }

    fn open_file(&self, p: &str, flags: OpenFlags, mode: FileMode) -> Result<Box<dyn File>> {
        Self::check(p)?;
        debug!("open_file(path={}, flags={:?})", p, flags);
        let ino = self.open_ino(p, flags, mode)?;
        Ok(Box::new(KvFile::new(
            self.inner.clone(),
            ino,
            path::base(p).to_string(),
            flags,
        )))
    }

    fn create(&self, p: &str) -> Result<Box<dyn File>> {
        self.open_file(
            p,
            OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            FileMode(0o666),
        )
    }

    fn mkdir(&self, p: &str, mode: FileMode) -> Result<()> {
        Self::check(p)?;
        debug!("mkdir(path={}, mode={:?})", p, mode);
        self.inner.store.transact(|txn| {
            if p == path::ROOT {
                return Err(Error::Exist);
            }
            let (parent_ino, mut parent, name) = inode::resolve_parent(txn, p)?;
            if parent.entries()?.contains_key(&name) {
                return Err(Error::Exist);
            }
            let ino = inode::alloc_ino(txn)?;
            let record = InodeRecord::new_dir(mode, parent_ino);
            inode::save(txn, ino, &record)?;
            parent.entries_mut()?.insert(name, ino);
            parent.mtime = Utc::now();
            inode::save(txn, parent_ino, &parent)
        })
    }

    /// One transaction for the whole chain, so concurrent callers agree on
    /// a single inode per component.
    fn mkdir_all(&self, p: &str, mode: FileMode) -> Result<()> {
        Self::check(p)?;
        debug!("mkdir_all(path={}, mode={:?})", p, mode);
        self.inner.store.transact(|txn| {
            let mut current = ROOT_INO;
            let mut record = inode::load(txn, ROOT_INO)?;
            let mut walked = path::ROOT.to_string();
            for comp in path::split(p) {
                walked = path::join(&walked, comp);
                let existing = record.entries()?.get(comp).copied();
                match existing {
                    Some(child) => {
                        let child_record = inode::load(txn, child)?;
                        let (child, child_record) = if child_record.mode.is_symlink() {
                            inode::resolve(txn, &walked, Follow::All)?
                        } else {
                            (child, child_record)
                        };
                        if !child_record.is_dir() {
                            return Err(Error::NotDir);
                        }
                        current = child;
                        record = child_record;
                    }
                    None => {
                        let ino = inode::alloc_ino(txn)?;
                        let created = InodeRecord::new_dir(mode, current);
                        inode::save(txn, ino, &created)?;
                        record.entries_mut()?.insert(comp.to_string(), ino);
                        record.mtime = Utc::now();
                        inode::save(txn, current, &record)?;
                        current = ino;
                        record = created;
                    }
                }
            }
            Ok(())
        })
    }

    fn read_dir(&self, p: &str) -> Result<Vec<DirEntry>> {
        Self::check(p)?;
        self.inner.store.transact(|txn| {
            let (_, record) = inode::resolve(txn, p, Follow::All)?;
            let entries = record.entries()?;
            let mut out = Vec::with_capacity(entries.len());
            for (name, &child) in entries {
                let child_record = inode::load(txn, child)?;
                out.push(DirEntry::from_info(child_record.file_info(name)));
            }
            Ok(out)
        })
    }

    fn read_file(&self, p: &str) -> Result<Vec<u8>> {
        Self::check(p)?;
        self.inner.store.transact(|txn| {
            let (_, record) = inode::resolve(txn, p, Follow::All)?;
            if record.is_dir() {
                return Err(Error::IsDir);
            }
            inode::read_all(txn, &record)
        })
    }

    fn write_file(&self, p: &str, data: &[u8], mode: FileMode) -> Result<()> {
        Self::check(p)?;
        debug!("write_file(path={}, len={})", p, data.len());
        let chunk_size = self.inner.chunk_size;
        self.inner.store.transact(|txn| {
            if p == path::ROOT {
                return Err(Error::IsDir);
            }
            let (parent_ino, mut parent, name) = inode::resolve_parent(txn, p)?;
            let existing = parent.entries()?.get(&name).copied();
            let ino = match existing {
                Some(child) => {
                    let child_record = inode::load(txn, child)?;
                    let (child, child_record) = if child_record.mode.is_symlink() {
                        inode::resolve(txn, p, Follow::All)?
                    } else {
                        (child, child_record)
                    };
                    if child_record.is_dir() {
                        return Err(Error::IsDir);
                    }
                    child
                }
                None => {
                    let ino = inode::alloc_ino(txn)?;
                    let record = InodeRecord::new_file(mode, parent_ino);
                    inode::save(txn, ino, &record)?;
                    parent.entries_mut()?.insert(name, ino);
                    parent.mtime = Utc::now();
                    inode::save(txn, parent_ino, &parent)?;
                    ino
                }
            };
            let mut record = inode::load(txn, ino)?;
            inode::set_len(txn, ino, &mut record, chunk_size, 0)?;
            inode::write_range(txn, ino, &mut record, chunk_size, 0, data)?;
            record.mtime = Utc::now();
            inode::save(txn, ino, &record)
        })
    }

    fn remove(&self, p: &str) -> Result<()> {
        Self::check(p)?;
        debug!("remove(path={})", p);
        self.inner.store.transact(|txn| {
            if p == path::ROOT {
                return Err(Error::Invalid);
            }
            let (parent_ino, mut parent, name) = inode::resolve_parent(txn, p)?;
            let child = *parent.entries()?.get(&name).ok_or(Error::NotExist)?;
            let record = inode::load(txn, child)?;
            if let Some(entries) = &record.entries {
                if !entries.is_empty() {
                    return Err(Error::Backend("directory not empty".to_string()));
                }
            }
            parent.entries_mut()?.remove(&name);
            parent.mtime = Utc::now();
            inode::save(txn, parent_ino, &parent)?;
            inode::delete_inode(txn, child)
        })
    }

    fn remove_all(&self, p: &str) -> Result<()> {
        Self::check(p)?;
        debug!("remove_all(path={})", p);
        self.inner.store.transact(|txn| {
            if p == path::ROOT {
                return Err(Error::Invalid);
            }
            let (parent_ino, mut parent, name) = match inode::resolve_parent(txn, p) {
                Err(e) if e.kind() == ErrorKind::NotExist => return Ok(()),
                r => r?,
            };
            let child = match parent.entries()?.get(&name).copied() {
                Some(child) => child,
                None => return Ok(()),
            };
            drop_tree(txn, child)?;
            parent.entries_mut()?.remove(&name);
            parent.mtime = Utc::now();
            inode::save(txn, parent_ino, &parent)
        })
    }

    /// Atomic: unlink, destination checks, and relink happen in one
    /// transaction.
    fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        Self::check(old_path)?;
        Self::check(new_path)?;
        debug!("rename(old={}, new={})", old_path, new_path);
        if old_path == path::ROOT || new_path == path::ROOT {
            return Err(Error::Invalid);
        }
        // A directory cannot be moved beneath itself. Renaming a path to
        // itself falls through and is a no-op inside the transaction.
        if new_path.starts_with(&format!("{old_path}/")) {
            return Err(Error::Invalid);
        }
        self.inner.store.transact(|txn| {
            let (old_parent_ino, mut old_parent, old_name) = inode::resolve_parent(txn, old_path)?;
            let src = *old_parent.entries()?.get(&old_name).ok_or(Error::NotExist)?;
            let mut src_record = inode::load(txn, src)?;

            old_parent.entries_mut()?.remove(&old_name);
            old_parent.mtime = Utc::now();
            inode::save(txn, old_parent_ino, &old_parent)?;

            // Re-resolve the destination parent after the unlink so a
            // same-directory rename sees the updated record.
            let (new_parent_ino, mut new_parent, new_name) = inode::resolve_parent(txn, new_path)?;
            if let Some(&dst) = new_parent.entries()?.get(&new_name) {
                let dst_record = inode::load(txn, dst)?;
                if dst_record.is_dir() {
                    return Err(Error::IsDir);
                }
                if src_record.is_dir() {
                    return Err(Error::NotDir);
                }
                inode::delete_inode(txn, dst)?;
            }
            new_parent.entries_mut()?.insert(new_name, src);
            new_parent.mtime = Utc::now();
            inode::save(txn, new_parent_ino, &new_parent)?;

            if src_record.parent != new_parent_ino {
                src_record.parent = new_parent_ino;
                inode::save(txn, src, &src_record)?;
            }
            Ok(())
        })
    }

    fn stat(&self, p: &str) -> Result<FileInfo> {
        Self::check(p)?;
        self.inner.store.transact(|txn| {
            let (_, record) = inode::resolve(txn, p, Follow::All)?;
            Ok(record.file_info(path::base(p)))
        })
    }

    fn lstat(&self, p: &str) -> Result<FileInfo> {
        Self::check(p)?;
        self.inner.store.transact(|txn| {
            let (_, record) = inode::resolve(txn, p, Follow::NoFinal)?;
            Ok(record.file_info(path::base(p)))
        })
    }

    fn chmod(&self, p: &str, mode: FileMode) -> Result<()> {
        Self::check(p)?;
        debug!("chmod(path={}, mode={:?})", p, mode);
        self.inner.store.transact(|txn| {
            let (ino, mut record) = inode::resolve(txn, p, Follow::All)?;
            record.mode = (record.mode & FileMode::TYPE_MASK) | (mode & !FileMode::TYPE_MASK);
            inode::save(txn, ino, &record)
        })
    }

    /// Ownership is not part of the stored metadata; existing paths accept
    /// the call as a no-op.
    fn chown(&self, p: &str, _uid: u32, _gid: u32) -> Result<()> {
        Self::check(p)?;
        self.inner.store.transact(|txn| {
            inode::resolve(txn, p, Follow::All)?;
            Ok(())
        })
    }

    fn chtimes(&self, p: &str, _atime: SystemTime, mtime: SystemTime) -> Result<()> {
        Self::check(p)?;
        self.inner.store.transact(|txn| {
            let (ino, mut record) = inode::resolve(txn, p, Follow::All)?;
            record.mtime = DateTime::<Utc>::from(mtime);
            inode::save(txn, ino, &record)
        })
    }

    fn symlink(&self, target: &str, link_path: &str) -> Result<()> {
        Self::check(link_path)?;
        debug!("symlink(target={}, link={})", target, link_path);
        let chunk_size = self.inner.chunk_size;
        self.inner.store.transact(|txn| {
            if link_path == path::ROOT {
                return Err(Error::Exist);
            }
            let (parent_ino, mut parent, name) = inode::resolve_parent(txn, link_path)?;
            if parent.entries()?.contains_key(&name) {
                return Err(Error::Exist);
            }
            let ino = inode::alloc_ino(txn)?;
            let mut record = InodeRecord::new_symlink(parent_ino);
            inode::write_range(txn, ino, &mut record, chunk_size, 0, target.as_bytes())?;
            inode::save(txn, ino, &record)?;
            parent.entries_mut()?.insert(name, ino);
            parent.mtime = Utc::now();
            inode::save(txn, parent_ino, &parent)
        })
    }

    fn read_link(&self, p: &str) -> Result<String> {
        Self::check(p)?;
        self.inner.store.transact(|txn| {
            let (_, record) = inode::resolve(txn, p, Follow::NoFinal)?;
            if !record.mode.is_symlink() {
                return Err(Error::Invalid);
            }
            inode::read_link_target(txn, &record)
        })
    }
}

fn drop_tree(txn: &mut dyn Txn, ino: u64) -> Result<()> {
    let record = inode::load(txn, ino)?;
    if let Some(entries) = &record.entries {
        for &child in entries.values() {
            drop_tree(txn, child)?;
        }
    }
    inode::delete_inode(txn, ino)
}
