//! Open-file handles over the key-value backend.

use std::io::SeekFrom;
use std::sync::Arc;

use chrono::Utc;

use super::inode::{self, InodeRecord};
use super::store::{Store, Txn};
use super::KvInner;
use crate::attr::{DirEntry, FileInfo};
use crate::error::{Error, Result};
use crate::fs::{File, OpenFlags};

/// A stateful handle: the path identity it was opened against, an access
/// mode, a byte cursor, and a directory iteration cursor. Cursor methods
/// take `&mut self`; positional reads and writes take `&self` and run each
/// in their own store transaction.
pub struct KvFile<S: Store> {
    inner: Arc<KvInner<S>>,
    ino: u64,
    name: String,
    flags: OpenFlags,
    offset: u64,
    dir_pos: usize,
    closed: bool,
}

impl<S: Store> KvFile<S> {
    pub(super) fn new(inner: Arc<KvInner<S>>, ino: u64, name: String, flags: OpenFlags) -> Self {
        KvFile {
            inner,
            ino,
            name,
            flags,
            offset: 0,
            dir_pos: 0,
            closed: false,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Load this handle's record. The entry may have been unlinked since
    /// the open; that reads as `NotExist`, not corruption.
    fn load(&self, txn: &dyn Txn) -> Result<InodeRecord> {
        match txn.get(&inode::inode_key(self.ino))? {
            Some(raw) => InodeRecord::decode(&raw),
            None => Err(Error::NotExist),
        }
    }

    fn read_at_inner(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let chunk_size = self.inner.chunk_size;
        self.inner.store.transact(|txn| {
            let record = self.load(txn)?;
            if record.is_dir() {
                return Err(Error::IsDir);
            }
            inode::read_range(txn, &record, chunk_size, offset, buf)
        })
    }

    /// Write within one transaction. With `APPEND` the write lands at the
    /// current end of file regardless of `offset`; returns the position
    /// one past the written range.
    fn write_at_inner(&self, data: &[u8], offset: u64, append: bool) -> Result<u64> {
        let chunk_size = self.inner.chunk_size;
        self.inner.store.transact(|txn| {
            let mut record = self.load(txn)?;
            if record.is_dir() {
                return Err(Error::IsDir);
            }
            let start = if append { record.size } else { offset };
            inode::write_range(txn, self.ino, &mut record, chunk_size, start, data)?;
            record.mtime = Utc::now();
            inode::save(txn, self.ino, &record)?;
            Ok(start + data.len() as u64)
        })
    }
}

impl<S: Store> File for KvFile<S> {
    fn stat(&self) -> Result<FileInfo> {
        self.check_open()?;
        self.inner.store.transact(|txn| {
            let record = self.load(txn)?;
            Ok(record.file_info(&self.name))
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.closed = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        if !self.flags.readable() {
            return Err(Error::Permission);
        }
        let n = self.read_at_inner(buf, self.offset)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.check_open()?;
        if !self.flags.readable() {
            return Err(Error::Permission);
        }
        self.read_at_inner(buf, offset)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.check_open()?;
        if !self.flags.writable() {
            return Err(Error::Permission);
        }
        let end = self.write_at_inner(data, self.offset, self.flags.contains(OpenFlags::APPEND))?;
        self.offset = end;
        Ok(data.len())
    }

    fn write_at(&self, data: &[u8], offset: u64) -> Result<usize> {
        self.check_open()?;
        if !self.flags.writable() {
            return Err(Error::Permission);
        }
        self.write_at_inner(data, offset, false)?;
        Ok(data.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_open()?;
        let next = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let size = self
                    .inner
                    .store
                    .transact(|txn| Ok(self.load(txn)?.size))?;
                size.checked_add_signed(delta)
            }
        };
        match next {
            Some(offset) => {
                self.offset = offset;
                Ok(offset)
            }
            None => Err(Error::Invalid),
        }
    }

    fn sync(&self) -> Result<()> {
        // Transactions are durable as soon as the store commits them.
        self.check_open()
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.check_open()?;
        if !self.flags.writable() {
            return Err(Error::Permission);
        }
        let chunk_size = self.inner.chunk_size;
        self.inner.store.transact(|txn| {
            let mut record = self.load(txn)?;
            if record.is_dir() {
                return Err(Error::IsDir);
            }
            inode::set_len(txn, self.ino, &mut record, chunk_size, size)?;
            record.mtime = Utc::now();
            inode::save(txn, self.ino, &record)
        })
    }

    fn read_dir(&mut self, n: usize) -> Result<Vec<DirEntry>> {
        self.check_open()?;
        let start = self.dir_pos;
        let entries = self.inner.store.transact(|txn| {
            let record = self.load(txn)?;
            let entries = record.entries()?;
            let mut out = Vec::new();
            for (name, &child) in entries.iter().skip(start) {
                if n > 0 && out.len() == n {
                    break;
                }
                let child_record = inode::load(txn, child)?;
                out.push(DirEntry::from_info(child_record.file_info(name)));
            }
            Ok(out)
        })?;
        self.dir_pos += entries.len();
        Ok(entries)
    }
}
