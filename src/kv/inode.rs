//! Inode records, the key scheme, and path resolution inside a transaction.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::Txn;
use crate::attr::FileInfo;
use crate::blob::{Blob, Bytes};
use crate::error::{Error, Result};
use crate::fs::MAX_SYMLINK_HOPS;
use crate::mode::FileMode;
use crate::path;

/// The root directory's inode id. Created when the filesystem initializes.
pub const ROOT_INO: u64 = 0;

/// Allocator cell holding the last issued inode id.
pub(super) const LAST_INO_KEY: &str = "meta/last-inode";

/// Ids and chunk indexes are fixed-width hex so lexicographic key order is
/// numeric order.
pub(super) fn inode_key(ino: u64) -> String {
    format!("inode/{ino:016x}")
}

pub(super) fn chunk_key(ino: u64, idx: usize) -> String {
    format!("blob/{ino:016x}/{idx:08x}")
}

/// Bounds covering every chunk key of an inode: '0' is the successor of '/'.
pub(super) fn chunk_bounds(ino: u64) -> (String, String) {
    (format!("blob/{ino:016x}/"), format!("blob/{ino:016x}0"))
}

/// The persistent metadata record stored under `inode/<id>`. Directories
/// carry an ordered name-to-id map; files carry their chunk keys in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct InodeRecord {
    pub mode: FileMode,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub parent: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<BTreeMap<String, u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<String>>,
}

impl InodeRecord {
    pub fn new_dir(mode: FileMode, parent: u64) -> InodeRecord {
        InodeRecord {
            mode: FileMode::DIR | (mode & !FileMode::TYPE_MASK),
            size: 0,
            mtime: Utc::now(),
            parent,
            entries: Some(BTreeMap::new()),
            chunks: None,
        }
    }

    pub fn new_file(mode: FileMode, parent: u64) -> InodeRecord {
        InodeRecord {
            mode: mode & !FileMode::TYPE_MASK,
            size: 0,
            mtime: Utc::now(),
            parent,
            entries: None,
            chunks: Some(Vec::new()),
        }
    }

    pub fn new_symlink(parent: u64) -> InodeRecord {
        InodeRecord {
            mode: FileMode::SYMLINK | FileMode(0o777),
            size: 0,
            mtime: Utc::now(),
            parent,
            entries: None,
            chunks: Some(Vec::new()),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }

    pub fn encode(&self) -> Result<Bytes> {
        let raw = serde_json::to_vec(self).map_err(|_| Error::Invalid)?;
        Ok(Bytes::new(raw))
    }

    pub fn decode(raw: &Bytes) -> Result<InodeRecord> {
        // A record that no longer decodes is corrupt, not missing.
        serde_json::from_slice(raw.as_slice()).map_err(|_| Error::Invalid)
    }

    pub fn file_info(&self, name: &str) -> FileInfo {
        FileInfo::new(name, self.size, self.mode, self.mtime.into())
    }

    /// The directory map, or `NotDir`.
    pub fn entries(&self) -> Result<&BTreeMap<String, u64>> {
        self.entries.as_ref().ok_or(Error::NotDir)
    }

    pub fn entries_mut(&mut self) -> Result<&mut BTreeMap<String, u64>> {
        self.entries.as_mut().ok_or(Error::NotDir)
    }
}

/// Load an inode that a directory entry points at. A missing record behind
/// a live entry is a dangling id: corruption, reported as `Invalid`.
pub(super) fn load(txn: &dyn Txn, ino: u64) -> Result<InodeRecord> {
    match txn.get(&inode_key(ino))? {
        Some(raw) => InodeRecord::decode(&raw),
        None => Err(Error::Invalid),
    }
}

pub(super) fn save(txn: &mut dyn Txn, ino: u64, record: &InodeRecord) -> Result<()> {
    txn.set(&inode_key(ino), record.encode()?)
}

/// Issue the next inode id.
pub(super) fn alloc_ino(txn: &mut dyn Txn) -> Result<u64> {
    let next = match txn.get(LAST_INO_KEY)? {
        Some(raw) => {
            let text = std::str::from_utf8(raw.as_slice()).map_err(|_| Error::Invalid)?;
            let last: u64 = text.parse().map_err(|_| Error::Invalid)?;
            last + 1
        }
        None => 1,
    };
    txn.set(LAST_INO_KEY, Bytes::new(next.to_string().into_bytes()))?;
    Ok(next)
}

/// Whether resolution follows a symbolic link in the final position.
/// Intermediate links are always followed.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(super) enum Follow {
    All,
    NoFinal,
}

/// Walk `p` from the root, returning the inode it names. Symlink targets
/// are spliced into the walk; more than [`MAX_SYMLINK_HOPS`] expansions is
/// a cycle and fails with `Invalid`.
pub(super) fn resolve(txn: &dyn Txn, p: &str, follow: Follow) -> Result<(u64, InodeRecord)> {
    let mut current = ROOT_INO;
    let mut record = load(txn, ROOT_INO)?;
    let mut pending: VecDeque<String> = path::split(p).map(str::to_string).collect();
    let mut hops = 0usize;

    while let Some(comp) = pending.pop_front() {
        if comp == ".." {
            // Only symlink targets introduce dot-dot; escaping the root is
            // a broken link.
            if current == ROOT_INO {
                return Err(Error::Invalid);
            }
            current = record.parent;
            record = load(txn, current)?;
            continue;
        }
        let entries = record.entries()?;
        let child = *entries.get(&comp).ok_or(Error::NotExist)?;
        let child_record = load(txn, child)?;

        if child_record.mode.is_symlink() && (follow == Follow::All || !pending.is_empty()) {
            hops += 1;
            if hops > MAX_SYMLINK_HOPS {
                return Err(Error::Invalid);
            }
            let target = read_link_target(txn, &child_record)?;
            let target = match target.strip_prefix('/') {
                Some(rest) => {
                    // Absolute target: restart at the root.
                    current = ROOT_INO;
                    record = load(txn, ROOT_INO)?;
                    rest.to_string()
                }
                None => target,
            };
            for tcomp in target
                .split('/')
                .rev()
                .filter(|c| !c.is_empty() && *c != ".")
            {
                pending.push_front(tcomp.to_string());
            }
            continue;
        }

        if pending.is_empty() {
            return Ok((child, child_record));
        }
        current = child;
        record = child_record;
    }
    Ok((current, record))
}

/// Resolve the parent directory of `p`, returning its inode and the final
/// name component. The parent chain is fully followed; `p` itself is not.
pub(super) fn resolve_parent(txn: &dyn Txn, p: &str) -> Result<(u64, InodeRecord, String)> {
    let (parent_ino, parent_record) = resolve(txn, path::parent(p), Follow::All)?;
    if !parent_record.is_dir() {
        return Err(Error::NotDir);
    }
    Ok((parent_ino, parent_record, path::base(p).to_string()))
}

/// Concatenate a file's chunks in order, clipped to its recorded size.
pub(super) fn read_all(txn: &dyn Txn, record: &InodeRecord) -> Result<Vec<u8>> {
    let chunks = record.chunks.as_ref().ok_or(Error::IsDir)?;
    let mut out = Vec::with_capacity(record.size as usize);
    for key in chunks {
        let chunk = txn.get(key)?.ok_or(Error::Invalid)?;
        out.extend_from_slice(chunk.as_slice());
    }
    out.truncate(record.size as usize);
    Ok(out)
}

/// A symlink's stored target.
pub(super) fn read_link_target(txn: &dyn Txn, record: &InodeRecord) -> Result<String> {
    String::from_utf8(read_all(txn, record)?).map_err(|_| Error::Invalid)
}

fn total_chunks(size: u64, chunk_size: usize) -> usize {
    size.div_ceil(chunk_size as u64) as usize
}

fn chunk_len(size: u64, chunk_size: usize, idx: usize) -> usize {
    (size - (idx * chunk_size) as u64).min(chunk_size as u64) as usize
}

/// Read up to `buf.len()` bytes at `offset`, stopping at end of file.
pub(super) fn read_range(
    txn: &dyn Txn,
    record: &InodeRecord,
    chunk_size: usize,
    offset: u64,
    buf: &mut [u8],
) -> Result<usize> {
    let chunks = record.chunks.as_ref().ok_or(Error::IsDir)?;
    if offset >= record.size || buf.is_empty() {
        return Ok(0);
    }
    let end = record.size.min(offset + buf.len() as u64);
    let first = (offset / chunk_size as u64) as usize;
    let last = ((end - 1) / chunk_size as u64) as usize;
    for idx in first..=last {
        let key = chunks.get(idx).ok_or(Error::Invalid)?;
        let chunk = txn.get(key)?.ok_or(Error::Invalid)?;
        let chunk_start = (idx * chunk_size) as u64;
        let lo = offset.max(chunk_start);
        let hi = end.min(chunk_start + chunk.len() as u64);
        let view = chunk.view((lo - chunk_start) as usize, (hi - chunk_start) as usize)?;
        let out = (lo - offset) as usize;
        buf[out..out + view.len()].copy_from_slice(view);
    }
    Ok((end - offset) as usize)
}

/// Overlay `data` at `offset`, extending the file when the write reaches
/// past its current end. The caller stamps mtime and saves the record.
pub(super) fn write_range(
    txn: &mut dyn Txn,
    ino: u64,
    record: &mut InodeRecord,
    chunk_size: usize,
    offset: u64,
    data: &[u8],
) -> Result<usize> {
    if data.is_empty() {
        return Ok(0);
    }
    let end = offset + data.len() as u64;
    if end > record.size {
        set_len(txn, ino, record, chunk_size, end)?;
    }
    let chunks = record.chunks.as_ref().ok_or(Error::IsDir)?;
    let first = (offset / chunk_size as u64) as usize;
    let last = ((end - 1) / chunk_size as u64) as usize;
    for idx in first..=last {
        let key = chunks.get(idx).ok_or(Error::Invalid)?;
        let mut chunk = txn.get(key)?.ok_or(Error::Invalid)?;
        let chunk_start = (idx * chunk_size) as u64;
        let lo = offset.max(chunk_start);
        let hi = end.min(chunk_start + chunk.len() as u64);
        chunk.set(
            &data[(lo - offset) as usize..(hi - offset) as usize],
            (lo - chunk_start) as usize,
        )?;
        txn.set(key, chunk)?;
    }
    Ok(data.len())
}

/// Resize a file's chunk list: growth zero-fills, shrinking deletes whole
/// chunks past the end and trims the last partial one.
pub(super) fn set_len(
    txn: &mut dyn Txn,
    ino: u64,
    record: &mut InodeRecord,
    chunk_size: usize,
    new_size: u64,
) -> Result<()> {
    let chunks = record.chunks.as_mut().ok_or(Error::IsDir)?;
    let old_size = record.size;
    if new_size == old_size {
        return Ok(());
    }
    if new_size > old_size {
        if let Some(last_idx) = chunks.len().checked_sub(1) {
            let want = chunk_len(new_size, chunk_size, last_idx);
            let key = chunks[last_idx].clone();
            let mut chunk = txn.get(&key)?.ok_or(Error::Invalid)?;
            if chunk.len() < want {
                chunk.grow(want - chunk.len())?;
                txn.set(&key, chunk)?;
            }
        }
        for idx in chunks.len()..total_chunks(new_size, chunk_size) {
            let key = chunk_key(ino, idx);
            txn.set(&key, Bytes::zeroed(chunk_len(new_size, chunk_size, idx)))?;
            chunks.push(key);
        }
    } else {
        let keep = total_chunks(new_size, chunk_size);
        for key in chunks.split_off(keep) {
            txn.delete(&key)?;
        }
        if let Some(last_idx) = keep.checked_sub(1) {
            let want = chunk_len(new_size, chunk_size, last_idx);
            let key = chunks[last_idx].clone();
            let mut chunk = txn.get(&key)?.ok_or(Error::Invalid)?;
            chunk.truncate(want)?;
            txn.set(&key, chunk)?;
        }
    }
    record.size = new_size;
    Ok(())
}

/// Delete an inode record and every chunk it owns.
pub(super) fn delete_inode(txn: &mut dyn Txn, ino: u64) -> Result<()> {
    let (lo, hi) = chunk_bounds(ino);
    for (key, _) in txn.range(&lo, &hi)? {
        txn.delete(&key)?;
    }
    txn.delete(&inode_key(ino))
}
