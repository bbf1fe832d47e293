//! A read-only filesystem materialized from a tar stream.
//!
//! Construction eagerly unpacks the stream into a writable backend.
//! Directory entries are applied synchronously so parents always exist
//! before their children; file bodies flow through a bounded buffer pool
//! to a small worker pool, so independent files unpack in parallel while
//! peak memory stays capped. After construction, reads delegate to the
//! backend and every mutation fails with `Permission`.

mod bufferpool;

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Receiver};
use dashmap::DashSet;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::attr::{DirEntry, FileInfo};
use crate::error::{Error, Result};
use crate::fs::{File, Fs, OpenFlags};
use crate::mode::FileMode;
use crate::ops;
use crate::path;

use bufferpool::{BufferPool, PooledBuffer};

/// Unpack tuning knobs.
#[derive(Debug, Clone)]
pub struct TarOptions {
    /// Worker threads applying file bodies. 1 keeps the unpack serial.
    pub parallelism: usize,
    /// Size of each pooled buffer; entries larger than this spill the
    /// remainder into a temporary allocation.
    pub buffer_size: usize,
    /// Buffer pool cap. Peak pooled memory is `max_buffers * buffer_size`.
    pub max_buffers: usize,
}

impl Default for TarOptions {
    fn default() -> Self {
        TarOptions {
            parallelism: 1,
            buffer_size: 1 << 20,
            max_buffers: 4,
        }
    }
}

/// A filesystem whose contents come from a tar stream unpacked into a
/// writable backend, then served read-only.
pub struct TarFs<F: Fs> {
    dest: F,
}

impl<F: Fs> TarFs<F> {
    /// Unpack `reader` into `dest` with default options.
    pub fn new<R: Read>(reader: R, dest: F) -> Result<TarFs<F>> {
        Self::with_options(reader, dest, TarOptions::default())
    }

    /// Unpack `reader` into `dest`. On error the partially unpacked state
    /// is left behind; construct against a scratch backend the caller can
    /// discard.
    pub fn with_options<R: Read>(reader: R, dest: F, options: TarOptions) -> Result<TarFs<F>> {
        unpack(reader, &dest, &options)?;
        Ok(TarFs { dest })
    }

    /// The backing filesystem, for callers that want it back.
    pub fn into_inner(self) -> F {
        self.dest
    }
}

/// A file entry handed to the worker pool: path, metadata, and the body
/// split between a pooled buffer and spill overflow.
struct UnpackJob {
    path: String,
    mode: FileMode,
    mtime: SystemTime,
    head: PooledBuffer,
    head_len: usize,
    spill: Vec<u8>,
}

/// Tracks outstanding jobs so the drain can wait for quiescence.
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn new() -> InFlight {
        InFlight {
            count: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    fn enter(&self) {
        *self.count.lock() += 1;
    }

    fn exit(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

fn record_error(slot: &Mutex<Option<Error>>, aborted: &AtomicBool, err: Error) {
    warn!("unpack aborted: {}", err);
    let mut slot = slot.lock();
    if slot.is_none() {
        *slot = Some(err);
    }
    aborted.store(true, Ordering::Relaxed);
}

fn unpack<R: Read, F: Fs>(reader: R, dest: &F, options: &TarOptions) -> Result<()> {
    let parallelism = options.parallelism.max(1);
    let pool = BufferPool::new(options.buffer_size.max(1), options.max_buffers);
    let (job_tx, job_rx) = bounded::<UnpackJob>(parallelism * 2);
    let first_error = Mutex::new(None);
    let aborted = AtomicBool::new(false);
    let in_flight = InFlight::new();
    let made_dirs = DashSet::new();

    std::thread::scope(|scope| -> Result<()> {
        for i in 0..parallelism {
            let job_rx: Receiver<UnpackJob> = job_rx.clone();
            let first_error = &first_error;
            let aborted = &aborted;
            let in_flight = &in_flight;
            std::thread::Builder::new()
                .name(format!("tarfs-unpack-{i}"))
                .spawn_scoped(scope, move || {
                    for job in job_rx.iter() {
                        if !aborted.load(Ordering::Relaxed) {
                            if let Err(e) = apply_file(dest, &job) {
                                record_error(first_error, aborted, e);
                            }
                        }
                        // Drop returns the pooled buffer before we mark the
                        // job finished.
                        drop(job);
                        in_flight.exit();
                    }
                })
                .map_err(Error::Io)?;
        }

        let mut archive = tar::Archive::new(reader);
        let entries = match archive.entries() {
            Ok(entries) => entries,
            Err(e) => {
                record_error(&first_error, &aborted, Error::Io(e));
                drop(job_tx);
                return Ok(());
            }
        };
        for entry in entries {
            if aborted.load(Ordering::Relaxed) {
                break;
            }
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    record_error(&first_error, &aborted, Error::Io(e));
                    break;
                }
            };
            let outcome = (|| -> Result<()> {
                let entry_path = match clean_entry_path(&entry.path_bytes())? {
                    Some(p) => p,
                    None => return Ok(()),
                };
                let mode = FileMode(header_mode(&entry)? & 0o7777);
                let mtime = UNIX_EPOCH + Duration::from_secs(entry.header().mtime().unwrap_or(0));
                match entry.header().entry_type() {
                    tar::EntryType::Directory => {
                        debug!("dir {}", entry_path);
                        make_dir(dest, &made_dirs, &entry_path, mode, mtime)
                    }
                    tar::EntryType::Symlink => {
                        let target = link_target(&entry)?;
                        debug!("symlink {} -> {}", entry_path, target);
                        ensure_parent(dest, &made_dirs, &entry_path)?;
                        ops::symlink(dest, &target, &entry_path)
                    }
                    tar::EntryType::Link => {
                        // The target must be fully written before we copy
                        // it, so wait out the worker pool.
                        let target = link_target(&entry)?;
                        let target = clean_entry_path(target.as_bytes())?.ok_or(Error::Invalid)?;
                        debug!("hardlink {} -> {}", entry_path, target);
                        in_flight.wait_idle();
                        ensure_parent(dest, &made_dirs, &entry_path)?;
                        let data = ops::read_file(dest, &target)?;
                        ops::write_file(dest, &entry_path, &data, mode)?;
                        ops::chtimes(dest, &entry_path, mtime, mtime)
                    }
                    tar::EntryType::Regular | tar::EntryType::Continuous => {
                        ensure_parent(dest, &made_dirs, &entry_path)?;
                        let size = entry.size() as usize;
                        let mut head = pool.wait();
                        let head_len = size.min(pool.buffer_size());
                        entry
                            .read_exact(&mut head.data_mut()[..head_len])
                            .map_err(Error::Io)?;
                        let mut spill = Vec::new();
                        if size > head_len {
                            entry.read_to_end(&mut spill).map_err(Error::Io)?;
                        }
                        debug!("file {} ({} bytes)", entry_path, size);
                        in_flight.enter();
                        let job = UnpackJob {
                            path: entry_path,
                            mode,
                            mtime,
                            head,
                            head_len,
                            spill,
                        };
                        if job_tx.send(job).is_err() {
                            in_flight.exit();
                        }
                        Ok(())
                    }
                    other => {
                        debug!("skipping entry type {:?} at {}", other, entry_path);
                        Ok(())
                    }
                }
            })();
            if let Err(e) = outcome {
                record_error(&first_error, &aborted, e);
                break;
            }
        }
        drop(job_tx);
        Ok(())
    })?;

    match first_error.into_inner() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn apply_file<F: Fs>(dest: &F, job: &UnpackJob) -> Result<()> {
    let mut file = ops::open_file(
        dest,
        &job.path,
        OpenFlags::WRITE_ONLY | OpenFlags::CREATE | OpenFlags::TRUNCATE,
        job.mode,
    )?;
    for part in [&job.head.data()[..job.head_len], job.spill.as_slice()] {
        let mut written = 0;
        while written < part.len() {
            match file.write(&part[written..]) {
                Ok(0) => {
                    let _ = file.close();
                    return Err(Error::ShortWrite);
                }
                Ok(n) => written += n,
                Err(e) => {
                    let _ = file.close();
                    return Err(e);
                }
            }
        }
    }
    file.close()?;
    ops::chtimes(dest, &job.path, job.mtime, job.mtime)
}

fn make_dir<F: Fs>(
    dest: &F,
    made_dirs: &DashSet<String>,
    p: &str,
    mode: FileMode,
    mtime: SystemTime,
) -> Result<()> {
    ops::mkdir_all(dest, p, mode)?;
    // mkdir_all is a no-op on an existing directory; apply the header
    // metadata regardless.
    ops::chmod(dest, p, mode)?;
    ops::chtimes(dest, p, mtime, mtime)?;
    made_dirs.insert(p.to_string());
    Ok(())
}

fn ensure_parent<F: Fs>(dest: &F, made_dirs: &DashSet<String>, p: &str) -> Result<()> {
    let parent = path::parent(p);
    if parent == path::ROOT || made_dirs.contains(parent) {
        return Ok(());
    }
    ops::mkdir_all(dest, parent, FileMode(0o755))?;
    made_dirs.insert(parent.to_string());
    Ok(())
}

/// Canonicalize a tar member name. `None` means the entry names the root
/// (`.` or `./`) and has nothing to materialize. Dot-dot is a hostile
/// archive and is rejected.
fn clean_entry_path(raw: &[u8]) -> Result<Option<String>> {
    let text = std::str::from_utf8(raw).map_err(|_| Error::Invalid)?;
    let mut parts = Vec::new();
    for comp in text.split('/') {
        match comp {
            "" | "." => {}
            ".." => return Err(Error::Invalid),
            comp => parts.push(comp),
        }
    }
    if parts.is_empty() {
        return Ok(None);
    }
    Ok(Some(parts.join("/")))
}

fn header_mode<R: Read>(entry: &tar::Entry<'_, R>) -> Result<u32> {
    entry.header().mode().map_err(Error::Io)
}

fn link_target<R: Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let raw = entry.link_name_bytes().ok_or(Error::Invalid)?;
    let text = std::str::from_utf8(&raw).map_err(|_| Error::Invalid)?;
    Ok(text.to_string())
}

impl<F: Fs> Fs for TarFs<F> {
    fn open(&self, p: &str) -> Result<Box<dyn File>> {
        self.dest.open(p)
    }

    fn open_file(&self, p: &str, flags: OpenFlags, mode: FileMode) -> Result<Box<dyn File>> {
        if flags.writable() || flags.contains(OpenFlags::CREATE) {
            return Err(Error::Permission);
        }
        self.dest.open_file(p, flags, mode)
    }

    fn read_dir(&self, p: &str) -> Result<Vec<DirEntry>> {
        self.dest.read_dir(p)
    }

    fn read_file(&self, p: &str) -> Result<Vec<u8>> {
        self.dest.read_file(p)
    }

    fn stat(&self, p: &str) -> Result<FileInfo> {
        self.dest.stat(p)
    }

    fn lstat(&self, p: &str) -> Result<FileInfo> {
        self.dest.lstat(p)
    }

    fn read_link(&self, p: &str) -> Result<String> {
        self.dest.read_link(p)
    }

    fn create(&self, _p: &str) -> Result<Box<dyn File>> {
        Err(Error::Permission)
    }

    fn mkdir(&self, _p: &str, _mode: FileMode) -> Result<()> {
        Err(Error::Permission)
    }

    fn mkdir_all(&self, _p: &str, _mode: FileMode) -> Result<()> {
        Err(Error::Permission)
    }

    fn write_file(&self, _p: &str, _data: &[u8], _mode: FileMode) -> Result<()> {
        Err(Error::Permission)
    }

    fn remove(&self, _p: &str) -> Result<()> {
        Err(Error::Permission)
    }

    fn remove_all(&self, _p: &str) -> Result<()> {
        Err(Error::Permission)
    }

    fn rename(&self, _old_path: &str, _new_path: &str) -> Result<()> {
        Err(Error::Permission)
    }

    fn chmod(&self, _p: &str, _mode: FileMode) -> Result<()> {
        Err(Error::Permission)
    }

    fn chown(&self, _p: &str, _uid: u32, _gid: u32) -> Result<()> {
        Err(Error::Permission)
    }

    fn chtimes(&self, _p: &str, _atime: SystemTime, _mtime: SystemTime) -> Result<()> {
        Err(Error::Permission)
    }

    fn symlink(&self, _target: &str, _link_path: &str) -> Result<()> {
        Err(Error::Permission)
    }
}
