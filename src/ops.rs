//! The dispatcher: every filesystem operation as a free function.
//!
//! Each function validates the path, calls the backend primitive, and on
//! `NotImplemented` synthesizes the operation from lower-level capabilities
//! where a derived composition exists. Errors leave this layer wrapped
//! exactly once with the operation name and canonical path.

use std::sync::Arc;
use std::time::SystemTime;

use crate::attr::{DirEntry, FileInfo};
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{File, Fs, OpenFlags, MAX_SYMLINK_HOPS};
use crate::mode::FileMode;
use crate::path;
use crate::subfs::SubFs;

fn check_path(op: &'static str, p: &str) -> Result<()> {
    if path::is_valid(p) {
        Ok(())
    } else {
        Err(Error::op(op, p, Error::Invalid))
    }
}

fn not_implemented(err: &Error) -> bool {
    err.kind() == ErrorKind::NotImplemented
}

/// Open the named file for reading.
pub fn open(fs: &dyn Fs, p: &str) -> Result<Box<dyn File>> {
    check_path("open", p)?;
    open_inner(fs, p).map_err(|e| Error::op("open", p, e))
}

fn open_inner(fs: &dyn Fs, p: &str) -> Result<Box<dyn File>> {
    match fs.open(p) {
        Err(e) if not_implemented(&e) => fs.open_file(p, OpenFlags::READ_ONLY, FileMode(0)),
        r => r,
    }
}

/// Open with explicit flags and creation mode.
pub fn open_file(fs: &dyn Fs, p: &str, flags: OpenFlags, mode: FileMode) -> Result<Box<dyn File>> {
    check_path("open_file", p)?;
    fs.open_file(p, flags, mode)
        .map_err(|e| Error::op("open_file", p, e))
}

/// Create or truncate the named file, open read-write with mode 0o666.
pub fn create(fs: &dyn Fs, p: &str) -> Result<Box<dyn File>> {
    check_path("create", p)?;
    let r = match fs.create(p) {
        Err(e) if not_implemented(&e) => fs.open_file(
            p,
            OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            FileMode(0o666),
        ),
        r => r,
    };
    r.map_err(|e| Error::op("create", p, e))
}

pub fn mkdir(fs: &dyn Fs, p: &str, mode: FileMode) -> Result<()> {
    check_path("mkdir", p)?;
    fs.mkdir(p, mode).map_err(|e| Error::op("mkdir", p, e))
}

/// Create a directory and any missing ancestors. An existing directory at
/// any level is success; an existing non-directory is `NotDir`.
pub fn mkdir_all(fs: &dyn Fs, p: &str, mode: FileMode) -> Result<()> {
    check_path("mkdir_all", p)?;
    let r = match fs.mkdir_all(p, mode) {
        Err(e) if not_implemented(&e) => mkdir_all_inner(fs, p, mode),
        r => r,
    };
    r.map_err(|e| Error::op("mkdir_all", p, e))
}

fn mkdir_all_inner(fs: &dyn Fs, p: &str, mode: FileMode) -> Result<()> {
    match stat_inner(fs, p) {
        Ok(info) if info.is_dir() => return Ok(()),
        Ok(_) => return Err(Error::NotDir),
        Err(e) if e.kind() == ErrorKind::NotExist => {}
        Err(e) => return Err(e),
    }
    let parent = path::parent(p);
    if parent != path::ROOT {
        mkdir_all_inner(fs, parent, mode)?;
    }
    match fs.mkdir(p, mode) {
        // Lost a race to a concurrent creator; a directory there is fine.
        Err(e) if e.kind() == ErrorKind::Exist => match stat_inner(fs, p) {
            Ok(info) if info.is_dir() => Ok(()),
            Ok(_) => Err(Error::NotDir),
            Err(e) => Err(e),
        },
        r => r,
    }
}

/// List a directory, sorted by name.
pub fn read_dir(fs: &dyn Fs, p: &str) -> Result<Vec<DirEntry>> {
    check_path("read_dir", p)?;
    let mut entries = read_dir_inner(fs, p).map_err(|e| Error::op("read_dir", p, e))?;
    entries.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(entries)
}

fn read_dir_inner(fs: &dyn Fs, p: &str) -> Result<Vec<DirEntry>> {
    match fs.read_dir(p) {
        Err(e) if not_implemented(&e) => {
            let mut file = open_inner(fs, p)?;
            let r = file.read_dir(0);
            let _ = file.close();
            r
        }
        r => r,
    }
}

/// Read the whole named file.
pub fn read_file(fs: &dyn Fs, p: &str) -> Result<Vec<u8>> {
    check_path("read_file", p)?;
    let r = match fs.read_file(p) {
        Err(e) if not_implemented(&e) => read_file_inner(fs, p),
        r => r,
    };
    r.map_err(|e| Error::op("read_file", p, e))
}

fn read_file_inner(fs: &dyn Fs, p: &str) -> Result<Vec<u8>> {
    let mut file = open_inner(fs, p)?;
    let size = file.stat().map(|info| info.size() as usize).unwrap_or(0);
    let mut data = Vec::with_capacity(size);
    let mut buf = [0u8; 8192];
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => data.extend_from_slice(&buf[..n]),
            Err(e) => {
                let _ = file.close();
                return Err(e);
            }
        }
    }
    file.close()?;
    Ok(data)
}

/// Write `data` to the named file, creating or truncating it.
pub fn write_file(fs: &dyn Fs, p: &str, data: &[u8], mode: FileMode) -> Result<()> {
    check_path("write_file", p)?;
    let r = match fs.write_file(p, data, mode) {
        Err(e) if not_implemented(&e) => write_file_inner(fs, p, data, mode),
        r => r,
    };
    r.map_err(|e| Error::op("write_file", p, e))
}

fn write_file_inner(fs: &dyn Fs, p: &str, data: &[u8], mode: FileMode) -> Result<()> {
    let mut file = fs.open_file(
        p,
        OpenFlags::WRITE_ONLY | OpenFlags::CREATE | OpenFlags::TRUNCATE,
        mode,
    )?;
    let mut written = 0;
    while written < data.len() {
        match file.write(&data[written..]) {
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
    file.close()
}

pub fn remove(fs: &dyn Fs, p: &str) -> Result<()> {
    check_path("remove", p)?;
    fs.remove(p).map_err(|e| Error::op("remove", p, e))
}

/// Remove a path and everything under it. A missing path is success.
pub fn remove_all(fs: &dyn Fs, p: &str) -> Result<()> {
    check_path("remove_all", p)?;
    let r = match fs.remove_all(p) {
        Err(e) if not_implemented(&e) => remove_all_inner(fs, p),
        r => r,
    };
    r.map_err(|e| Error::op("remove_all", p, e))
}

fn remove_all_inner(fs: &dyn Fs, p: &str) -> Result<()> {
    let info = match lstat_inner(fs, p) {
        Err(e) if e.kind() == ErrorKind::NotExist => return Ok(()),
        r => r?,
    };
    if info.is_dir() {
        for entry in read_dir_inner(fs, p)? {
            remove_all_inner(fs, &path::join(p, entry.name()))?;
        }
    }
    match fs.remove(p) {
        Err(e) if e.kind() == ErrorKind::NotExist => Ok(()),
        r => r,
    }
}

/// Rename `old_path` to `new_path`. Only a backend primitive; there is no
/// derived composition, so the operation is atomic wherever it succeeds.
pub fn rename(fs: &dyn Fs, old_path: &str, new_path: &str) -> Result<()> {
    check_path("rename", old_path)?;
    check_path("rename", new_path)?;
    fs.rename(old_path, new_path)
        .map_err(|e| Error::op("rename", old_path, e))
}

/// Stat the named entity, following symbolic links.
pub fn stat(fs: &dyn Fs, p: &str) -> Result<FileInfo> {
    check_path("stat", p)?;
    stat_inner(fs, p).map_err(|e| Error::op("stat", p, e))
}

fn stat_inner(fs: &dyn Fs, p: &str) -> Result<FileInfo> {
    match fs.stat(p) {
        Err(e) if not_implemented(&e) => follow_links(fs, p),
        r => r,
    }
}

fn follow_links(fs: &dyn Fs, p: &str) -> Result<FileInfo> {
    let mut current = p.to_string();
    for _ in 0..MAX_SYMLINK_HOPS {
        let info = fs.lstat(&current)?;
        if !info.mode().is_symlink() {
            return Ok(info);
        }
        let target = fs.read_link(&current)?;
        current = path::resolve(path::parent(&current), &target)?;
    }
    Err(Error::Invalid)
}

/// Stat without following a final symbolic link.
pub fn lstat(fs: &dyn Fs, p: &str) -> Result<FileInfo> {
    check_path("lstat", p)?;
    lstat_inner(fs, p).map_err(|e| Error::op("lstat", p, e))
}

fn lstat_inner(fs: &dyn Fs, p: &str) -> Result<FileInfo> {
    match fs.lstat(p) {
        // No lstat capability: fall back to stat. Backends without symlinks
        // behave identically either way.
        Err(e) if not_implemented(&e) => fs.stat(p),
        r => r,
    }
}

pub fn chmod(fs: &dyn Fs, p: &str, mode: FileMode) -> Result<()> {
    check_path("chmod", p)?;
    fs.chmod(p, mode).map_err(|e| Error::op("chmod", p, e))
}

pub fn chown(fs: &dyn Fs, p: &str, uid: u32, gid: u32) -> Result<()> {
    check_path("chown", p)?;
    fs.chown(p, uid, gid).map_err(|e| Error::op("chown", p, e))
}

pub fn chtimes(fs: &dyn Fs, p: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
    check_path("chtimes", p)?;
    fs.chtimes(p, atime, mtime)
        .map_err(|e| Error::op("chtimes", p, e))
}

/// Create a symbolic link at `link_path` pointing at `target`.
pub fn symlink(fs: &dyn Fs, target: &str, link_path: &str) -> Result<()> {
    check_path("symlink", link_path)?;
    fs.symlink(target, link_path)
        .map_err(|e| Error::op("symlink", link_path, e))
}

pub fn read_link(fs: &dyn Fs, p: &str) -> Result<String> {
    check_path("read_link", p)?;
    fs.read_link(p).map_err(|e| Error::op("read_link", p, e))
}

/// Narrow a filesystem to the subtree rooted at `dir`.
pub fn sub(fs: Arc<dyn Fs>, dir: &str) -> Result<Arc<dyn Fs>> {
    check_path("sub", dir)?;
    match fs.sub(dir) {
        Ok(sub) => Ok(Arc::from(sub)),
        Err(e) if not_implemented(&e) => Ok(Arc::new(SubFs::new(fs, dir)?)),
        Err(e) => Err(Error::op("sub", dir, e)),
    }
}
