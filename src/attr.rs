//! File metadata snapshots and directory entries.

use std::time::SystemTime;

use crate::mode::{FileMode, FileType};

/// An immutable metadata snapshot. The mode's file-type tag matches the tag
/// of the named entity at the moment of capture.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    name: String,
    size: u64,
    mode: FileMode,
    modified: SystemTime,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, size: u64, mode: FileMode, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            size,
            mode,
            modified,
        }
    }

    /// The last component of the path this info was captured for.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }
}

/// A directory listing entry: name, type tag, and the info captured when the
/// entry was read. Entries are self-consistent at capture time only; they do
/// not stay consistent with each other or with later directory mutations.
#[derive(Debug, Clone)]
pub struct DirEntry {
    name: String,
    file_type: FileType,
    info: FileInfo,
}

impl DirEntry {
    pub fn from_info(info: FileInfo) -> Self {
        Self {
            name: info.name().to_string(),
            file_type: info.mode().file_type(),
            info,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn info(&self) -> FileInfo {
        self.info.clone()
    }
}
