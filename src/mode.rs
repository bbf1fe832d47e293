//! File modes and types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 32-bit file mode: permission bits in the low 9 bits, setuid/setgid/
/// sticky, and a mutually exclusive file-type tag in the high bits. A mode
/// with no tag bit set describes a regular file.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileMode(pub u32);

impl FileMode {
    pub const DIR: FileMode = FileMode(1 << 31);
    pub const SYMLINK: FileMode = FileMode(1 << 27);
    pub const DEVICE: FileMode = FileMode(1 << 26);
    pub const NAMED_PIPE: FileMode = FileMode(1 << 25);
    pub const SOCKET: FileMode = FileMode(1 << 24);
    pub const SETUID: FileMode = FileMode(1 << 23);
    pub const SETGID: FileMode = FileMode(1 << 22);
    pub const CHAR_DEVICE: FileMode = FileMode(1 << 21);
    pub const STICKY: FileMode = FileMode(1 << 20);
    pub const IRREGULAR: FileMode = FileMode(1 << 19);

    /// All file-type tag bits.
    pub const TYPE_MASK: FileMode = FileMode(
        Self::DIR.0
            | Self::SYMLINK.0
            | Self::DEVICE.0
            | Self::NAMED_PIPE.0
            | Self::SOCKET.0
            | Self::CHAR_DEVICE.0
            | Self::IRREGULAR.0,
    );

    /// The nine permission bits.
    pub const PERM_MASK: FileMode = FileMode(0o777);

    pub fn bits(self) -> u32 {
        self.0
    }

    /// The permission bits only.
    pub fn perm(self) -> FileMode {
        self & Self::PERM_MASK
    }

    pub fn contains(self, other: FileMode) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_dir(self) -> bool {
        self.contains(Self::DIR)
    }

    pub fn is_symlink(self) -> bool {
        self.contains(Self::SYMLINK)
    }

    pub fn is_regular(self) -> bool {
        self.0 & Self::TYPE_MASK.0 == 0
    }

    pub fn file_type(self) -> FileType {
        FileType::from_mode(self)
    }
}

impl std::ops::BitOr for FileMode {
    type Output = FileMode;
    fn bitor(self, rhs: FileMode) -> FileMode {
        FileMode(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for FileMode {
    type Output = FileMode;
    fn bitand(self, rhs: FileMode) -> FileMode {
        FileMode(self.0 & rhs.0)
    }
}

impl std::ops::Not for FileMode {
    type Output = FileMode;
    fn not(self) -> FileMode {
        FileMode(!self.0)
    }
}

impl fmt::Debug for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileMode({:#o})", self.0)
    }
}

/// The file-type tag of a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Regular,
    Dir,
    Symlink,
    NamedPipe,
    Socket,
    Device,
    CharDevice,
    Irregular,
}

impl FileType {
    pub fn from_mode(mode: FileMode) -> FileType {
        if mode.contains(FileMode::DIR) {
            FileType::Dir
        } else if mode.contains(FileMode::SYMLINK) {
            FileType::Symlink
        } else if mode.contains(FileMode::NAMED_PIPE) {
            FileType::NamedPipe
        } else if mode.contains(FileMode::SOCKET) {
            FileType::Socket
        } else if mode.contains(FileMode::CHAR_DEVICE) {
            FileType::CharDevice
        } else if mode.contains(FileMode::DEVICE) {
            FileType::Device
        } else if mode.contains(FileMode::IRREGULAR) {
            FileType::Irregular
        } else {
            FileType::Regular
        }
    }

    pub fn is_dir(self) -> bool {
        self == FileType::Dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_exclusive_of_perms() {
        let mode = FileMode::DIR | FileMode(0o755);
        assert!(mode.is_dir());
        assert_eq!(mode.perm(), FileMode(0o755));
        assert_eq!(mode.file_type(), FileType::Dir);
    }

    #[test]
    fn regular_has_no_tag() {
        let mode = FileMode(0o644);
        assert!(mode.is_regular());
        assert_eq!(mode.file_type(), FileType::Regular);
        assert!(!mode.is_symlink());
    }

    #[test]
    fn char_device_wins_over_device_bit() {
        let mode = FileMode::DEVICE | FileMode::CHAR_DEVICE;
        assert_eq!(mode.file_type(), FileType::CharDevice);
    }
}
