//! stratafs: a portable virtual filesystem framework.
//!
//! Heterogeneous storage backends sit behind one composable contract: a
//! backend advertises [capabilities](Fs) by implementing them, and the
//! [dispatcher](ops) routes client calls to primitives or synthesizes the
//! derived operations. Ships with a [key-value backed filesystem](kv::KvFs)
//! over any transactional ordered store, a [tar-unpacking read-only
//! filesystem](tarfs::TarFs), prefix and mount decorators, and a
//! [conformance suite](conformance) that is the contract in executable
//! form.

pub mod attr;
pub mod blob;
pub mod conformance;
pub mod error;
pub mod fs;
pub mod kv;
pub mod mode;
pub mod mount;
pub mod ops;
pub mod path;
pub mod subfs;
pub mod tarfs;

pub use attr::{DirEntry, FileInfo};
pub use blob::{Blob, Bytes};
pub use error::{Error, ErrorKind, Result};
pub use fs::{File, Fs, OpenFlags, MAX_SYMLINK_HOPS};
pub use mode::{FileMode, FileType};
pub use mount::MountFs;
pub use subfs::SubFs;
