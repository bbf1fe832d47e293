//! Shared constructors for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use stratafs::kv::{KvFs, KvOptions, MemoryStore};
use stratafs::Fs;

/// A fresh memory-backed filesystem with the default chunk size.
pub fn kv_fs() -> Arc<dyn Fs> {
    Arc::new(KvFs::new().expect("init kv fs"))
}

/// A fresh filesystem with a tiny chunk size, so small files span many
/// chunks.
pub fn kv_fs_with_chunk(chunk_size: usize) -> Arc<dyn Fs> {
    let fs = KvFs::with_options(MemoryStore::new(), KvOptions { chunk_size })
        .expect("init kv fs");
    Arc::new(fs)
}

/// Install a test subscriber once; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
