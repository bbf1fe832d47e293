//! Conformance runs for every writable backend composition.

mod helpers;

use std::sync::Arc;

use stratafs::conformance::{self, FsOptions};
use stratafs::mount::MountFs;
use stratafs::{ops, FileMode};

fn assert_no_skips(data: conformance::TestData) {
    assert!(data.skips.is_empty(), "unexpected skips: {:?}", data.skips);
}

#[test]
fn kv_fs() {
    helpers::init_tracing();
    let options = FsOptions::from_factory("kv", helpers::kv_fs);
    assert_no_skips(conformance::run_fs(&options));
    assert_no_skips(conformance::run_file(&options));
}

/// Four-byte chunks force every operation through multi-chunk paths.
#[test]
fn kv_fs_small_chunks() {
    helpers::init_tracing();
    let options = FsOptions::from_factory("kv_chunk4", || helpers::kv_fs_with_chunk(4));
    assert_no_skips(conformance::run_fs(&options));
    assert_no_skips(conformance::run_file(&options));
}

/// A sub-filesystem forwards the full capability set of its parent.
#[test]
fn sub_fs() {
    helpers::init_tracing();
    let options = FsOptions::from_factory("sub", || {
        let parent = helpers::kv_fs();
        ops::mkdir_all(&*parent, "mnt/inner", FileMode(0o755)).unwrap();
        ops::sub(parent, "mnt/inner").unwrap()
    });
    assert_no_skips(conformance::run_fs(&options));
    assert_no_skips(conformance::run_file(&options));
}

/// A mount composition behaves like its base where no mount applies.
#[test]
fn mount_fs() {
    helpers::init_tracing();
    let options = FsOptions::from_factory("mount", || {
        let fs = MountFs::new(helpers::kv_fs());
        fs.add_mount("attached", helpers::kv_fs()).unwrap();
        Arc::new(fs)
    });
    assert_no_skips(conformance::run_fs(&options));
    assert_no_skips(conformance::run_file(&options));
}
