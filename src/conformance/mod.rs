//! The conformance suite: a parameterized, executable form of the
//! filesystem contract.
//!
//! Point [`FsOptions`] at a backend factory and call [`run_fs`] and
//! [`run_file`] from a test. Sub-tests run in parallel, each against a
//! fresh filesystem; a primitive answering `NotImplemented` records a
//! skip instead of a failure, and the skip list comes back in
//! [`TestData`] for compliance reporting.

mod file_tests;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::fs::Fs;
use crate::mode::FileMode;

/// Commits a setup filesystem's contents, producing the FS under test.
pub type CommitFn = Box<dyn FnOnce() -> Arc<dyn Fs> + Send>;

/// Produces a fresh setup filesystem and a commit function per sub-test.
///
/// Writable targets usually return the same filesystem from both; a
/// read-only target stages files on the setup FS and builds the real
/// target in commit.
pub trait TestSetup: Send + Sync {
    fn fs(&self) -> (Arc<dyn Fs>, CommitFn);
}

impl<G> TestSetup for G
where
    G: Fn() -> (Arc<dyn Fs>, CommitFn) + Send + Sync,
{
    fn fs(&self) -> (Arc<dyn Fs>, CommitFn) {
        self()
    }
}

/// Loosen specific assertions for backends with non-standard behavior.
/// Leave at default unless the host system forces your hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct Constraints {
    /// Mode bits excluded from mode assertions.
    pub file_mode_mask: FileMode,
    /// Accept an arbitrary prefix on error paths.
    pub allow_err_path_prefix: bool,
}

/// Details of the current sub-test, for skip decisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Facets {
    /// Full sub-test name, e.g. `kv_fs.mkdir_all`.
    pub name: String,
}

/// Metadata from a suite run.
#[derive(Debug, Default)]
pub struct TestData {
    /// Every skipped sub-test. A standard backend skips (almost) nothing.
    pub skips: Vec<Facets>,
}

type ShouldSkip = dyn Fn(&Facets) -> bool + Send + Sync;

/// Configuration for a conformance run.
pub struct FsOptions {
    pub name: String,
    pub setup: Arc<dyn TestSetup>,
    pub constraints: Constraints,
    pub should_skip: Option<Arc<ShouldSkip>>,
}

impl FsOptions {
    pub fn new(name: impl Into<String>, setup: impl TestSetup + 'static) -> FsOptions {
        FsOptions {
            name: name.into(),
            setup: Arc::new(setup),
            constraints: Constraints::default(),
            should_skip: None,
        }
    }

    /// The common case: one writable filesystem serves as both the setup
    /// FS and the FS under test.
    pub fn from_factory(
        name: impl Into<String>,
        factory: impl Fn() -> Arc<dyn Fs> + Send + Sync + 'static,
    ) -> FsOptions {
        Self::new(name, move || {
            let fs = factory();
            let committed = fs.clone();
            let commit: CommitFn = Box::new(move || committed);
            (fs, commit)
        })
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> FsOptions {
        self.constraints = constraints;
        self
    }

    pub fn with_should_skip(
        mut self,
        should_skip: impl Fn(&Facets) -> bool + Send + Sync + 'static,
    ) -> FsOptions {
        self.should_skip = Some(Arc::new(should_skip));
        self
    }
}

/// Run the path-level suite: every filesystem operation plus concurrent
/// variants. Panics with the collected failures if any sub-test fails.
pub fn run_fs(options: &FsOptions) -> TestData {
    run_suite(options, fs_tests::FS_TESTS)
}

/// Run the open-handle suite: every file operation plus concurrent
/// variants. Panics with the collected failures if any sub-test fails.
pub fn run_file(options: &FsOptions) -> TestData {
    run_suite(options, file_tests::FILE_TESTS)
}

/// A sub-test's view of the run: fresh filesystems and constraint-aware
/// assertions.
pub(crate) struct TestCase<'o> {
    options: &'o FsOptions,
}

impl TestCase<'_> {
    /// A fresh setup FS and its commit function.
    pub fn setup(&self) -> (Arc<dyn Fs>, CommitFn) {
        self.options.setup.fs()
    }

    /// A fresh FS under test with nothing prepared.
    pub fn fs(&self) -> Arc<dyn Fs> {
        let (_, commit) = self.setup();
        commit()
    }

    /// Assert mode equality under the configured mode mask.
    pub fn assert_mode(&self, got: FileMode, want: FileMode, context: &str) {
        let mask = !self.options.constraints.file_mode_mask;
        assert_eq!(got & mask, want & mask, "{context}: mode mismatch");
    }

    /// Assert the error's wrapped path under the path-prefix constraint.
    pub fn assert_err_path(&self, err: &Error, want: &str) {
        let got = err.path().unwrap_or("");
        if self.options.constraints.allow_err_path_prefix {
            assert!(
                got.ends_with(want),
                "error path {got:?} does not end with {want:?}"
            );
        } else {
            assert_eq!(got, want, "error path mismatch");
        }
    }
}

/// A sub-test that wants to be skipped rather than failed.
pub(crate) struct Skip(pub String);

pub(crate) type TestResult = std::result::Result<(), Skip>;

/// Unwrap an operation a sub-test depends on. `NotImplemented` becomes a
/// skip; any other error is a failure.
pub(crate) fn want<T>(op: &str, result: Result<T>) -> std::result::Result<T, Skip> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.kind() == ErrorKind::NotImplemented => Err(Skip(format!("{op}: {e}"))),
        Err(e) => panic!("{op}: unexpected error: {e}"),
    }
}

pub(crate) type SubTest = (&'static str, fn(&TestCase) -> TestResult);

fn run_suite(options: &FsOptions, tests: &[SubTest]) -> TestData {
    let skips = Mutex::new(Vec::new());
    let failures = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for (name, test) in tests {
            let facets = Facets {
                name: format!("{}.{}", options.name, name),
            };
            if let Some(should_skip) = &options.should_skip {
                if should_skip(&facets) {
                    debug!("skipping {} by request", facets.name);
                    skips.lock().push(facets);
                    continue;
                }
            }
            let skips = &skips;
            let failures = &failures;
            scope.spawn(move || {
                let case = TestCase { options };
                match catch_unwind(AssertUnwindSafe(|| test(&case))) {
                    Ok(Ok(())) => {}
                    Ok(Err(Skip(reason))) => {
                        debug!("skipped {}: {}", facets.name, reason);
                        skips.lock().push(facets);
                    }
                    Err(panic) => {
                        failures
                            .lock()
                            .push(format!("{}: {}", facets.name, panic_message(&panic)));
                    }
                }
            });
        }
    });

    let failures = failures.into_inner();
    if !failures.is_empty() {
        panic!(
            "{} conformance failure(s):\n  {}",
            failures.len(),
            failures.join("\n  ")
        );
    }
    TestData {
        skips: skips.into_inner(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic".to_string()
    }
}
