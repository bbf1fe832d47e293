use thiserror::Error;

/// Errors produced by filesystems and files.
///
/// Backends return bare causes; the dispatcher wraps them exactly once in
/// [`Error::Op`] with the operation name and canonical path. Compare errors
/// with [`Error::kind`], which looks through the wrapper.
#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists")]
    Exist,

    #[error("file does not exist")]
    NotExist,

    #[error("not a directory")]
    NotDir,

    #[error("is a directory")]
    IsDir,

    #[error("permission denied")]
    Permission,

    #[error("invalid argument")]
    Invalid,

    #[error("file already closed")]
    Closed,

    #[error("short write")]
    ShortWrite,

    #[error("short buffer")]
    ShortBuffer,

    #[error("operation not implemented")]
    NotImplemented,

    /// An operation error: (op, path, cause). Only the dispatcher builds these.
    #[error("{op} {path}: {source}")]
    Op {
        op: &'static str,
        path: String,
        #[source]
        source: Box<Error>,
    },

    /// A backend-specific cause with no canonical kind, e.g. "directory not empty".
    #[error("{0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The canonical kind of an [`Error`], ignoring any op/path wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Exist,
    NotExist,
    NotDir,
    IsDir,
    Permission,
    Invalid,
    Closed,
    ShortWrite,
    ShortBuffer,
    NotImplemented,
    Other,
}

impl Error {
    /// The innermost cause, unwrapping [`Error::Op`] layers.
    pub fn cause(&self) -> &Error {
        let mut err = self;
        while let Error::Op { source, .. } = err {
            err = source;
        }
        err
    }

    /// The canonical kind of the innermost cause.
    pub fn kind(&self) -> ErrorKind {
        match self.cause() {
            Error::Exist => ErrorKind::Exist,
            Error::NotExist => ErrorKind::NotExist,
            Error::NotDir => ErrorKind::NotDir,
            Error::IsDir => ErrorKind::IsDir,
            Error::Permission => ErrorKind::Permission,
            Error::Invalid => ErrorKind::Invalid,
            Error::Closed => ErrorKind::Closed,
            Error::ShortWrite => ErrorKind::ShortWrite,
            Error::ShortBuffer => ErrorKind::ShortBuffer,
            Error::NotImplemented => ErrorKind::NotImplemented,
            Error::Op { .. } | Error::Backend(_) | Error::Io(_) => ErrorKind::Other,
        }
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }

    /// Wrap a bare cause with op and path. Already-wrapped errors pass through
    /// unchanged so the dispatcher boundary wraps at most once.
    pub(crate) fn op(op: &'static str, path: &str, source: Error) -> Error {
        match source {
            wrapped @ Error::Op { .. } => wrapped,
            source => Error::Op {
                op,
                path: path.to_string(),
                source: Box::new(source),
            },
        }
    }

    /// Rewrite every wrapped path with `f`. Used by decorators to report
    /// errors in their own namespace.
    pub(crate) fn map_paths(self, f: impl Fn(&str) -> String + Copy) -> Error {
        match self {
            Error::Op { op, path, source } => Error::Op {
                op,
                path: f(&path),
                source: Box::new(source.map_paths(f)),
            },
            err => err,
        }
    }

    /// The wrapped path, if this error carries one.
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::Op { path, .. } => Some(path),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
