//! Error taxonomy for the index subsystem.
//!
//! Every public entry point returns `Result<_, IbisError>`; internal helpers
//! inherited from bit-twiddling code may still bubble up `anyhow::Error`
//! (e.g. word-packing arithmetic in [`crate::bitvector`]), but it is always
//! converted to [`IbisError::Programmer`] or [`IbisError::Input`] before it
//! reaches a caller of this crate.

use std::path::PathBuf;

use thiserror::Error;

/// The error kinds an index operation can report.
///
/// The policy column documents what the factory and caller are expected to
/// do with each kind; it is not enforced by the type itself.
#[derive(Error, Debug)]
pub enum IbisError {
    /// Unrecognized index spec, unsupported column type, or a refused
    /// build (`spec` tokens `none`/`noindex`/`null`). Caller falls back to
    /// a full scan.
    #[error("invalid index input: {0}")]
    Input(String),

    /// Header mismatch, truncated file, or offset out of range. Callers
    /// should delete the file and rebuild from the source column.
    #[error("index file {path} failed integrity check: {reason}")]
    Integrity { path: PathBuf, reason: String },

    /// Open/read/mmap failure. Recoverable: the caller may retry, switch
    /// store kinds, or abandon the query.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Out of memory (or another resource limit) during build.
    #[error("resource exhausted while building index: {0}")]
    Resource(String),

    /// The caller marked the query cancelled.
    #[error("query cancelled")]
    Cancelled,

    /// An invariant the index itself is responsible for was violated (for
    /// example two bitvectors combined with mismatched length). Per the
    /// source's policy this is logged and execution continues with the
    /// declared row count; it is surfaced here only for callers that want
    /// to observe it.
    #[error("internal invariant violated: {0}")]
    Programmer(String),
}

impl IbisError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IbisError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn integrity(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IbisError::Integrity {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether an automatic rebuild from the source column is the
    /// documented recovery policy for this error.
    pub fn triggers_rebuild(&self) -> bool {
        matches!(self, IbisError::Integrity { .. })
    }
}

impl From<anyhow::Error> for IbisError {
    fn from(e: anyhow::Error) -> Self {
        IbisError::Programmer(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IbisError>;
