//! Crate-wide error type.
//!
//! Folds the handful of distinct failure kinds this crate can hit into one
//! enum so callers - in particular `Tailer::reset_all` - can match on the
//! *kind* of failure and decide an exit code.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("log file not found: {path}")]
    FilePathNotFound { path: PathBuf },

    #[error("query not on expected format: {query}")]
    NotSupported { query: String },

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("persistence error: {0}")]
    Persist(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),
}

/// POSIX-ish exit codes `reset_all` aggregates: `ENOENT` when a referenced
/// log (or the base directory) is missing, `EINTR` for any other failure,
/// `0` on full success. The last non-zero code wins.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const ENOENT: i32 = libc_enoent();
    pub const EINTR: i32 = libc_eintr();

    // Avoid a dependency on `libc` purely for two well-known POSIX constants;
    // these values are stable across every platform this crate targets.
    const fn libc_enoent() -> i32 {
        2
    }

    const fn libc_eintr() -> i32 {
        4
    }
}

impl Error {
    /// Maps this error to the exit code `reset_all`/`reset_one` report for a
    /// single target: `ENOENT` if the log file (or state directory) is
    /// missing, `EINTR` for anything else.
    pub fn to_reset_exit_code(&self) -> i32 {
        match self {
            Error::FilePathNotFound { .. } => exit_code::ENOENT,
            _ => exit_code::EINTR,
        }
    }
}
