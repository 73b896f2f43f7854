//! Extracts a log file path from one fixed query shape.
//!
//! The real query-language parser lives outside this crate; this is a thin
//! stand-in covering the one shape callers pass in practice.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::Error;

// Compiled once, not per call rather than recompiled on every invocation.
static QUERY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^SELECT \* FROM SCX_LogFileRecord WHERE FileName=(?P<path>.+)$").unwrap()
});

/// Extracts the `FileName` parameter from a query of the form
/// `SELECT * FROM SCX_LogFileRecord WHERE FileName=<PATH>`.
///
/// Fails with [`Error::NotSupported`] if `query` doesn't match that shape.
pub fn extract_path(query: &str) -> Result<PathBuf, Error> {
    let caps = QUERY_PATTERN
        .captures(query)
        .ok_or_else(|| Error::NotSupported { query: query.to_string() })?;
    Ok(PathBuf::from(&caps["path"]))
}
