//! Log-file tailer with persistent resume state and rotation detection.
//!
//! Given a log file path and a caller-supplied query identifier (QID),
//! [`tailer::Tailer::read_matches`] yields the new lines appended since the
//! last invocation that match any of a supplied set of regular expressions,
//! persisting enough state to resume exactly where it left off - even across
//! process restarts and log rotation.

pub mod config;
pub mod error;
pub mod persist_store;
pub mod position_record;
pub mod positioner;
pub mod query_adapter;
pub mod tailer;
pub mod user;

pub use error::Error;
pub use tailer::{QueryRegex, Tailer};
