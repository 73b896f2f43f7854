//! Public API: `read_matches`, `reset_one`, `reset_all`.
//!
//! Regexes are compiled once up front rather than per line matched.

use std::fs;
use std::io::{BufRead, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{exit_code, Error};
use crate::persist_store::PersistStore;
use crate::positioner::StreamPositioner;
use crate::user::{effective_user_name, is_root};

/// Row and byte caps keep one call bounded even against a log file with a
/// huge backlog; callers re-invoke to drain the rest (`partial` signals more
/// remains).
const MAX_MATCHED_ROWS: usize = 500;
const MAX_TOTAL_BYTES: usize = 60 * 1024;

const STATE_FILE_PREFIX: &str = "LogFileProvider_";

static STATE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"Value Name="(.*?)" Value="(.*)""#).unwrap());

/// One caller-supplied regex, labeled by the index the caller wants echoed
/// back in matched output.
pub struct QueryRegex {
    pub index: usize,
    pub pattern: String,
}

impl QueryRegex {
    pub fn new(index: usize, pattern: impl Into<String>) -> Self {
        Self { index, pattern: pattern.into() }
    }
}

pub struct Tailer<'s> {
    store: &'s dyn PersistStore,
}

impl<'s> Tailer<'s> {
    pub fn new(store: &'s dyn PersistStore) -> Self {
        Self { store }
    }

    /// Reads new lines appended since the last call for `(path, qid)`,
    /// returning lines matching at least one of `regexes` plus whether the
    /// read stopped at a cap with more input remaining.
    ///
    /// Output lines are `"<space-separated matching indices>;<line>"`. A
    /// trailing line with no terminator yet (the writer hasn't finished it)
    /// is deferred to the next call rather than emitted early.
    pub fn read_matches(
        &self,
        path: &Path,
        qid: &str,
        regexes: &[QueryRegex],
    ) -> Result<(Vec<String>, bool), Error> {
        let compiled: Vec<(usize, Regex)> = regexes
            .iter()
            .map(|r| Regex::new(&r.pattern).map(|re| (r.index, re)))
            .collect::<Result<_, regex::Error>>()?;

        let mut positioner = StreamPositioner::open(path, qid, self.store)?;

        let mut matched_lines = Vec::new();
        let mut matched_rows = 0usize;
        let mut total_bytes = 0usize;

        loop {
            if matched_rows >= MAX_MATCHED_ROWS || total_bytes >= MAX_TOTAL_BYTES {
                break;
            }
            if !stream_has_more(&mut positioner)? {
                break;
            }

            let start = positioner.reader_mut().stream_position()?;
            let mut raw = String::new();
            let n = positioner.reader_mut().read_line(&mut raw)?;
            if n == 0 {
                break;
            }
            if !raw.ends_with('\n') {
                // Partial trailing line: the writer may still be mid-append.
                // Defer it whole to the next call instead of stitching.
                positioner.reader_mut().seek(SeekFrom::Start(start))?;
                break;
            }
            raw.pop();
            if raw.ends_with('\r') {
                raw.pop();
            }

            let mut indices = Vec::new();
            for (index, regex) in &compiled {
                if regex.is_match(&raw) {
                    indices.push(index.to_string());
                }
            }

            if !indices.is_empty() {
                let entry = format!("{};{}", indices.join(" "), raw);
                total_bytes += entry.len();
                matched_lines.push(entry);
                matched_rows += 1;
            }
        }

        let partial = (matched_rows >= MAX_MATCHED_ROWS || total_bytes >= MAX_TOTAL_BYTES)
            && stream_has_more(&mut positioner)?;

        positioner.persist_state()?;
        Ok((matched_lines, partial))
    }

    /// Marks `(path, qid)` so the next open re-seeks rather than resuming
    /// from the saved position.
    ///
    /// `reset_on_read = false` ("forget backlog") additionally seeks to EOF
    /// right now. `reset_on_read = true` defers the re-seek to the next
    /// `read_matches`, which clears the flag itself once it honors it.
    pub fn reset_one(&self, path: &Path, qid: &str, reset_on_read: bool) -> Result<i32, Error> {
        let mut positioner = StreamPositioner::open(path, qid, self.store)?;

        if !reset_on_read {
            positioner.reader_mut().seek(SeekFrom::End(0))?;
        }

        positioner.record_mut().reset_on_read = reset_on_read;
        positioner.persist_state()?;
        Ok(0)
    }

    /// Resets every persisted record found under `base_path` (or its
    /// per-user subdirectory, unless the effective user is root). Never
    /// raises: failures are aggregated into the returned exit code, with
    /// the last non-zero code winning.
    pub fn reset_all(&self, base_path: &Path, reset_on_read: bool) -> i32 {
        let scan_dir = if is_root() {
            base_path.to_path_buf()
        } else {
            base_path.join(effective_user_name())
        };

        let mut exit_status = exit_code::SUCCESS;

        let entries = match fs::read_dir(&scan_dir) {
            Ok(read_dir) => {
                let mut collected = Vec::new();
                let mut enumeration_failed = false;
                for entry in read_dir {
                    match entry {
                        Ok(entry) => collected.push(entry),
                        Err(e) => {
                            tracing::warn!(dir = %scan_dir.display(), error = %e, "reset_all: enumeration failed");
                            enumeration_failed = true;
                            break;
                        }
                    }
                }
                if enumeration_failed {
                    exit_status = exit_code::EINTR;
                    Vec::new()
                } else {
                    collected
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(dir = %scan_dir.display(), "reset_all: base path not found");
                exit_status = exit_code::ENOENT;
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(dir = %scan_dir.display(), error = %e, "reset_all: unexpected enumeration error");
                exit_status = exit_code::EINTR;
                Vec::new()
            }
        };

        for entry in entries {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.to_ascii_lowercase().starts_with(&STATE_FILE_PREFIX.to_ascii_lowercase()) {
                continue;
            }

            let contents = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "reset_all: could not read state file");
                    exit_status = exit_code::EINTR;
                    continue;
                }
            };

            let (mut filename, mut qid) = (None::<String>, None::<String>);
            for line in contents.lines() {
                if let Some(caps) = STATE_LINE.captures(line) {
                    match &caps[1] {
                        "Filename" => filename = Some(caps[2].to_string()),
                        "QID" => qid = Some(caps[2].to_string()),
                        _ => {}
                    }
                }
            }

            if let (Some(filename), Some(qid)) = (filename, qid) {
                if filename.is_empty() || qid.is_empty() {
                    continue;
                }
                if let Err(e) = self.reset_one(Path::new(&filename), &qid, reset_on_read) {
                    tracing::warn!(filename, error = %e, "reset_all: failed to reset target");
                    exit_status = e.to_reset_exit_code();
                }
            }
        }

        exit_status
    }
}

fn stream_has_more(positioner: &mut StreamPositioner<'_>) -> Result<bool, Error> {
    Ok(!positioner.reader_mut().fill_buf()?.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist_store::{FileStore, MemoryStore};
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn append(path: &Path, contents: &str) {
        let mut f = fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn fresh_tail_then_append_is_seen_next_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "app.log", "A\nB\nC\n");
        let store = MemoryStore::new();
        let tailer = Tailer::new(&store);
        let regexes = vec![QueryRegex::new(0, ".*")];

        let (lines, partial) = tailer.read_matches(&path, "q1", &regexes).unwrap();
        assert!(lines.is_empty());
        assert!(!partial);

        append(&path, "D\nE\n");
        let (lines, partial) = tailer.read_matches(&path, "q1", &regexes).unwrap();
        assert_eq!(lines, vec!["0;D", "0;E"]);
        assert!(!partial);
    }

    #[test]
    fn multi_regex_labeling_concatenates_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "app.log", "");
        let store = MemoryStore::new();
        let tailer = Tailer::new(&store);

        // Establish a baseline at EOF (empty file) then append the line.
        tailer
            .read_matches(&path, "q1", &[QueryRegex::new(0, "foo")])
            .unwrap();
        append(&path, "foo bar\n");

        let regexes = vec![
            QueryRegex::new(0, "foo"),
            QueryRegex::new(1, "bar"),
            QueryRegex::new(2, "baz"),
        ];
        let (lines, partial) = tailer.read_matches(&path, "q1", &regexes).unwrap();
        assert_eq!(lines, vec!["0 1;foo bar"]);
        assert!(!partial);
    }

    #[test]
    fn caps_split_across_two_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "app.log", "");
        let store = MemoryStore::new();
        let tailer = Tailer::new(&store);
        tailer
            .read_matches(&path, "q1", &[QueryRegex::new(0, ".*")])
            .unwrap();

        let mut body = String::new();
        for i in 0..1000 {
            body.push_str(&format!("L{i:06}\n"));
        }
        append(&path, &body);

        let regexes = vec![QueryRegex::new(0, ".*")];
        let (first, partial) = tailer.read_matches(&path, "q1", &regexes).unwrap();
        assert_eq!(first.len(), 500);
        assert!(partial);

        let (second, partial) = tailer.read_matches(&path, "q1", &regexes).unwrap();
        assert_eq!(second.len(), 500);
        assert!(!partial);
    }

    #[test]
    fn partial_trailing_line_is_deferred_not_stitched() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "app.log", "");
        let store = MemoryStore::new();
        let tailer = Tailer::new(&store);
        tailer
            .read_matches(&path, "q1", &[QueryRegex::new(0, ".*")])
            .unwrap();

        append(&path, "complete line\nincomplete");
        let regexes = vec![QueryRegex::new(0, ".*")];
        let (lines, _) = tailer.read_matches(&path, "q1", &regexes).unwrap();
        assert_eq!(lines, vec!["0;complete line"]);

        append(&path, " line now done\n");
        let (lines, _) = tailer.read_matches(&path, "q1", &regexes).unwrap();
        assert_eq!(lines, vec!["0;incomplete line now done"]);
    }

    #[test]
    fn reset_one_forget_backlog_hides_prior_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "app.log", "old1\nold2\n");
        let store = MemoryStore::new();
        let tailer = Tailer::new(&store);

        assert_eq!(tailer.reset_one(&path, "q1", false).unwrap(), 0);
        append(&path, "new1\n");

        let regexes = vec![QueryRegex::new(0, ".*")];
        let (lines, _) = tailer.read_matches(&path, "q1", &regexes).unwrap();
        assert_eq!(lines, vec!["0;new1"]);
    }

    #[test]
    fn reset_one_reset_on_read_is_cleared_by_next_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "app.log", "old1\n");
        let store = MemoryStore::new();
        let tailer = Tailer::new(&store);

        tailer.reset_one(&path, "q1", true).unwrap();

        let id = crate::position_record::id_string_for(&path, "q1");
        let mut reader = store.reader(&id).unwrap();
        reader.consume_value("Filename").unwrap();
        reader.consume_value("QID").unwrap();
        assert_eq!(reader.consume_value("Reset").unwrap(), "1");

        append(&path, "new1\n");
        let regexes = vec![QueryRegex::new(0, ".*")];
        let (lines, _) = tailer.read_matches(&path, "q1", &regexes).unwrap();
        assert!(lines.is_empty());

        let mut reader = store.reader(&id).unwrap();
        reader.consume_value("Filename").unwrap();
        reader.consume_value("QID").unwrap();
        assert_eq!(reader.consume_value("Reset").unwrap(), "0");
    }

    #[test]
    fn reset_all_missing_base_dir_is_enoent() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let tailer = Tailer::new(&store);
        let missing = dir.path().join("does-not-exist");
        assert_eq!(tailer.reset_all(&missing, false), exit_code::ENOENT);
    }

    #[test]
    fn reset_all_reports_enoent_for_missing_target_but_continues() {
        let dir = tempfile::tempdir().unwrap();
        let base = if is_root() {
            dir.path().to_path_buf()
        } else {
            let p = dir.path().join(effective_user_name());
            fs::create_dir_all(&p).unwrap();
            p
        };

        let missing_log = dir.path().join("gone.log");
        let id = crate::position_record::id_string_for(&missing_log, "q1");
        let sanitized = id.replace('%', "%25").replace('/', "%2F");
        let state_path = base.join(sanitized);
        fs::write(
            &state_path,
            format!(
                "version = 1\nValue Name=\"Filename\" Value=\"{}\"\nValue Name=\"QID\" Value=\"q1\"\nValue Name=\"Reset\" Value=\"0\"\nValue Name=\"Pos\" Value=\"0\"\nGroup Name=\"Stat\"\n  Value Name=\"StIno\" Value=\"0\"\n  Value Name=\"StSize\" Value=\"0\"\nEndGroup\n",
                missing_log.display()
            ),
        )
        .unwrap();

        let store = FileStore::new(dir.path());
        let tailer = Tailer::new(&store);
        assert_eq!(tailer.reset_all(dir.path(), false), exit_code::ENOENT);
    }

    #[test]
    fn reset_all_resets_a_real_target_discovered_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let base = if is_root() {
            dir.path().to_path_buf()
        } else {
            let p = dir.path().join(effective_user_name());
            fs::create_dir_all(&p).unwrap();
            p
        };

        let log_path = write_file(&dir, "app.log", "a\nb\n");
        let store = FileStore::new(&base);
        let tailer = Tailer::new(&store);
        tailer
            .read_matches(&log_path, "q1", &[QueryRegex::new(0, ".*")])
            .unwrap();

        assert_eq!(tailer.reset_all(dir.path(), false), exit_code::SUCCESS);
    }
}
