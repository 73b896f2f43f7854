//! Keyed blob store used to persist [`crate::position_record::PositionRecord`]s.
//!
//! The wire format is fixed, not incidental: `Tailer::reset_all` reads these
//! files back as plain UTF-8 text so it can run without depending on this
//! module's reader API at all - it is meant to work even
//! when the admin tool invoking it hasn't initialized the rest of the
//! process. That constrains the writer to emit exactly the line shapes below.
//!
//! ```text
//! version = 1
//! Value Name="Filename" Value="<path>"
//! Value Name="QID" Value="<qid>"
//! Value Name="Reset" Value="<0|1>"
//! Value Name="Pos" Value="<unsigned decimal>"
//! Group Name="Stat"
//!   Value Name="StIno" Value="<unsigned decimal>"
//!   Value Name="StSize" Value="<unsigned decimal>"
//! EndGroup
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;

static VALUE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^Value Name="(.*?)" Value="(.*)"$"#).unwrap());
static GROUP_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^Group Name="(.*?)"$"#).unwrap());
static VERSION_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^version = (\d+)$"#).unwrap());

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no persisted record for key")]
    NotFound,
    #[error("unexpected token: expected `{expected}`, found `{found:?}`")]
    UnexpectedToken { expected: String, found: Option<String> },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Sequentially builds one persisted record. Field order matters: it is part
/// of the layout fixed above, not just a writer convenience.
pub trait PersistWriter {
    fn write_value(&mut self, name: &str, value: &str);
    fn write_start_group(&mut self, name: &str);
    fn write_end_group(&mut self);
    /// Commits the record. A whole-record replace: partially written data
    /// never becomes visible to a reader.
    fn done(self: Box<Self>) -> Result<(), StoreError>;
}

/// Sequentially consumes one persisted record, erroring as soon as the next
/// token's name doesn't match what the caller expected.
pub trait PersistReader {
    fn version(&self) -> u32;
    fn consume_value(&mut self, name: &str) -> Result<String, StoreError>;
    fn consume_start_group(&mut self, name: &str) -> Result<(), StoreError>;
    fn consume_end_group(&mut self) -> Result<(), StoreError>;
}

pub trait PersistStore {
    fn begin(&self, key: &str, version: u32) -> Box<dyn PersistWriter>;
    fn reader(&self, key: &str) -> Result<Box<dyn PersistReader>, StoreError>;
    /// Deletes the keyed record. `Ok(false)` iff it did not exist.
    fn remove(&self, key: &str) -> Result<bool, StoreError>;
}

fn render_lines(version: u32, lines: &[String]) -> String {
    let mut out = format!("version = {version}\n");
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn parse_lines(text: &str) -> Result<(u32, Vec<String>), StoreError> {
    let mut lines = text.lines();
    let header = lines.next().ok_or(StoreError::NotFound)?;
    let version = VERSION_LINE
        .captures(header)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .ok_or_else(|| StoreError::UnexpectedToken {
            expected: "version = N".to_string(),
            found: Some(header.to_string()),
        })?;
    Ok((version, lines.map(|l| l.to_string()).collect()))
}

struct LineReader {
    version: u32,
    lines: Vec<String>,
    idx: usize,
}

impl LineReader {
    fn new(version: u32, lines: Vec<String>) -> Self {
        Self { version, lines, idx: 0 }
    }

    fn next_line(&mut self) -> Option<&str> {
        let line = self.lines.get(self.idx).map(|s| s.as_str());
        if line.is_some() {
            self.idx += 1;
        }
        line
    }
}

impl PersistReader for LineReader {
    fn version(&self) -> u32 {
        self.version
    }

    fn consume_value(&mut self, name: &str) -> Result<String, StoreError> {
        let line = self
            .next_line()
            .ok_or_else(|| StoreError::UnexpectedToken {
                expected: format!("Value Name=\"{name}\""),
                found: None,
            })?
            .to_string();
        let caps = VALUE_LINE
            .captures(line.trim_start())
            .ok_or_else(|| StoreError::UnexpectedToken {
                expected: format!("Value Name=\"{name}\""),
                found: Some(line.clone()),
            })?;
        if &caps[1] != name {
            return Err(StoreError::UnexpectedToken {
                expected: format!("Value Name=\"{name}\""),
                found: Some(line),
            });
        }
        Ok(caps[2].to_string())
    }

    fn consume_start_group(&mut self, name: &str) -> Result<(), StoreError> {
        let line = self
            .next_line()
            .ok_or_else(|| StoreError::UnexpectedToken {
                expected: format!("Group Name=\"{name}\""),
                found: None,
            })?
            .to_string();
        let caps = GROUP_LINE
            .captures(line.trim_start())
            .ok_or_else(|| StoreError::UnexpectedToken {
                expected: format!("Group Name=\"{name}\""),
                found: Some(line.clone()),
            })?;
        if &caps[1] != name {
            return Err(StoreError::UnexpectedToken {
                expected: format!("Group Name=\"{name}\""),
                found: Some(line),
            });
        }
        Ok(())
    }

    fn consume_end_group(&mut self) -> Result<(), StoreError> {
        let line = self
            .next_line()
            .ok_or_else(|| StoreError::UnexpectedToken {
                expected: "EndGroup".to_string(),
                found: None,
            })?;
        if line.trim_start() != "EndGroup" {
            return Err(StoreError::UnexpectedToken {
                expected: "EndGroup".to_string(),
                found: Some(line.to_string()),
            });
        }
        Ok(())
    }
}

struct LineWriter<F: FnOnce(u32, Vec<String>) -> Result<(), StoreError>> {
    version: u32,
    lines: Vec<String>,
    depth: usize,
    commit: Option<F>,
}

impl<F: FnOnce(u32, Vec<String>) -> Result<(), StoreError>> PersistWriter for LineWriter<F> {
    fn write_value(&mut self, name: &str, value: &str) {
        let indent = "  ".repeat(self.depth);
        self.lines
            .push(format!("{indent}Value Name=\"{name}\" Value=\"{value}\""));
    }

    fn write_start_group(&mut self, name: &str) {
        let indent = "  ".repeat(self.depth);
        self.lines.push(format!("{indent}Group Name=\"{name}\""));
        self.depth += 1;
    }

    fn write_end_group(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        let indent = "  ".repeat(self.depth);
        self.lines.push(format!("{indent}EndGroup"));
    }

    fn done(mut self: Box<Self>) -> Result<(), StoreError> {
        let commit = self.commit.take().expect("done() called twice");
        commit(self.version, std::mem::take(&mut self.lines))
    }
}

/// Replaces characters that would be awkward/unsafe in a filename. The id
/// string embeds a full path, so `/` must not reach the filesystem layer
/// literally; `reset_all` never relies on the filename to recover the
/// original path; it reads `Filename`/`QID` back out of the file's content.
fn sanitize_key(key: &str) -> String {
    key.replace('%', "%25").replace('/', "%2F")
}

/// File-backed [`PersistStore`]: one file per key under a base directory,
/// written via write-to-temp-then-rename so a reader never observes a
/// partially written record.
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(sanitize_key(key))
    }
}

impl PersistStore for FileStore {
    fn begin(&self, key: &str, version: u32) -> Box<dyn PersistWriter> {
        let path = self.path_for(key);
        let base_dir = self.base_dir.clone();
        Box::new(LineWriter {
            version,
            lines: Vec::new(),
            depth: 0,
            commit: Some(move |version, lines| -> Result<(), StoreError> {
                fs::create_dir_all(&base_dir)?;
                let rendered = render_lines(version, &lines);
                let mut tmp_name = path.as_os_str().to_os_string();
                tmp_name.push(".tmp");
                let tmp_path = PathBuf::from(tmp_name);
                fs::write(&tmp_path, rendered)?;
                fs::rename(&tmp_path, &path)?;
                Ok(())
            }),
        })
    }

    fn reader(&self, key: &str) -> Result<Box<dyn PersistReader>, StoreError> {
        let path = self.path_for(key);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(StoreError::Io(e)),
        };
        let (version, lines) = parse_lines(&text)?;
        Ok(Box::new(LineReader::new(version, lines)))
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

/// In-memory [`PersistStore`] for unit tests - avoids tempdir overhead when
/// only [`crate::position_record::PositionRecord`] round-tripping is under
/// test.
#[derive(Default)]
pub struct MemoryStore {
    records: Rc<RefCell<HashMap<String, (u32, Vec<String>)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistStore for MemoryStore {
    fn begin(&self, key: &str, version: u32) -> Box<dyn PersistWriter> {
        let key = key.to_string();
        let records = Rc::clone(&self.records);
        Box::new(LineWriter {
            version,
            lines: Vec::new(),
            depth: 0,
            commit: Some(move |version, lines| -> Result<(), StoreError> {
                records.borrow_mut().insert(key, (version, lines));
                Ok(())
            }),
        })
    }

    fn reader(&self, key: &str) -> Result<Box<dyn PersistReader>, StoreError> {
        let (version, lines) = self
            .records
            .borrow()
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        Ok(Box::new(LineReader::new(version, lines)))
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.records.borrow_mut().remove(key).is_some())
    }
}
