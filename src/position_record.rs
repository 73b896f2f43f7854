//! In-memory resume-state value for one `(user, path, qid)` tuple.
//!
//! Six fields, v0/v1 recover logic, and a size-monotonicity bump at persist
//! time so `st_size >= pos` always holds on disk.

use std::path::{Path, PathBuf};

use crate::persist_store::{PersistStore, StoreError};
use crate::user::effective_user_name;

/// Resumable cursor state for one log file + query identifier pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRecord {
    pub path: PathBuf,
    pub qid: String,
    pub reset_on_read: bool,
    pub pos: u64,
    pub st_ino: u64,
    pub st_size: u64,
}

impl PositionRecord {
    /// Creates a record with constructor defaults (`pos = st_ino = st_size =
    /// 0`, `reset_on_read = false`). No I/O happens here; `recover` hydrates
    /// from the store if a prior record exists.
    pub fn new(path: impl Into<PathBuf>, qid: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            qid: qid.into(),
            reset_on_read: false,
            pos: 0,
            st_ino: 0,
            st_size: 0,
        }
    }

    /// Storage id: `"LogFileProvider_" + effective_user + path + qid`,
    /// unique per (user, file, consumer).
    pub fn id_string(&self) -> String {
        id_string_for(&self.path, &self.qid)
    }

    /// Hydrates this record from `store`. Returns `false` - leaving fields at
    /// their constructor defaults - on store-miss, unknown version, or parse
    /// failure; none of those are propagated as errors, matching the
    /// original's three separate catch blocks folded into one outcome.
    pub fn recover(&mut self, store: &dyn PersistStore) -> bool {
        let id = self.id_string();
        let mut reader = match store.reader(&id) {
            Ok(r) => r,
            Err(e) => {
                tracing::trace!(id = %id, error = %e, "no usable prior state");
                return false;
            }
        };

        let version = reader.version();
        if version != 0 && version != 1 {
            tracing::trace!(id = %id, version, "unknown persisted version, ignoring");
            return false;
        }

        let result: Result<(), StoreError> = (|| {
            if version >= 1 {
                // Filename is already known in memory; consumed only to stay
                // in lock-step with the writer's field order.
                reader.consume_value("Filename")?;
                self.qid = reader.consume_value("QID")?;
                self.reset_on_read = reader.consume_value("Reset")? != "0";
            }
            self.pos = reader.consume_value("Pos")?.parse().map_err(|_| {
                StoreError::UnexpectedToken {
                    expected: "unsigned decimal Pos".to_string(),
                    found: None,
                }
            })?;
            reader.consume_start_group("Stat")?;
            self.st_ino = reader.consume_value("StIno")?.parse().map_err(|_| {
                StoreError::UnexpectedToken {
                    expected: "unsigned decimal StIno".to_string(),
                    found: None,
                }
            })?;
            self.st_size = reader.consume_value("StSize")?.parse().map_err(|_| {
                StoreError::UnexpectedToken {
                    expected: "unsigned decimal StSize".to_string(),
                    found: None,
                }
            })?;
            reader.consume_end_group()?;
            Ok(())
        })();

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!(id = %id, error = %e, "corrupt persisted record, ignoring");
                false
            }
        }
    }

    /// Writes a v1 blob with the exact field order and grouping fixed by
    /// the persisted-record layout. Bumps `st_size` up to `pos` first so the
    /// `st_size >= pos` invariant always holds on disk.
    pub fn persist(&mut self, store: &dyn PersistStore) -> Result<(), StoreError> {
        if self.pos > self.st_size {
            self.st_size = self.pos;
        }

        let id = self.id_string();
        let mut writer = store.begin(&id, 1);
        writer.write_value("Filename", &self.path.to_string_lossy());
        writer.write_value("QID", &self.qid);
        writer.write_value("Reset", if self.reset_on_read { "1" } else { "0" });
        writer.write_value("Pos", &self.pos.to_string());
        writer.write_start_group("Stat");
        writer.write_value("StIno", &self.st_ino.to_string());
        writer.write_value("StSize", &self.st_size.to_string());
        writer.write_end_group();
        writer.done()
    }

    /// Deletes the persisted blob. `false` iff it did not exist.
    pub fn unpersist(&self, store: &dyn PersistStore) -> Result<bool, StoreError> {
        store.remove(&self.id_string())
    }
}

/// Builds the id string for a record without constructing one, used by
/// `reset_all` which recovers `(path, qid)` from text rather than an
/// in-memory record.
pub fn id_string_for(path: &Path, qid: &str) -> String {
    format!(
        "LogFileProvider_{}{}{}",
        effective_user_name(),
        path.display(),
        qid
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist_store::MemoryStore;

    #[test]
    fn persist_then_recover_round_trips() {
        let store = MemoryStore::new();
        let mut record = PositionRecord::new("/var/log/app.log", "q1");
        record.pos = 120;
        record.st_ino = 7;
        record.st_size = 200;
        record.reset_on_read = true;
        record.persist(&store).unwrap();

        let mut recovered = PositionRecord::new("/var/log/app.log", "q1");
        assert!(recovered.recover(&store));
        assert_eq!(recovered, record);
    }

    #[test]
    fn persist_bumps_size_to_match_pos() {
        let store = MemoryStore::new();
        let mut record = PositionRecord::new("/var/log/app.log", "q1");
        record.pos = 500;
        record.st_size = 100;
        record.persist(&store).unwrap();
        assert_eq!(record.st_size, 500);
    }

    #[test]
    fn recover_on_store_miss_returns_false_and_keeps_defaults() {
        let store = MemoryStore::new();
        let mut record = PositionRecord::new("/var/log/app.log", "q1");
        assert!(!record.recover(&store));
        assert_eq!(record, PositionRecord::new("/var/log/app.log", "q1"));
    }

    #[test]
    fn recover_v0_upgrades_qid_and_reset_from_constructor_values() {
        let store = MemoryStore::new();
        {
            let mut w = store.begin(&id_string_for(Path::new("/var/log/app.log"), "q1"), 0);
            w.write_value("Pos", "42");
            w.write_start_group("Stat");
            w.write_value("StIno", "3");
            w.write_value("StSize", "42");
            w.write_end_group();
            w.done().unwrap();
        }

        let mut record = PositionRecord::new("/var/log/app.log", "q1");
        assert!(record.recover(&store));
        assert_eq!(record.pos, 42);
        assert_eq!(record.st_ino, 3);
        assert_eq!(record.st_size, 42);
        assert_eq!(record.qid, "q1");
        assert!(!record.reset_on_read);

        // Re-persisting upgrades the stored blob to v1.
        record.persist(&store).unwrap();
        let mut reader = store
            .reader(&id_string_for(Path::new("/var/log/app.log"), "q1"))
            .unwrap();
        assert_eq!(reader.version(), 1);
        assert_eq!(reader.consume_value("Filename").unwrap(), "/var/log/app.log");
        assert_eq!(reader.consume_value("QID").unwrap(), "q1");
        assert_eq!(reader.consume_value("Reset").unwrap(), "0");
        assert_eq!(reader.consume_value("Pos").unwrap(), "42");
    }

    #[test]
    fn unpersist_reports_prior_existence() {
        let store = MemoryStore::new();
        let mut record = PositionRecord::new("/var/log/app.log", "q1");
        record.persist(&store).unwrap();
        assert!(record.unpersist(&store).unwrap());
        assert!(!record.unpersist(&store).unwrap());
    }
}
