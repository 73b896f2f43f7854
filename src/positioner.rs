//! Opens a log file at the correct resume offset and keeps rotation-detection
//! metadata fresh, including the EOF-snapshot fallback for an unreliable
//! stream tell.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::error::Error;
use crate::persist_store::PersistStore;
use crate::position_record::PositionRecord;

pub struct StreamPositioner<'s> {
    store: &'s dyn PersistStore,
    record: PositionRecord,
    reader: BufReader<File>,
    /// Offset captured at open time, used whenever the stream's tell is
    /// unreliable at persist time (see `persist_state`).
    pos_eof: u64,
}

fn stat(path: &Path) -> Result<std::fs::Metadata, Error> {
    std::fs::metadata(path).map_err(|_| Error::FilePathNotFound { path: path.to_path_buf() })
}

impl<'s> StreamPositioner<'s> {
    /// Opens `path` for reading and positions the stream per the algorithm
    /// in the module doc comment. Fails with [`Error::FilePathNotFound`] if
    /// the file does not exist.
    pub fn open(path: &Path, qid: &str, store: &'s dyn PersistStore) -> Result<Self, Error> {
        let mut record = PositionRecord::new(path, qid);

        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FilePathNotFound { path: path.to_path_buf() }
            } else {
                Error::Io(e)
            }
        })?;
        let mut reader = BufReader::new(file);

        // The original imbues the stream with a locale derived from the
        // environment here, swallowing any failure. A byte-oriented
        // `BufReader` has no locale to imbue; this step is preserved as a
        // documented no-op rather than dropped, to keep the six-step
        // sequence intact.

        let pos_eof = reader.seek(SeekFrom::End(0))?;

        if !record.recover(store) {
            tracing::trace!(path = %path.display(), qid, pos_eof, "first time - seek to end");
        } else if record.reset_on_read {
            tracing::trace!(path = %path.display(), qid, pos_eof, "reset-on-read - seek to end");
            record.reset_on_read = false;
        } else if !Self::is_file_new(&record, path)? {
            tracing::trace!(path = %path.display(), qid, pos = record.pos, "seek to saved position");
            reader.seek(SeekFrom::Start(record.pos))?;
        } else {
            tracing::trace!(path = %path.display(), qid, "file has wrapped - seek to start");
            reader.seek(SeekFrom::Start(0))?;
        }

        record.pos = pos_eof;
        let meta = stat(path)?;
        record.st_ino = meta.ino();
        record.st_size = meta.size();

        Ok(Self { store, record, reader, pos_eof })
    }

    /// Mutable access to the positioned stream, for the read-and-match loop.
    pub fn reader_mut(&mut self) -> &mut BufReader<File> {
        &mut self.reader
    }

    pub fn record(&self) -> &PositionRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut PositionRecord {
        &mut self.record
    }

    /// True iff the file at `record.path` is a different underlying object
    /// than the one the record was last synced against: a changed inode, or
    /// a strictly smaller size. Equal size is deliberately *not* rotation.
    fn is_file_new(record: &PositionRecord, path: &Path) -> Result<bool, Error> {
        let meta = stat(path)?;
        if meta.ino() != record.st_ino {
            tracing::trace!(path = %path.display(), "inode changed - new file");
            return Ok(true);
        }
        if meta.size() < record.st_size {
            tracing::trace!(path = %path.display(), "size smaller - new file");
            return Ok(true);
        }
        Ok(false)
    }

    /// Persists the current position. Reads the stream's tell; if it is
    /// usable (`> 0`), it becomes the new `pos`, otherwise the open-time EOF
    /// snapshot is kept. Some platforms report an unusable tell after
    /// reading past EOF - preferring the open-time snapshot over a fresh
    /// stat avoids racing with writers appending to the file concurrently.
    pub fn persist_state(&mut self) -> Result<(), Error> {
        match self.reader.stream_position() {
            Ok(pos) if pos > 0 => {
                self.record.pos = pos;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::trace!(error = %e, pos_eof = self.pos_eof, "tell unreliable, falling back to EOF snapshot");
            }
        }
        self.record
            .persist(self.store)
            .map_err(|e| Error::Persist(e.to_string()))
    }
}
