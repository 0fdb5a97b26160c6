//! Append-only CSV output.
//!
//! Every record is written, flushed and synced before [`StreamPersister::append`]
//! returns, so a crash after N appends leaves exactly N complete rows behind.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{ExtractionRecord, CSV_HEADER};

/// Default number of rows between transient memory releases.
pub const DEFAULT_RELEASE_EVERY: u64 = 25;

/// Errors writing the output file.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Failed to create output file {path}: {source}")]
    Create { path: PathBuf, source: io::Error },

    #[error("Failed to write to {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Output file {0} is already closed")]
    Closed(PathBuf),
}

/// Result of one append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    /// Rows written so far, header excluded.
    pub rows: u64,
    /// True when the caller should release transient working memory now.
    pub release_due: bool,
}

/// Durable, append-only record writer for one run.
#[derive(Debug)]
pub struct StreamPersister {
    path: PathBuf,
    file: Option<File>,
    rows: u64,
    release_every: u64,
}

impl StreamPersister {
    /// Create `<dir>/<run_identifier>.csv` and write the header.
    ///
    /// Never truncates an earlier file: if the name is taken a numeric suffix is added.
    pub fn open(dir: &Path, run_identifier: &str) -> Result<Self, PersistError> {
        Self::open_with_release(dir, run_identifier, DEFAULT_RELEASE_EVERY)
    }

    pub fn open_with_release(
        dir: &Path,
        run_identifier: &str,
        release_every: u64,
    ) -> Result<Self, PersistError> {
        std::fs::create_dir_all(dir).map_err(|source| PersistError::Create {
            path: dir.to_path_buf(),
            source,
        })?;

        let (path, file) = create_fresh(dir, run_identifier)?;
        let mut persister = Self {
            path,
            file: Some(file),
            rows: 0,
            release_every,
        };
        persister.write_line(&csv_line(&CSV_HEADER))?;
        info!("Writing records to {}", persister.path.display());
        Ok(persister)
    }

    /// Append one record and sync it to disk.
    pub fn append(&mut self, record: &ExtractionRecord) -> Result<Appended, PersistError> {
        self.write_line(&csv_line(&record.fields()))?;
        self.rows += 1;
        let release_due = self.release_every > 0 && self.rows % self.release_every == 0;
        if release_due {
            debug!("{} rows written, memory release due", self.rows);
        }
        Ok(Appended {
            rows: self.rows,
            release_due,
        })
    }

    /// Flush and close. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<(), PersistError> {
        if let Some(mut file) = self.file.take() {
            let path = self.path.clone();
            file.flush()
                .and_then(|_| file.sync_all())
                .map_err(|source| PersistError::Write { path, source })?;
            info!("Closed {} ({} rows)", self.path.display(), self.rows);
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn write_line(&mut self, line: &str) -> Result<(), PersistError> {
        let path = self.path.clone();
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| PersistError::Closed(path.clone()))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data())
            .map_err(|source| PersistError::Write { path, source })
    }
}

impl Drop for StreamPersister {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close output file: {}", e);
        }
    }
}

fn create_fresh(dir: &Path, stem: &str) -> Result<(PathBuf, File), PersistError> {
    let mut attempt = 1u32;
    loop {
        let name = if attempt == 1 {
            format!("{}.csv", stem)
        } else {
            format!("{}-{}.csv", stem, attempt)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("{} exists, trying next name", path.display());
                attempt += 1;
            }
            Err(source) => return Err(PersistError::Create { path, source }),
        }
    }
}

/// Escape a value for CSV output.
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_line(fields: &[&str]) -> String {
    let mut line = fields
        .iter()
        .map(|f| escape_csv(f))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ExtractionRecord {
        ExtractionRecord {
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            street: "12 Elm St".into(),
            city: "Duluth".into(),
            zip: "55802".into(),
            plaintiff: "First Bank, N.A.".into(),
            notice_id: id.into(),
            ..Default::default()
        }
    }

    #[test]
    fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut persister = StreamPersister::open(dir.path(), "mn_notices_2024-01-02").unwrap();
        persister.append(&record("1")).unwrap();
        persister.append(&record("2")).unwrap();
        persister.close().unwrap();

        let text = std::fs::read_to_string(dir.path().join("mn_notices_2024-01-02.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "first_name,last_name,street,city,state,zip,date_filed,plaintiff,link,notice_id"
        );
        assert_eq!(lines[1], "Jane,Doe,12 Elm St,Duluth,MN,55802,,\"First Bank, N.A.\",,1");
    }

    #[test]
    fn rows_are_on_disk_before_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut persister = StreamPersister::open(dir.path(), "run").unwrap();
        persister.append(&record("1")).unwrap();

        let text = std::fs::read_to_string(persister.path()).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn existing_file_is_never_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let first_path = {
            let mut first = StreamPersister::open(dir.path(), "run").unwrap();
            first.append(&record("1")).unwrap();
            first.path().to_path_buf()
        };

        let second = StreamPersister::open(dir.path(), "run").unwrap();
        assert_ne!(second.path(), first_path.as_path());
        assert!(second.path().ends_with("run-2.csv"));

        let text = std::fs::read_to_string(&first_path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut persister = StreamPersister::open(dir.path(), "run").unwrap();
        persister.close().unwrap();
        persister.close().unwrap();
        assert!(persister.is_closed());
        assert!(matches!(
            persister.append(&record("1")),
            Err(PersistError::Closed(_))
        ));
    }

    #[test]
    fn release_signal_every_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut persister = StreamPersister::open_with_release(dir.path(), "run", 2).unwrap();
        assert!(!persister.append(&record("1")).unwrap().release_due);
        assert!(persister.append(&record("2")).unwrap().release_due);
        assert!(!persister.append(&record("3")).unwrap().release_due);
    }

    #[test]
    fn escapes_quotes_and_newlines() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv("a\nb"), "\"a\nb\"");
    }
}
