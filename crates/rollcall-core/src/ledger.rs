//! Attendance ledger backed by a flat CSV file.
//!
//! The file holds a `Name,Date,Time` header and one row per attendance mark.
//! At most one row exists per (name, date). Every successful mark reads the
//! whole file and replaces it in full through a temporary file and a rename.
//! There is no locking, so two processes marking at the same moment can both
//! pass the duplicate check.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Default ledger file name, relative to the working directory.
pub const DEFAULT_LEDGER_FILE: &str = "attendance.csv";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ledger CSV in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One attendance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Time")]
    pub time: NaiveTime,
}

/// Result of [`AttendanceLedger::mark`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// A new row was written.
    Marked(AttendanceRecord),
    /// A row for this name and date already exists; nothing was written.
    AlreadyMarkedToday,
}

impl MarkOutcome {
    pub fn is_marked(&self) -> bool {
        matches!(self, MarkOutcome::Marked(_))
    }
}

/// Append-once-per-day attendance store.
#[derive(Debug, Clone)]
pub struct AttendanceLedger {
    path: PathBuf,
}

impl AttendanceLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark `name` present at the current local date and time.
    pub fn mark(&self, name: &str) -> Result<MarkOutcome, LedgerError> {
        self.mark_at(name, Local::now().naive_local())
    }

    /// Mark `name` present at `at`, truncated to whole seconds.
    pub fn mark_at(&self, name: &str, at: NaiveDateTime) -> Result<MarkOutcome, LedgerError> {
        let date = at.date();
        let mut records = self.read_all()?;

        if records.iter().any(|r| r.name == name && r.date == date) {
            tracing::info!(name, %date, "attendance already marked today");
            return Ok(MarkOutcome::AlreadyMarkedToday);
        }

        let record = AttendanceRecord {
            name: name.to_string(),
            date,
            time: at.time().with_nanosecond(0).unwrap_or_else(|| at.time()),
        };
        records.push(record.clone());
        self.write_all(&records)?;

        tracing::info!(name, %date, time = %record.time, "attendance marked");
        Ok(MarkOutcome::Marked(record))
    }

    /// All persisted records in file order; empty if the file does not exist.
    pub fn read_all(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let mut reader = match csv::Reader::from_path(&self.path) {
            Ok(reader) => reader,
            Err(e) if is_not_found(&e) => return Ok(Vec::new()),
            Err(source) => return Err(self.csv_err(source)),
        };

        reader
            .deserialize()
            .collect::<Result<Vec<AttendanceRecord>, _>>()
            .map_err(|source| self.csv_err(source))
    }

    /// Delete the ledger file. Returns whether a file was removed.
    pub fn reset(&self) -> Result<bool, LedgerError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "attendance ledger reset");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(self.io_err(source)),
        }
    }

    fn write_all(&self, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
        // serde writes the header along with the first row.
        self.rewrite(|writer| {
            for record in records {
                writer.serialize(record).map_err(|e| self.csv_err(e))?;
            }
            Ok(())
        })
    }

    /// Fill a temporary file beside the ledger, then rename it over the
    /// ledger. The old file stays intact until the rename succeeds.
    fn rewrite<F>(&self, fill: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&mut csv::Writer<&mut NamedTempFile>) -> Result<(), LedgerError>,
    {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
                parent.to_path_buf()
            }
            None => PathBuf::from("."),
        };

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|source| LedgerError::Io {
            path: dir.clone(),
            source,
        })?;
        {
            let mut writer = csv::Writer::from_writer(&mut tmp);
            fill(&mut writer)?;
            writer.flush().map_err(|source| self.io_err(source))?;
        }
        tmp.as_file().sync_all().map_err(|source| self.io_err(source))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        Ok(())
    }

    fn io_err(&self, source: io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_err(&self, source: csv::Error) -> LedgerError {
        LedgerError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

fn is_not_found(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(e) if e.kind() == io::ErrorKind::NotFound)
}
