//! # Log Writer / Rotation Manager
//!
//! Owns the handle of the current log file and keeps every file consistent:
//!
//! - at most one active file per local calendar day; a row stamped on a new
//!   day closes the old file and opens `<pid>_<today>.csv` with a fresh header
//!   before the row is written
//! - a header is written exactly once per section; reopening a file whose
//!   current section already has the same header appends silently, otherwise
//!   a separator line and the new header start a new section
//! - any storage failure is returned to the caller, never retried
//!
//! ## File format
//! ```text
//! Time,AccelX,AccelY,AccelZ,Heartrate
//! 2026-10-16 09:00:00.000,0.1,0.2,0.9,64
//! ### New sensor configuration at 2026-10-16 09:30:00.000 ###
//! Time,Heartrate
//! 2026-10-16 09:30:00.200,66
//! ```

use crate::clock;
use crate::error::StorageError;
use crate::storage::{log_file_name, Storage};
use chrono::{DateTime, NaiveDate, Utc};
use std::io::Write;
use std::sync::Arc;

pub const SEPARATOR_PREFIX: &str = "### New sensor configuration at ";
pub const SEPARATOR_SUFFIX: &str = " ###";

/// What `open_or_create` found on storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderOutcome {
    /// New file, header written as its first line
    Created,
    /// Existing file whose current section matches; nothing written
    Continued,
    /// Existing file with a different header; separator and header appended
    NewSection,
}

struct OpenLog {
    name: String,
    columns: Vec<String>,
    handle: Box<dyn Write + Send>,
}

pub struct LogWriter {
    storage: Arc<dyn Storage>,
    pid: String,
    locale_offset: i32,
    current: Option<OpenLog>,
}

impl LogWriter {
    pub fn new(storage: Arc<dyn Storage>, pid: &str, locale_offset: i32) -> Self {
        Self {
            storage,
            pid: pid.to_string(),
            locale_offset,
            current: None,
        }
    }

    pub fn current_file(&self) -> Option<&str> {
        self.current.as_ref().map(|log| log.name.as_str())
    }

    /// Open `file_name` for appending, initialising or extending its header
    pub fn open_or_create(
        &mut self,
        file_name: &str,
        columns: &[String],
        now: DateTime<Utc>,
    ) -> Result<HeaderOutcome, StorageError> {
        self.close()?;

        let header = columns.join(",");
        let (outcome, mut handle) = if self.storage.exists(file_name) {
            let existing = active_header(self.storage.as_ref(), file_name)?;
            let mut handle = self
                .storage
                .append(file_name)
                .map_err(|e| write_failed(file_name, e))?;

            match existing {
                Some(existing) if existing == header => (HeaderOutcome::Continued, handle),
                Some(_) => {
                    let separator = format!(
                        "{}{}{}\n{}\n",
                        SEPARATOR_PREFIX,
                        clock::format_timestamp(now, self.locale_offset),
                        SEPARATOR_SUFFIX,
                        header
                    );
                    handle
                        .write_all(separator.as_bytes())
                        .map_err(|e| write_failed(file_name, e))?;
                    log::info!("New headers added to {}", file_name);
                    (HeaderOutcome::NewSection, handle)
                }
                None => {
                    // Zero-length file left behind by an interrupted create
                    handle
                        .write_all(format!("{}\n", header).as_bytes())
                        .map_err(|e| write_failed(file_name, e))?;
                    (HeaderOutcome::Created, handle)
                }
            }
        } else {
            let mut handle = self
                .storage
                .create(file_name)
                .map_err(|e| write_failed(file_name, e))?;
            handle
                .write_all(format!("{}\n", header).as_bytes())
                .map_err(|e| write_failed(file_name, e))?;
            log::info!("New file created: {}", file_name);
            (HeaderOutcome::Created, handle)
        };

        handle.flush().map_err(|e| write_failed(file_name, e))?;
        self.current = Some(OpenLog {
            name: file_name.to_string(),
            columns: columns.to_vec(),
            handle,
        });

        Ok(outcome)
    }

    /// Switch to `<pid>_<today>.csv` if the current file belongs to another day.
    /// Returns the new file name when a rotation happened.
    pub fn rotate_if_needed(
        &mut self,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, StorageError> {
        let (name, columns) = match &self.current {
            Some(log) => (log.name.clone(), log.columns.clone()),
            None => return Err(StorageError::NoActiveFile),
        };

        let date_str = today.format("%Y-%m-%d").to_string();
        if name.contains(&date_str) {
            return Ok(None);
        }

        let new_name = log_file_name(&self.pid, today);
        log::info!("Date changed, rotating {} -> {}", name, new_name);
        self.open_or_create(&new_name, &columns, now)?;
        Ok(Some(new_name))
    }

    /// Write one row, rotating first when the local date moved on.
    /// Returns the new file name when a rotation happened.
    pub fn append_row(
        &mut self,
        now: DateTime<Utc>,
        values: &[f64],
    ) -> Result<Option<String>, StorageError> {
        let today = clock::local_date(now, self.locale_offset);
        let rotated = self.rotate_if_needed(today, now)?;

        let mut line = clock::format_timestamp(now, self.locale_offset);
        for value in values {
            line.push(',');
            line.push_str(&value.to_string());
        }
        line.push('\n');

        let log = self.current.as_mut().ok_or(StorageError::NoActiveFile)?;
        log.handle
            .write_all(line.as_bytes())
            .and_then(|_| log.handle.flush())
            .map_err(|e| write_failed(&log.name, e))?;

        Ok(rotated)
    }

    /// Flush and release the current handle
    pub fn close(&mut self) -> Result<(), StorageError> {
        if let Some(mut log) = self.current.take() {
            log.handle.flush().map_err(|e| write_failed(&log.name, e))?;
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("{}", e);
        }
    }
}

fn write_failed(file: &str, source: std::io::Error) -> StorageError {
    StorageError::WriteFailed {
        file: file.to_string(),
        source,
    }
}

/// Header line of the last section in `file_name`, `None` for an empty file
fn active_header(storage: &dyn Storage, file_name: &str) -> Result<Option<String>, StorageError> {
    let bytes = storage.read(file_name).map_err(|e| StorageError::ReadFailed {
        file: file_name.to_string(),
        source: e,
    })?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(parse_sections(&text).pop().map(|section| section.header.join(",")))
}

pub fn is_separator(line: &str) -> bool {
    line.starts_with(SEPARATOR_PREFIX) && line.ends_with(SEPARATOR_SUFFIX)
}

/// A run of rows sharing one header line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Split log text into homogeneous sections on separator lines
pub fn parse_sections(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut expecting_header = true;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if is_separator(line) {
            expecting_header = true;
            continue;
        }

        let cells: Vec<String> = line.split(',').map(|c| c.to_string()).collect();
        if expecting_header {
            sections.push(Section {
                header: cells,
                rows: Vec::new(),
            });
            expecting_header = false;
        } else if let Some(section) = sections.last_mut() {
            section.rows.push(cells);
        }
    }

    sections
}
