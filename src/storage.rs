//! # Storage Module
//!
//! Flat, name-addressed file storage for log files, in the shape of the small
//! flash filesystems found on wearables: files are created, appended to, read
//! whole, listed and erased. `FsStorage` maps names onto a directory.
//!
//! Log file names are self-describing: `<pid>_<YYYY-MM-DD>.csv`.

use chrono::NaiveDate;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

pub const LOG_EXTENSION: &str = ".csv";

/// Name-addressed file storage
pub trait Storage: Send + Sync {
    fn exists(&self, name: &str) -> bool;

    /// Whole file contents
    fn read(&self, name: &str) -> io::Result<Vec<u8>>;

    /// Create or truncate a file for writing
    fn create(&self, name: &str) -> io::Result<Box<dyn Write + Send>>;

    /// Open a file for appending, creating it if needed
    fn append(&self, name: &str) -> io::Result<Box<dyn Write + Send>>;

    fn remove(&self, name: &str) -> io::Result<()>;

    /// Names of all stored files
    fn list(&self) -> io::Result<Vec<String>>;
}

/// Storage rooted at a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, name: &str) -> io::Result<PathBuf> {
        // Names are flat; anything that could escape the root is rejected
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid file name: {}", name),
            ));
        }
        Ok(self.root.join(name))
    }
}

impl Storage for FsStorage {
    fn exists(&self, name: &str) -> bool {
        self.path(name).map_or(false, |p| p.is_file())
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path(name)?)
    }

    fn create(&self, name: &str) -> io::Result<Box<dyn Write + Send>> {
        let file = File::create(self.path(name)?)?;
        Ok(Box::new(file))
    }

    fn append(&self, name: &str) -> io::Result<Box<dyn Write + Send>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name)?)?;
        Ok(Box::new(file))
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.path(name)?)
    }

    fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// `<pid>_<YYYY-MM-DD>.csv`
pub fn log_file_name(pid: &str, date: NaiveDate) -> String {
    format!("{}_{}{}", pid, date.format("%Y-%m-%d"), LOG_EXTENSION)
}

/// Split a log file name into device id and date
pub fn parse_log_file_name(name: &str) -> Option<(&str, NaiveDate)> {
    let stem = name.strip_suffix(LOG_EXTENSION)?;
    let (pid, date) = stem.rsplit_once('_')?;
    if pid.is_empty() {
        return None;
    }
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some((pid, date))
}

/// Log files in storage, newest date first
pub fn list_log_files(storage: &dyn Storage) -> io::Result<Vec<String>> {
    let mut files: Vec<(NaiveDate, String)> = storage
        .list()?
        .into_iter()
        .filter_map(|name| parse_log_file_name(&name).map(|(_, date)| (date, name.clone())))
        .collect();
    files.sort_by(|a, b| b.cmp(a));
    Ok(files.into_iter().map(|(_, name)| name).collect())
}
