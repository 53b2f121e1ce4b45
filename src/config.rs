//! # Settings Module
//!
//! Persistent recorder settings stored in platform-appropriate locations.
//! The store behaves like a key-value record with read/merge/write semantics:
//! every field defaults when absent and a corrupt file is repaired to defaults
//! instead of failing.
//!
//! ## Settings
//! - `period`: sampling rate in Hz (1..=120)
//! - `pid`: participant/device id, used in log file names
//! - `record`: selected sensor keys
//! - `recording`: whether a recording session should be running
//! - `file`: current log file name
//! - `localeOffset`: hours added to UTC for local dates
//! - `peer_address`: radio counterpart for transfers
//! - `[transfer]`: chunking, pacing and quiet-hours retry window
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/wristlog/settings.toml
//! - Linux: ~/.config/wristlog/settings.toml
//! - Windows: %APPDATA%\wristlog\settings.toml

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const SETTINGS_VERSION: u32 = 1;
pub const MIN_PERIOD_HZ: u32 = 1;
pub const MAX_PERIOD_HZ: u32 = 120;

/// How a finished log is put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Start marker, fixed-size content chunks, end marker
    Chunked,
    /// One JSON envelope carrying the whole file
    Envelope,
}

/// Transfer tuning, kept in the `[transfer]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub mode: TransferMode,
    /// Bytes per chunk, clamped to the link's maximum payload
    pub chunk_size: usize,
    /// Delay between chunk sends
    pub chunk_pacing_ms: u64,
    /// Delay before retrying a failed connection inside the quiet-hours window
    pub retry_backoff_secs: u64,
    /// First local hour of the retry window
    pub quiet_hours_start: u32,
    /// Local hour the retry window ends (exclusive); may be lower than start
    pub quiet_hours_end: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            mode: TransferMode::Chunked,
            chunk_size: 128,
            chunk_pacing_ms: 20,
            retry_backoff_secs: 300,
            quiet_hours_start: 0,
            quiet_hours_end: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub version: u32,
    pub period: u32,
    pub pid: String,
    pub record: BTreeSet<String>,
    pub recording: bool,
    pub file: Option<String>,
    #[serde(rename = "localeOffset")]
    pub locale_offset: i32,
    pub peer_address: Option<String>,
    pub storage_dir: Option<PathBuf>,
    pub transfer: TransferConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            period: 1,
            pid: "05".to_string(),
            record: ["accel", "baro", "hrm"].iter().map(|s| s.to_string()).collect(),
            recording: false,
            file: None,
            locale_offset: 0,
            peer_address: None,
            storage_dir: None,
            transfer: TransferConfig::default(),
        }
    }
}

impl Settings {
    /// Bring out-of-range values back to something the engine can run with
    pub fn repaired(mut self) -> Self {
        let defaults = Settings::default();

        if !(MIN_PERIOD_HZ..=MAX_PERIOD_HZ).contains(&self.period) {
            log::warn!("Settings: period {} Hz out of range, clamping", self.period);
            self.period = self.period.clamp(MIN_PERIOD_HZ, MAX_PERIOD_HZ);
        }
        if self.pid.trim().is_empty() {
            self.pid = defaults.pid;
        }
        if !(-12..=14).contains(&self.locale_offset) {
            log::warn!("Settings: locale offset {} out of range, resetting", self.locale_offset);
            self.locale_offset = 0;
        }
        if self.file.as_deref().map_or(false, |f| f.trim().is_empty()) {
            self.file = None;
        }
        if self.transfer.chunk_size == 0 {
            self.transfer.chunk_size = defaults.transfer.chunk_size;
        }
        if self.transfer.quiet_hours_start > 23 || self.transfer.quiet_hours_end > 24 {
            self.transfer.quiet_hours_start = defaults.transfer.quiet_hours_start;
            self.transfer.quiet_hours_end = defaults.transfer.quiet_hours_end;
        }
        self.version = SETTINGS_VERSION;
        self
    }

    /// Directory holding log files, descriptor files and the operational log
    pub fn storage_dir(&self) -> PathBuf {
        match &self.storage_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("wristlog"),
        }
    }
}

/// File-backed settings record
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the default path to the settings file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wristlog")
            .join("settings.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, repairing anything missing or corrupt with defaults
    pub fn load(&self) -> Settings {
        match self.read() {
            Ok(Some(settings)) => settings.repaired(),
            Ok(None) => Settings::default(),
            Err(e) => {
                log::warn!("{}; falling back to defaults", e);
                Settings::default()
            }
        }
    }

    fn read(&self) -> Result<Option<Settings>, ConfigError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let settings = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                Ok(Some(settings))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save the full record, replacing the previous file in one rename
    pub fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
            }
        }

        let toml_string = toml::to_string_pretty(settings).map_err(ConfigError::SerializeFailed)?;
        let tmp_path = self.path.with_extension("toml.tmp");
        fs::write(&tmp_path, toml_string).map_err(ConfigError::WriteFailed)?;
        fs::rename(&tmp_path, &self.path).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    /// Read-merge-write: load the current record, apply `change`, persist it
    pub fn update<F>(&self, change: F) -> Result<Settings, ConfigError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.load();
        change(&mut settings);
        let settings = settings.repaired();
        self.save(&settings)?;
        Ok(settings)
    }
}
