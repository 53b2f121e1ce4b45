//! # Error Types Module
//!
//! Centralized error handling for the recording engine.
//! Each layer gets its own error type so the propagation policy stays visible
//! in the signatures:
//!
//! ## Error Types
//! - `SensorError`: sensor name resolution (absorbed by the recorder set)
//! - `StorageError`: log file I/O (fatal to the active recording session)
//! - `LinkError`: radio link failures reported by a `RadioLink` adapter
//! - `TransferError`: terminal outcome of a transfer session
//! - `ConfigError`: settings file I/O and (de)serialization
//!
//! ## Usage Examples
//! ```rust,ignore
//! // Writer module uses StorageError
//! pub fn append_row(&mut self, ...) -> Result<Option<String>, StorageError> { ... }
//!
//! // Transfer module turns LinkError into a TransferError state
//! pub async fn run(self, link: &mut dyn RadioLink) -> Result<usize, TransferError> { ... }
//! ```

use std::fmt;
use std::io;

/// Errors raised while resolving sensor capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// Name is not present in the capability registry
    UnknownSensor(String),
    /// A capability with this key was already registered
    DuplicateSensor(String),
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::UnknownSensor(name) => write!(f, "Unknown sensor: {}", name),
            SensorError::DuplicateSensor(name) => {
                write!(f, "Sensor {} is already registered", name)
            }
        }
    }
}

impl std::error::Error for SensorError {}

/// Errors that can occur while reading or writing log files
#[derive(Debug)]
pub enum StorageError {
    /// Writing to a log file failed (out of space, I/O error)
    WriteFailed { file: String, source: io::Error },
    /// Reading a log file failed
    ReadFailed { file: String, source: io::Error },
    /// The named file does not exist
    FileNotFound(String),
    /// A row was appended while no log file is open
    NoActiveFile,
    /// Refused to delete the file currently being recorded
    FileInUse(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::WriteFailed { file, source } => {
                write!(f, "Failed to write {}: {}", file, source)
            }
            StorageError::ReadFailed { file, source } => {
                write!(f, "Failed to read {}: {}", file, source)
            }
            StorageError::FileNotFound(file) => write!(f, "File {} not found", file),
            StorageError::NoActiveFile => write!(f, "No log file is open"),
            StorageError::FileInUse(file) => {
                write!(f, "File {} is the active recording file", file)
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::WriteFailed { source, .. } => Some(source),
            StorageError::ReadFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors reported by a radio link adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Bluetooth adapter not found or not available
    NoAdapter,
    /// The counterpart was not seen while scanning
    PeerNotFound(String),
    /// Connection establishment failed
    Connect(String),
    /// A payload could not be written
    Write(String),
    /// The link dropped while in use
    Disconnected,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::NoAdapter => {
                write!(f, "No Bluetooth adapter found. Please ensure Bluetooth is enabled.")
            }
            LinkError::PeerNotFound(address) => write!(f, "Peer {} not found", address),
            LinkError::Connect(reason) => write!(f, "Failed to connect: {}", reason),
            LinkError::Write(reason) => write!(f, "Failed to write payload: {}", reason),
            LinkError::Disconnected => write!(f, "Link disconnected"),
        }
    }
}

impl std::error::Error for LinkError {}

/// Terminal failures of a transfer session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The requested file does not exist or is empty
    FileNotFound(String),
    /// No peer address is configured
    NoPeer,
    /// Connection failed outside the quiet-hours retry window
    ConnectionFailure { address: String, reason: String },
    /// The link failed mid-transfer
    SendFailed { sent: usize, reason: String },
    /// A newer transfer request replaced this one
    Cancelled,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::FileNotFound(file) => write!(f, "File {} not found", file),
            TransferError::NoPeer => write!(f, "No peer address configured"),
            TransferError::ConnectionFailure { address, reason } => {
                write!(f, "Failed to connect to {}: {}", address, reason)
            }
            TransferError::SendFailed { sent, reason } => {
                write!(f, "Transfer failed after {} bytes: {}", sent, reason)
            }
            TransferError::Cancelled => write!(f, "Transfer was cancelled"),
        }
    }
}

impl std::error::Error for TransferError {}

/// Errors that can occur during settings operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read settings file
    ReadFailed(io::Error),
    /// Failed to write settings file
    WriteFailed(io::Error),
    /// Failed to parse settings file
    ParseFailed(toml::de::Error),
    /// Failed to serialize settings
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => write!(f, "Failed to read settings file: {}", e),
            ConfigError::WriteFailed(e) => write!(f, "Failed to write settings file: {}", e),
            ConfigError::ParseFailed(e) => write!(f, "Failed to parse settings file: {}", e),
            ConfigError::SerializeFailed(e) => write!(f, "Failed to serialize settings: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}
