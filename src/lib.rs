//! # wristlog
//!
//! Wrist-worn sensor recorder: samples a configurable set of sensors at a
//! fixed rate into daily CSV logs, and ships finished logs to a paired
//! counterpart over a Bluetooth LE link.
//!
//! ## Key Components
//! - `registry` / `sensor`: the capabilities that can be recorded
//! - `session` / `writer`: a recording run and the file it writes
//! - `transfer` / `connection`: shipping a log over the radio link
//! - `engine`: the single-consumer actor tying all of the above together

pub mod clock;
pub mod config;
pub mod connection;
pub mod device_scanner;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod oplog;
pub mod recorder;
pub mod registry;
pub mod scheduler;
pub mod sensor;
pub mod session;
pub mod storage;
pub mod transfer;
pub mod writer;

pub use config::{Settings, SettingsStore, TransferConfig, TransferMode};
pub use engine::{Command, Engine, EngineHandle, EngineStatus};
pub use error::{ConfigError, LinkError, SensorError, StorageError, TransferError};
pub use hardware::{Hardware, Reading};
pub use registry::SensorRegistry;
