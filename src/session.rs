//! # Recording Session
//!
//! The single owner of everything a recording holds on to: the live sensor
//! capabilities, the open log file and the sampling timer. Transitions are
//! explicit (`start`, `restart`, `stop`) and a start always tears down the
//! previous session completely first.

use crate::clock;
use crate::config::Settings;
use crate::error::StorageError;
use crate::hardware::{Hardware, Reading};
use crate::recorder::ActiveRecorderSet;
use crate::registry::SensorRegistry;
use crate::scheduler::SampleScheduler;
use crate::storage::{log_file_name, Storage};
use crate::writer::{HeaderOutcome, LogWriter};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Result of a successful `start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    pub file: String,
    pub header: HeaderOutcome,
}

pub struct RecordingSession {
    hardware: Arc<dyn Hardware>,
    storage: Arc<dyn Storage>,
    recorders: ActiveRecorderSet,
    writer: Option<LogWriter>,
    scheduler: SampleScheduler,
}

impl RecordingSession {
    pub fn new(hardware: Arc<dyn Hardware>, storage: Arc<dyn Storage>) -> Self {
        Self {
            hardware,
            storage,
            recorders: ActiveRecorderSet::default(),
            writer: None,
            scheduler: SampleScheduler::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn scheduler(&self) -> &SampleScheduler {
        &self.scheduler
    }

    pub fn current_file(&self) -> Option<&str> {
        self.writer.as_ref().and_then(|w| w.current_file())
    }

    pub fn header_columns(&self) -> Vec<String> {
        self.recorders.header_columns()
    }

    pub fn active_sensors(&self) -> Vec<String> {
        self.recorders.keys().into_iter().map(|k| k.to_string()).collect()
    }

    /// Begin recording with `settings`. Any running session is stopped first.
    ///
    /// The log file is the one named in settings when it belongs to today,
    /// otherwise `<pid>_<today>.csv`.
    pub fn start(
        &mut self,
        settings: &Settings,
        registry: &SensorRegistry,
        now: DateTime<Utc>,
    ) -> Result<SessionStart, StorageError> {
        self.stop();

        let today = clock::local_date(now, settings.locale_offset);
        let todays_file = log_file_name(&settings.pid, today);
        let date_str = today.format("%Y-%m-%d").to_string();
        let file = match &settings.file {
            Some(file) if file.contains(&date_str) => file.clone(),
            _ => todays_file,
        };

        self.recorders = ActiveRecorderSet::resolve(&settings.record, registry);
        let columns = self.recorders.header_columns();

        let mut writer =
            LogWriter::new(self.storage.clone(), &settings.pid, settings.locale_offset);
        let header = match writer.open_or_create(&file, &columns, now) {
            Ok(header) => header,
            Err(e) => {
                self.recorders = ActiveRecorderSet::default();
                return Err(e);
            }
        };

        self.recorders.start_all(self.hardware.as_ref());
        self.writer = Some(writer);
        self.scheduler.enable(settings.period);

        log::info!(
            "Recording {:?} at {} Hz into {}",
            self.recorders.keys(),
            settings.period,
            file
        );

        Ok(SessionStart { file, header })
    }

    /// Stop, then start again with new settings
    pub fn restart(
        &mut self,
        settings: &Settings,
        registry: &SensorRegistry,
        now: DateTime<Utc>,
    ) -> Result<SessionStart, StorageError> {
        self.start(settings, registry, now)
    }

    /// Tear everything down: timer, sensors, file handle. Safe to repeat.
    pub fn stop(&mut self) {
        self.scheduler.disable();
        self.recorders.stop_all(self.hardware.as_ref());
        self.recorders = ActiveRecorderSet::default();
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close() {
                log::error!("{}", e);
            }
        }
    }

    pub fn dispatch(&mut self, reading: &Reading) {
        self.recorders.dispatch(reading);
    }

    /// Sample one row and append it. A storage failure stops the session
    /// before the error is returned. Returns the new file name on rotation.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<Option<String>, StorageError> {
        let writer = match self.writer.as_mut() {
            Some(writer) if self.scheduler.is_running() => writer,
            _ => return Err(StorageError::NoActiveFile),
        };

        let row = self.recorders.sample_row();
        match writer.append_row(now, &row) {
            Ok(rotated) => Ok(rotated),
            Err(e) => {
                self.stop();
                Err(e)
            }
        }
    }

    /// Wait for the next sampling tick
    pub async fn next_tick(&mut self) {
        self.scheduler.next_tick().await
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.stop();
    }
}
