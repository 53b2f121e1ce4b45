//! # Operational Log
//!
//! Human-readable audit trail kept next to the recordings
//! (`wristlog.log.txt`), one line per event:
//!
//! ```text
//! [2026-10-16T09:00:00.000Z] [INFO] Recording enabled
//! ```
//!
//! Lines are queued on a channel and appended by a background writer thread.
//! Failures to write are reported through `log` and never reach the caller.

use crate::storage::Storage;
use chrono::{SecondsFormat, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::io::Write;
use std::sync::Arc;
use std::thread;

pub const OPLOG_FILE: &str = "wristlog.log.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

enum OpLogCommand {
    Line(String),
    Stop,
}

/// Cheap, cloneable handle for queuing log lines
#[derive(Clone)]
pub struct OpLog {
    sender: Option<Sender<OpLogCommand>>,
}

/// Owns the writer thread; dropping it drains the queue and joins the thread
pub struct OpLogWriter {
    sender: Sender<OpLogCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

pub fn format_line(severity: Severity, message: &str) -> String {
    format!(
        "[{}] [{}] {}\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        severity.as_str(),
        message
    )
}

impl OpLog {
    /// Start the writer thread appending to `file_name` in `storage`
    pub fn start(storage: Arc<dyn Storage>, file_name: &str) -> (OpLog, OpLogWriter) {
        let (sender, receiver) = unbounded();
        let file_name = file_name.to_string();

        let thread = thread::spawn(move || writer_loop(receiver, storage, file_name));

        (
            OpLog {
                sender: Some(sender.clone()),
            },
            OpLogWriter {
                sender,
                thread: Some(thread),
            },
        )
    }

    /// Handle that drops every line
    pub fn disabled() -> Self {
        OpLog { sender: None }
    }

    pub fn log(&self, severity: Severity, message: impl AsRef<str>) {
        if let Some(sender) = &self.sender {
            let line = format_line(severity, message.as_ref());
            if let Err(e) = sender.send(OpLogCommand::Line(line)) {
                log::warn!("Operational log is closed: {}", e);
            }
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Severity::Info, message)
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Severity::Warn, message)
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Severity::Error, message)
    }
}

fn writer_loop(receiver: Receiver<OpLogCommand>, storage: Arc<dyn Storage>, file_name: String) {
    loop {
        match receiver.recv() {
            Ok(OpLogCommand::Line(line)) => {
                let result = storage.append(&file_name).and_then(|mut file| {
                    file.write_all(line.as_bytes())?;
                    file.flush()
                });
                if let Err(e) = result {
                    log::warn!("Failed to write operational log: {}", e);
                }
            }
            Ok(OpLogCommand::Stop) | Err(_) => break,
        }
    }
}

impl Drop for OpLogWriter {
    fn drop(&mut self) {
        let _ = self.sender.send(OpLogCommand::Stop);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::FailingStorage;
    use crate::storage::FsStorage;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    #[test]
    fn test_lines_are_appended_in_order() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(FsStorage::new(dir.path()).unwrap());

        {
            let (oplog, _writer) = OpLog::start(storage.clone(), OPLOG_FILE);
            oplog.info("Recording enabled");
            oplog.warn("File 05_2026-10-15.csv deleted");
            oplog.error("Failed to connect to E8:1F:2A:00:11:22");
        }

        let text = String::from_utf8(storage.read(OPLOG_FILE).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] [INFO] Recording enabled"));
        assert!(lines[1].contains("[WARN] File 05_2026-10-15.csv deleted"));
        assert!(lines[2].contains("[ERROR] Failed to connect"));
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let dir = tempdir().unwrap();
        let fail = Arc::new(AtomicBool::new(true));
        let storage = Arc::new(FailingStorage {
            inner: FsStorage::new(dir.path()).unwrap(),
            fail: fail.clone(),
        });

        let (oplog, writer) = OpLog::start(storage, OPLOG_FILE);
        oplog.error("cannot be written");
        drop(writer);

        // The handle outlives the writer; logging is still harmless
        oplog.info("after shutdown");
        assert!(fail.load(Ordering::SeqCst));
    }

    #[test]
    fn test_disabled_log() {
        OpLog::disabled().info("dropped");
    }
}
