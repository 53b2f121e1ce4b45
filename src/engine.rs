//! # Recording Engine
//!
//! Single-consumer actor that owns the settings record, the recording session
//! and the current transfer. Commands, sensor readings and sampling ticks are
//! handled one at a time on one logical thread, so every read-modify-write of
//! the settings completes before the next event is looked at.
//!
//! ## Key Components
//! - `Engine`: the actor; `run` drives it on a current-thread Tokio runtime
//! - `EngineHandle`: cloneable sender used by the CLI, platform and tests
//! - `Command`: everything the outside world can ask for
//!
//! ## Failure policy
//! - a storage failure while sampling stops the session, releases every
//!   sensor and persists `recording = false`
//! - a transfer failure ends up in the transfer status; it never touches the
//!   recording session
//! - starting a new session or transfer tears the previous one down first

use crate::clock::{self, Clock};
use crate::config::{Settings, SettingsStore, MAX_PERIOD_HZ, MIN_PERIOD_HZ};
use crate::connection::RadioLink;
use crate::error::{SensorError, StorageError, TransferError};
use crate::hardware::{Hardware, Reading};
use crate::oplog::OpLog;
use crate::registry::SensorRegistry;
use crate::session::RecordingSession;
use crate::storage::{self, Storage};
use crate::transfer::{SharedStatus, TransferSession, TransferState, TransferStatus};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Creates a fresh radio link for each transfer
pub type LinkFactory = Arc<dyn Fn() -> Box<dyn RadioLink> + Send + Sync>;

#[derive(Debug)]
pub enum Command {
    SetRecording(bool),
    SetPeriod(u32),
    ToggleSensor(String),
    Reading(Reading),
    SendFile(String),
    DeleteFile(String),
    Status(oneshot::Sender<EngineStatus>),
    Shutdown,
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub recording: bool,
    pub running: bool,
    pub period: u32,
    pub file: Option<String>,
    pub sensors: Vec<String>,
    pub transfer: Option<TransferStatus>,
}

#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::UnboundedSender<Command>,
}

impl EngineHandle {
    /// Queue a command; returns false once the engine has shut down
    pub fn send(&self, command: Command) -> bool {
        self.sender.send(command).is_ok()
    }

    pub fn set_recording(&self, on: bool) -> bool {
        self.send(Command::SetRecording(on))
    }

    pub fn reading(&self, reading: Reading) -> bool {
        self.send(Command::Reading(reading))
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Shutdown)
    }

    pub async fn status(&self) -> Option<EngineStatus> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Status(tx)) {
            return None;
        }
        rx.await.ok()
    }
}

/// The transfer the engine currently tracks. A transfer that failed before
/// connecting has no task.
struct ActiveTransfer {
    status: SharedStatus,
    task: Option<JoinHandle<()>>,
    cancel: Option<oneshot::Sender<()>>,
}

pub struct Engine {
    store: SettingsStore,
    settings: Settings,
    registry: SensorRegistry,
    session: RecordingSession,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    links: LinkFactory,
    oplog: OpLog,
    transfer: Option<ActiveTransfer>,
    receiver: mpsc::UnboundedReceiver<Command>,
}

impl Engine {
    pub fn new(
        store: SettingsStore,
        registry: SensorRegistry,
        hardware: Arc<dyn Hardware>,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        links: LinkFactory,
        oplog: OpLog,
    ) -> (Self, EngineHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let settings = store.load();

        let engine = Engine {
            store,
            settings,
            registry,
            session: RecordingSession::new(hardware, storage.clone()),
            storage,
            clock,
            links,
            oplog,
            transfer: None,
            receiver,
        };

        (engine, EngineHandle { sender })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run until `Shutdown`, the last handle is dropped or Ctrl-C.
    /// Blocks the calling thread.
    pub fn run(self) {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::error!("Failed to create async runtime: {}", e);
                return;
            }
        };

        runtime.block_on(self.event_loop_until(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupted, stopping");
            }
        }));
    }

    /// Resume a persisted recording, then handle events until shutdown
    pub async fn event_loop(self) {
        self.event_loop_until(std::future::pending()).await
    }

    /// Like `event_loop`, but also stops once `interrupt` completes
    pub async fn event_loop_until<F>(mut self, interrupt: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(interrupt);

        if self.settings.recording {
            log::info!("Resuming recording from settings");
            self.start_recording();
        }

        loop {
            tokio::select! {
                command = self.receiver.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.apply(command),
                    }
                }
                _ = self.session.next_tick() => self.on_tick(),
                _ = &mut interrupt => break,
            }
        }

        // Wait for an abandoned transfer to release its link
        if let Some(task) = self.cancel_transfer() {
            let _ = task.await;
        }
        self.shutdown();
    }

    /// Handle one command to completion
    pub fn apply(&mut self, command: Command) {
        match command {
            Command::SetRecording(true) => {
                if !self.session.is_running() {
                    self.start_recording();
                    if self.session.is_running() {
                        self.oplog.info("Recording enabled");
                    }
                }
            }
            Command::SetRecording(false) => {
                self.session.stop();
                self.persist(|s| s.recording = false);
                self.oplog.info("Recording disabled");
            }
            Command::SetPeriod(period) => {
                if !(MIN_PERIOD_HZ..=MAX_PERIOD_HZ).contains(&period) {
                    log::warn!(
                        "Ignoring period {} Hz, must be {}..={}",
                        period,
                        MIN_PERIOD_HZ,
                        MAX_PERIOD_HZ
                    );
                    return;
                }
                self.persist(|s| s.period = period);
                self.oplog.info(format!("Period set to {} Hz", period));
                self.restart_if_running();
            }
            Command::ToggleSensor(key) => {
                let enabled = !self.settings.record.contains(&key);
                if enabled && !self.registry.contains(&key) {
                    log::warn!("{}", SensorError::UnknownSensor(key));
                    return;
                }
                self.persist(|s| {
                    if enabled {
                        s.record.insert(key.clone());
                    } else {
                        s.record.remove(&key);
                    }
                });
                self.oplog.info(format!(
                    "Sensor {} {}",
                    key,
                    if enabled { "enabled" } else { "disabled" }
                ));
                self.restart_if_running();
            }
            Command::Reading(reading) => self.session.dispatch(&reading),
            Command::SendFile(file) => self.send_file(&file),
            Command::DeleteFile(file) => {
                if let Err(e) = self.delete_file(&file) {
                    log::warn!("{}", e);
                }
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => self.shutdown(),
        }
    }

    /// One sampling tick
    pub fn on_tick(&mut self) {
        let now = self.clock.now();
        match self.session.tick(now) {
            Ok(Some(file)) => {
                self.oplog.info(format!("New file created: {}", file));
                self.persist(|s| s.file = Some(file.clone()));
            }
            Ok(None) => {}
            Err(e) => {
                // The session has already released its sensors and file
                log::error!("Recording stopped: {}", e);
                self.oplog.error(format!("Error: {}", e));
                self.persist(|s| s.recording = false);
            }
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            recording: self.settings.recording,
            running: self.session.is_running(),
            period: self.settings.period,
            file: self.settings.file.clone(),
            sensors: self.session.active_sensors(),
            transfer: self
                .transfer
                .as_ref()
                .and_then(|t| t.status.lock().ok().map(|s| s.clone())),
        }
    }

    fn start_recording(&mut self) {
        let now = self.clock.now();
        match self.session.start(&self.settings, &self.registry, now) {
            Ok(started) => {
                self.persist(|s| {
                    s.recording = true;
                    s.file = Some(started.file.clone());
                });
            }
            Err(e) => {
                log::error!("Could not start recording: {}", e);
                self.oplog.error(format!("Error: {}", e));
                self.persist(|s| s.recording = false);
            }
        }
    }

    fn restart_if_running(&mut self) {
        if self.session.is_running() {
            self.session.stop();
            self.start_recording();
        }
    }

    /// Read-merge-write: `change` is applied to the record as stored, so
    /// fields written by another process survive. When the store cannot be
    /// written the change is still applied to the in-memory copy.
    fn persist<F>(&mut self, change: F)
    where
        F: Fn(&mut Settings),
    {
        match self.store.update(&change) {
            Ok(saved) => self.settings = saved,
            Err(e) => {
                log::error!("Failed to persist settings: {}", e);
                change(&mut self.settings);
                self.settings = self.settings.clone().repaired();
            }
        }
    }

    /// Signal the tracked transfer to stop. The returned task finishes once
    /// the link has been disconnected.
    fn cancel_transfer(&mut self) -> Option<JoinHandle<()>> {
        let transfer = self.transfer.take()?;
        let task = transfer.task?;
        if task.is_finished() {
            return None;
        }

        if let Some(cancel) = transfer.cancel {
            let _ = cancel.send(());
        }
        if let Ok(mut status) = transfer.status.lock() {
            status.state = TransferState::Failed(TransferError::Cancelled);
        }
        log::info!("Abandoned transfer in flight");
        Some(task)
    }

    fn send_file(&mut self, file: &str) {
        let previous = self.cancel_transfer();

        let content = match self.storage.read(file) {
            Ok(content) if !content.is_empty() => Some(content),
            _ => None,
        };
        let peer = self.settings.peer_address.clone();

        let (content, peer) = match (content, peer) {
            (Some(content), Some(peer)) => (content, peer),
            (None, _) => {
                self.oplog.error(format!("File {} not found", file));
                self.finish_early(file, TransferError::FileNotFound(file.to_string()));
                return;
            }
            (_, None) => {
                self.oplog.error("No peer address configured");
                self.finish_early(file, TransferError::NoPeer);
                return;
            }
        };

        let session = TransferSession::new(
            file,
            content,
            &peer,
            &self.settings.transfer,
            self.settings.locale_offset,
            self.clock.clone(),
            self.oplog.clone(),
        );
        let status = session.status();
        let mut link = (self.links)();
        let (cancel, cancelled) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            // The previous transfer has to let go of its link first
            if let Some(previous) = previous {
                let _ = previous.await;
            }

            tokio::select! {
                _ = session.run(link.as_mut()) => {}
                _ = cancelled => {
                    if let Err(e) = link.disconnect().await {
                        log::warn!("Disconnect after cancel failed: {}", e);
                    }
                }
            }
        });

        self.transfer = Some(ActiveTransfer {
            status,
            task: Some(task),
            cancel: Some(cancel),
        });
    }

    fn finish_early(&mut self, file: &str, error: TransferError) {
        log::error!("Transfer of {} not started: {}", file, error);
        let mut status = TransferStatus::new(file, 0);
        status.state = TransferState::Failed(error);
        self.transfer = Some(ActiveTransfer {
            status: Arc::new(Mutex::new(status)),
            task: None,
            cancel: None,
        });
    }

    /// Erase a log file; the file being recorded is refused
    pub fn delete_file(&mut self, file: &str) -> Result<(), StorageError> {
        if self.session.current_file() == Some(file) {
            return Err(StorageError::FileInUse(file.to_string()));
        }
        if !self.storage.exists(file) {
            return Err(StorageError::FileNotFound(file.to_string()));
        }
        self.storage.remove(file).map_err(|e| StorageError::WriteFailed {
            file: file.to_string(),
            source: e,
        })?;
        self.oplog.warn(format!("File {} deleted", file));
        Ok(())
    }

    /// Log files on storage, newest first
    pub fn log_files(&self) -> Vec<String> {
        storage::list_log_files(self.storage.as_ref()).unwrap_or_default()
    }

    /// Stop everything this engine owns. `recording` stays as persisted so
    /// the next start resumes.
    fn shutdown(&mut self) {
        // A signalled transfer disconnects its link on its own
        let _ = self.cancel_transfer();
        self.session.stop();
        log::info!(
            "Engine stopped at {}",
            clock::format_timestamp(self.clock.now(), self.settings.locale_offset)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::connection::mock::MockLink;
    use crate::hardware::mock::MockHardware;
    use crate::hardware::PowerRail;
    use crate::storage::mock::FailingStorage;
    use crate::storage::FsStorage;
    use crate::writer::parse_sections;
    use chrono::{TimeZone, Utc};
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        store: SettingsStore,
        storage: Arc<FailingStorage>,
        fail: Arc<AtomicBool>,
        hardware: Arc<MockHardware>,
        link: MockLink,
    }

    fn fixture(settings: Settings) -> Fixture {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.toml"));
        store.save(&settings).unwrap();
        let fail = Arc::new(AtomicBool::new(false));
        let storage = Arc::new(FailingStorage {
            inner: FsStorage::new(dir.path().join("logs")).unwrap(),
            fail: fail.clone(),
        });
        Fixture {
            _dir: dir,
            store,
            storage,
            fail,
            hardware: Arc::new(MockHardware::default()),
            link: MockLink::new(32),
        }
    }

    fn engine(fixture: &Fixture, hour: u32) -> (Engine, EngineHandle) {
        let link = fixture.link.clone();
        let links: LinkFactory = Arc::new(move || Box::new(link.clone()) as Box<dyn RadioLink>);
        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 10, 16, hour, 0, 0).unwrap()));
        Engine::new(
            fixture.store.clone(),
            SensorRegistry::with_builtins(fixture.hardware.as_ref()),
            fixture.hardware.clone(),
            fixture.storage.clone(),
            clock,
            links,
            OpLog::disabled(),
        )
    }

    fn recording_settings(sensors: &[&str]) -> Settings {
        Settings {
            period: 5,
            record: sensors.iter().map(|s| s.to_string()).collect(),
            peer_address: Some("E8:1F:2A:00:11:22".to_string()),
            ..Settings::default()
        }
    }

    #[test]
    fn test_enable_recording_persists_file() {
        let fixture = fixture(recording_settings(&["accel", "hrm"]));
        let (mut engine, _handle) = engine(&fixture, 10);

        engine.apply(Command::SetRecording(true));

        let status = engine.status();
        assert!(status.recording);
        assert!(status.running);
        assert_eq!(status.sensors, vec!["accel", "hrm"]);
        assert_eq!(status.file.as_deref(), Some("05_2026-10-16.csv"));

        let stored = fixture.store.load();
        assert!(stored.recording);
        assert_eq!(stored.file.as_deref(), Some("05_2026-10-16.csv"));
        assert!(fixture.storage.exists("05_2026-10-16.csv"));
    }

    #[test]
    fn test_ticks_write_rows_with_expected_width() {
        let fixture = fixture(recording_settings(&["accel", "hrm"]));
        let (mut engine, _handle) = engine(&fixture, 10);

        engine.apply(Command::SetRecording(true));
        for _ in 0..3 {
            engine.apply(Command::Reading(Reading::HeartRate { bpm: 71.0 }));
            engine.on_tick();
        }
        engine.apply(Command::SetRecording(false));

        let text = String::from_utf8(fixture.storage.read("05_2026-10-16.csv").unwrap()).unwrap();
        let sections = parse_sections(&text);
        assert_eq!(sections[0].rows.len(), 3);
        assert!(sections[0].rows.iter().all(|r| r.len() == 1 + 3 + 1));
    }

    #[test]
    fn test_write_failure_disables_recording() {
        let fixture = fixture(recording_settings(&["hrm"]));
        let (mut engine, _handle) = engine(&fixture, 10);

        engine.apply(Command::SetRecording(true));
        fixture.fail.store(true, Ordering::SeqCst);
        engine.on_tick();

        assert!(!engine.status().running);
        assert!(!engine.settings().recording);
        assert!(!fixture.store.load().recording);
        assert_eq!(
            fixture.hardware.calls(),
            vec![(PowerRail::HeartRate, true), (PowerRail::HeartRate, false)]
        );
    }

    #[test]
    fn test_toggle_sensor_restarts_with_new_section() {
        let fixture = fixture(recording_settings(&["accel", "hrm"]));
        let (mut engine, _handle) = engine(&fixture, 10);

        engine.apply(Command::SetRecording(true));
        engine.on_tick();
        engine.apply(Command::ToggleSensor("accel".to_string()));
        engine.on_tick();

        assert_eq!(engine.status().sensors, vec!["hrm"]);
        assert!(!fixture.store.load().record.contains("accel"));

        let text = String::from_utf8(fixture.storage.read("05_2026-10-16.csv").unwrap()).unwrap();
        let sections = parse_sections(&text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].header, vec!["Time", "Heartrate"]);
        assert_eq!(sections[1].rows.len(), 1);
    }

    #[test]
    fn test_toggle_unknown_sensor_is_ignored() {
        let fixture = fixture(recording_settings(&["hrm"]));
        let (mut engine, _handle) = engine(&fixture, 10);

        engine.apply(Command::ToggleSensor("baro".to_string()));
        assert!(!engine.settings().record.contains("baro"));
    }

    #[test]
    fn test_period_change_restarts_scheduler() {
        let fixture = fixture(recording_settings(&["hrm"]));
        let (mut engine, _handle) = engine(&fixture, 10);

        engine.apply(Command::SetRecording(true));
        engine.apply(Command::SetPeriod(50));
        assert_eq!(engine.session.scheduler().interval(), Some(Duration::from_millis(20)));
        assert!(engine.status().running);

        engine.apply(Command::SetPeriod(0));
        assert_eq!(engine.settings().period, 50);
    }

    #[test]
    fn test_delete_refuses_active_file() {
        let fixture = fixture(recording_settings(&["hrm"]));
        let (mut engine, _handle) = engine(&fixture, 10);

        engine.apply(Command::SetRecording(true));
        assert!(matches!(
            engine.delete_file("05_2026-10-16.csv"),
            Err(StorageError::FileInUse(_))
        ));

        engine.apply(Command::SetRecording(false));
        engine.delete_file("05_2026-10-16.csv").unwrap();
        assert!(engine.log_files().is_empty());
    }

    async fn wait_for_transfer_state<F>(handle: &EngineHandle, done: F) -> TransferStatus
    where
        F: Fn(&TransferStatus) -> bool,
    {
        for _ in 0..400 {
            if let Some(EngineStatus {
                transfer: Some(transfer),
                ..
            }) = handle.status().await
            {
                if done(&transfer) {
                    return transfer;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("transfer did not reach the expected state");
    }

    async fn wait_for_transfer(handle: &EngineHandle) -> TransferStatus {
        wait_for_transfer_state(handle, TransferStatus::is_finished).await
    }

    #[test]
    fn test_settings_written_elsewhere_survive() {
        let fixture = fixture(recording_settings(&["hrm"]));
        let (mut engine, _handle) = engine(&fixture, 10);

        // Another process edits the record after the engine loaded it
        fixture
            .store
            .update(|s| s.peer_address = Some("C0:FF:EE:00:00:01".to_string()))
            .unwrap();
        engine.apply(Command::SetPeriod(10));

        let stored = fixture.store.load();
        assert_eq!(stored.period, 10);
        assert_eq!(stored.peer_address.as_deref(), Some("C0:FF:EE:00:00:01"));
        assert_eq!(engine.settings(), &stored);
    }

    #[test]
    fn test_send_missing_file_outside_runtime() {
        let fixture = fixture(recording_settings(&["hrm"]));
        let (mut engine, _handle) = engine(&fixture, 10);

        engine.apply(Command::SendFile("05_2026-01-01.csv".to_string()));

        let transfer = engine.status().transfer.unwrap();
        assert_eq!(
            transfer.state,
            TransferState::Failed(TransferError::FileNotFound("05_2026-01-01.csv".to_string()))
        );
    }

    #[tokio::test]
    async fn test_new_send_releases_previous_link() {
        let mut settings = recording_settings(&["hrm"]);
        settings.transfer.chunk_pacing_ms = 100;
        let fixture = fixture(settings);
        let content = "2026-10-15 10:00:00.000,60\n".repeat(8);
        fixture
            .storage
            .create("05_2026-10-15.csv")
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();
        let (engine, handle) = engine(&fixture, 10);
        let runner = tokio::spawn(engine.event_loop());
        let sending = |s: &TransferStatus| s.state == TransferState::Sending;

        handle.send(Command::SendFile("05_2026-10-15.csv".to_string()));
        wait_for_transfer_state(&handle, sending).await;

        handle.send(Command::SendFile("05_2026-10-15.csv".to_string()));
        wait_for_transfer_state(&handle, sending).await;
        // The first link was closed before the second one opened
        assert_eq!(fixture.link.connects(), 2);
        assert_eq!(fixture.link.disconnects(), 1);

        // Shutting down mid-transfer closes the second link too
        handle.shutdown();
        runner.await.unwrap();
        assert_eq!(fixture.link.disconnects(), 2);
    }

    #[tokio::test]
    async fn test_send_file_while_recording() {
        let mut settings = recording_settings(&["hrm"]);
        settings.transfer.chunk_pacing_ms = 0;
        let fixture = fixture(settings);
        fixture
            .storage
            .create("05_2026-10-15.csv")
            .unwrap()
            .write_all(b"Time,Heartrate\n2026-10-15 10:00:00.000,60\n")
            .unwrap();
        let (engine, handle) = engine(&fixture, 10);
        let runner = tokio::spawn(engine.event_loop());

        handle.set_recording(true);
        handle.send(Command::SendFile("05_2026-10-15.csv".to_string()));
        let transfer = wait_for_transfer(&handle).await;

        assert_eq!(transfer.state, TransferState::Completed);
        assert_eq!(transfer.bytes_sent, transfer.total);
        assert!(handle.status().await.unwrap().running);

        handle.shutdown();
        runner.await.unwrap();
        assert!(fixture.link.sent().len() >= 3);
    }

    #[tokio::test]
    async fn test_send_missing_file() {
        let fixture = fixture(recording_settings(&["hrm"]));
        let (engine, handle) = engine(&fixture, 10);
        let runner = tokio::spawn(engine.event_loop());

        handle.send(Command::SendFile("05_2026-01-01.csv".to_string()));
        let transfer = wait_for_transfer(&handle).await;
        assert_eq!(
            transfer.state,
            TransferState::Failed(TransferError::FileNotFound("05_2026-01-01.csv".to_string()))
        );

        handle.shutdown();
        runner.await.unwrap();
        assert_eq!(fixture.link.connects(), 0);
    }

    #[tokio::test]
    async fn test_resumes_persisted_recording() {
        let mut settings = recording_settings(&["hrm"]);
        settings.recording = true;
        let fixture = fixture(settings);
        let (engine, handle) = engine(&fixture, 10);
        let runner = tokio::spawn(engine.event_loop());

        let status = handle.status().await.unwrap();
        assert!(status.running);

        handle.shutdown();
        runner.await.unwrap();
        // Shutdown releases the sensor but keeps the persisted flag
        assert_eq!(fixture.hardware.calls().last(), Some(&(PowerRail::HeartRate, false)));
        assert!(fixture.store.load().recording);
    }
}
