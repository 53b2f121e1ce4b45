//! # Transfer Session
//!
//! Streams a finished log file to the counterpart over a `RadioLink`.
//!
//! ## States
//! `Idle → Connecting → Sending → {Completed | Failed}`. A failed connection
//! goes back to `Connecting` only while the local time is inside the
//! configured quiet-hours window, after the retry backoff; outside it the
//! failure is terminal and reported to the caller.
//!
//! ## Wire format
//! Chunked (default):
//! ```text
//! {"t":"start","n":"05_2026-10-16.csv","size":5120}\n
//! <chunk_size bytes> <chunk_size bytes> ... <remainder>
//! {"t":"end","n":"05_2026-10-16.csv"}\n
//! ```
//! Envelope, for receivers that expect the whole file in one message:
//! ```text
//! {"t":"file","n":"05_2026-10-16.csv","c":"Time,...","timestamp":1792137600000}\n
//! ```
//! There is no per-chunk acknowledgement; a retry always resends the whole
//! file from offset 0.

use crate::clock::{self, Clock};
use crate::config::{TransferConfig, TransferMode};
use crate::connection::RadioLink;
use crate::error::{LinkError, TransferError};
use crate::oplog::OpLog;
use chrono::{DateTime, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Connecting,
    Sending,
    Completed,
    Failed(TransferError),
}

/// Snapshot of a transfer, shared with whoever asked for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStatus {
    pub state: TransferState,
    pub file: String,
    /// Content bytes handed to the link so far
    pub bytes_sent: usize,
    pub total: usize,
    pub attempts: u32,
}

impl TransferStatus {
    pub fn new(file: &str, total: usize) -> Self {
        Self {
            state: TransferState::Idle,
            file: file.to_string(),
            bytes_sent: 0,
            total,
            attempts: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, TransferState::Completed | TransferState::Failed(_))
    }
}

pub type SharedStatus = Arc<Mutex<TransferStatus>>;

/// Control messages framing a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum WireMessage {
    Start {
        n: String,
        size: usize,
    },
    End {
        n: String,
    },
    File {
        n: String,
        c: String,
        timestamp: i64,
    },
}

impl WireMessage {
    /// JSON line, newline terminated
    pub fn encode(&self) -> Vec<u8> {
        // Serializing a plain enum of strings and integers cannot fail
        let mut line = serde_json::to_vec(self).unwrap_or_default();
        line.push(b'\n');
        line
    }
}

/// When a failed connection may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// First local hour of the window
    pub quiet_start: u32,
    /// Local hour the window ends, exclusive
    pub quiet_end: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(quiet_start: u32, quiet_end: u32, backoff: Duration) -> Self {
        Self {
            quiet_start,
            quiet_end,
            backoff,
        }
    }

    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(
            config.quiet_hours_start,
            config.quiet_hours_end,
            Duration::from_secs(config.retry_backoff_secs),
        )
    }

    /// Whether `hour` (0..24) falls in the window; the window may wrap midnight
    pub fn in_quiet_hours(&self, hour: u32) -> bool {
        if self.quiet_start == self.quiet_end {
            false
        } else if self.quiet_start < self.quiet_end {
            hour >= self.quiet_start && hour < self.quiet_end
        } else {
            hour >= self.quiet_start || hour < self.quiet_end
        }
    }

    /// Backoff before the next attempt, or `None` when failure is terminal
    pub fn retry_delay(&self, local: DateTime<FixedOffset>) -> Option<Duration> {
        if self.in_quiet_hours(local.hour()) {
            Some(self.backoff)
        } else {
            None
        }
    }
}

pub struct TransferSession {
    file: String,
    content: Vec<u8>,
    peer: String,
    mode: TransferMode,
    chunk_size: usize,
    pacing: Duration,
    retry: RetryPolicy,
    locale_offset: i32,
    clock: Arc<dyn Clock>,
    oplog: OpLog,
    status: SharedStatus,
}

impl TransferSession {
    pub fn new(
        file: &str,
        content: Vec<u8>,
        peer: &str,
        config: &TransferConfig,
        locale_offset: i32,
        clock: Arc<dyn Clock>,
        oplog: OpLog,
    ) -> Self {
        let status = Arc::new(Mutex::new(TransferStatus::new(file, content.len())));
        Self {
            file: file.to_string(),
            content,
            peer: peer.to_string(),
            mode: config.mode,
            chunk_size: config.chunk_size.max(1),
            pacing: Duration::from_millis(config.chunk_pacing_ms),
            retry: RetryPolicy::from_config(config),
            locale_offset,
            clock,
            oplog,
            status,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Handle for observing progress while `run` is in flight
    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    fn update<F: FnOnce(&mut TransferStatus)>(&self, change: F) {
        if let Ok(mut status) = self.status.lock() {
            change(&mut status);
        }
    }

    fn fail(&self, error: TransferError) -> TransferError {
        log::error!("Transfer of {} failed: {}", self.file, error);
        self.oplog.error(format!("Transfer of {} failed: {}", self.file, error));
        self.update(|s| s.state = TransferState::Failed(error.clone()));
        error
    }

    /// Connect, stream the file and disconnect. Returns the bytes sent.
    pub async fn run(self, link: &mut dyn RadioLink) -> Result<usize, TransferError> {
        // The envelope carries the log as a JSON string
        if self.mode == TransferMode::Envelope && std::str::from_utf8(&self.content).is_err() {
            return Err(self.fail(TransferError::SendFailed {
                sent: 0,
                reason: "content is not valid UTF-8".to_string(),
            }));
        }

        self.connect(link).await?;

        self.update(|s| {
            s.state = TransferState::Sending;
            s.bytes_sent = 0;
        });

        let sent = match self.stream(link).await {
            Ok(sent) => sent,
            Err((sent, e)) => {
                let _ = link.disconnect().await;
                return Err(self.fail(TransferError::SendFailed {
                    sent,
                    reason: e.to_string(),
                }));
            }
        };

        if let Err(e) = link.disconnect().await {
            log::warn!("Disconnect after transfer failed: {}", e);
        }

        self.update(|s| s.state = TransferState::Completed);
        log::info!("Sent file {} ({} bytes)", self.file, sent);
        self.oplog.info(format!("Sent file {}", self.file));
        Ok(sent)
    }

    async fn connect(&self, link: &mut dyn RadioLink) -> Result<(), TransferError> {
        loop {
            self.update(|s| {
                s.state = TransferState::Connecting;
                s.attempts += 1;
            });

            let error = match link.connect(&self.peer).await {
                Ok(()) => {
                    self.oplog.info(format!("Connected to {}", self.peer));
                    return Ok(());
                }
                Err(e) => e,
            };

            let local = clock::to_local(self.clock.now(), self.locale_offset);
            let failure = TransferError::ConnectionFailure {
                address: self.peer.clone(),
                reason: error.to_string(),
            };

            match self.retry.retry_delay(local) {
                Some(delay) => {
                    log::warn!("{}, retrying in {:?}", failure, delay);
                    self.oplog.error(format!("Failed to connect to {}", self.peer));
                    tokio::time::sleep(delay).await;
                }
                None => return Err(self.fail(failure)),
            }
        }
    }

    async fn stream(&self, link: &mut dyn RadioLink) -> Result<usize, (usize, LinkError)> {
        match self.mode {
            TransferMode::Envelope => {
                let message = WireMessage::File {
                    n: self.file.clone(),
                    c: String::from_utf8_lossy(&self.content).into_owned(),
                    timestamp: clock::epoch_millis(self.clock.now()),
                };
                link.send(&message.encode()).await.map_err(|e| (0, e))?;
                let total = self.content.len();
                self.update(|s| s.bytes_sent = total);
                Ok(total)
            }
            TransferMode::Chunked => {
                let start = WireMessage::Start {
                    n: self.file.clone(),
                    size: self.content.len(),
                };
                link.send(&start.encode()).await.map_err(|e| (0, e))?;

                let chunk_size = self.chunk_size.min(link.max_payload().max(1));
                let mut sent = 0;
                for chunk in self.content.chunks(chunk_size) {
                    link.send(chunk).await.map_err(|e| (sent, e))?;
                    sent += chunk.len();
                    self.update(|s| s.bytes_sent = sent);
                    if !self.pacing.is_zero() {
                        tokio::time::sleep(self.pacing).await;
                    }
                }

                let end = WireMessage::End { n: self.file.clone() };
                link.send(&end.encode()).await.map_err(|e| (sent, e))?;
                Ok(sent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::connection::mock::MockLink;
    use chrono::{TimeZone, Utc};

    fn config(mode: TransferMode, chunk_size: usize) -> TransferConfig {
        TransferConfig {
            mode,
            chunk_size,
            chunk_pacing_ms: 0,
            ..TransferConfig::default()
        }
    }

    fn clock_at(hour: u32, minute: u32) -> Arc<dyn Clock> {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 10, 16, hour, minute, 0).unwrap()))
    }

    fn session(content: &[u8], config: &TransferConfig, clock: Arc<dyn Clock>) -> TransferSession {
        TransferSession::new(
            "05_2026-10-16.csv",
            content.to_vec(),
            "E8:1F:2A:00:11:22",
            config,
            0,
            clock,
            OpLog::disabled(),
        )
    }

    #[test]
    fn test_quiet_hours_window() {
        let policy = RetryPolicy::new(0, 1, Duration::from_secs(300));
        assert!(policy.in_quiet_hours(0));
        assert!(!policy.in_quiet_hours(1));
        assert!(!policy.in_quiet_hours(10));

        let wrapping = RetryPolicy::new(22, 2, Duration::from_secs(300));
        assert!(wrapping.in_quiet_hours(23));
        assert!(wrapping.in_quiet_hours(1));
        assert!(!wrapping.in_quiet_hours(2));

        let disabled = RetryPolicy::new(3, 3, Duration::from_secs(300));
        assert!((0..24).all(|h| !disabled.in_quiet_hours(h)));
    }

    #[test]
    fn test_retry_delay_by_local_time() {
        let policy = RetryPolicy::new(0, 1, Duration::from_secs(300));
        let at = |hour, minute| {
            clock::to_local(Utc.with_ymd_and_hms(2026, 10, 16, hour, minute, 0).unwrap(), 0)
        };
        let half_past_midnight = at(0, 30);
        let ten_am = at(10, 0);

        assert_eq!(policy.retry_delay(half_past_midnight), Some(Duration::from_secs(300)));
        assert_eq!(policy.retry_delay(ten_am), None);
    }

    #[test]
    fn test_wire_messages() {
        let start = WireMessage::Start {
            n: "a.csv".to_string(),
            size: 12,
        };
        assert_eq!(start.encode(), b"{\"t\":\"start\",\"n\":\"a.csv\",\"size\":12}\n".to_vec());

        let end = WireMessage::End { n: "a.csv".to_string() };
        assert_eq!(end.encode(), b"{\"t\":\"end\",\"n\":\"a.csv\"}\n".to_vec());
    }

    #[tokio::test]
    async fn test_chunked_transfer() {
        let content = b"Time,Heartrate\n2026-10-16 10:00:00.000,70\n";
        let mut link = MockLink::new(16);
        let session = session(content, &config(TransferMode::Chunked, 64), clock_at(10, 0));
        let status = session.status();

        let sent = session.run(&mut link).await.unwrap();
        assert_eq!(sent, content.len());

        let payloads = link.sent();
        // start marker, ceil(42 / 16) chunks, end marker
        assert_eq!(payloads.len(), 1 + 3 + 1);
        assert!(payloads.iter().skip(1).take(3).all(|p| p.len() <= 16));
        assert_eq!(payloads[1..4].concat(), content.to_vec());

        let start: WireMessage = serde_json::from_slice(&payloads[0]).unwrap();
        assert_eq!(
            start,
            WireMessage::Start {
                n: "05_2026-10-16.csv".to_string(),
                size: content.len(),
            }
        );

        let status = status.lock().unwrap().clone();
        assert_eq!(status.state, TransferState::Completed);
        assert_eq!(status.bytes_sent, content.len());
        assert_eq!(status.total, content.len());
    }

    #[tokio::test]
    async fn test_envelope_transfer() {
        let content = b"Time\n2026-10-16 10:00:00.000\n";
        let mut link = MockLink::new(20);
        let session = session(content, &config(TransferMode::Envelope, 64), clock_at(10, 0));

        session.run(&mut link).await.unwrap();

        let payloads = link.sent();
        assert_eq!(payloads.len(), 1);
        let value: serde_json::Value = serde_json::from_slice(&payloads[0]).unwrap();
        assert_eq!(value["t"], "file");
        assert_eq!(value["n"], "05_2026-10-16.csv");
        assert_eq!(value["c"], "Time\n2026-10-16 10:00:00.000\n");
        assert!(value["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn test_envelope_rejects_binary_content() {
        let mut link = MockLink::new(20);
        let config = config(TransferMode::Envelope, 64);
        let session = session(&[b'T', 0xff, 0xfe], &config, clock_at(10, 0));
        let status = session.status();

        let result = session.run(&mut link).await;

        assert!(matches!(result, Err(TransferError::SendFailed { sent: 0, .. })));
        assert_eq!(link.connects(), 0);
        assert!(status.lock().unwrap().is_finished());
    }

    #[tokio::test]
    async fn test_connection_failure_retried_in_quiet_hours() {
        let mut link = MockLink::new(64).failing_connects(1);
        let session = session(b"Time\n", &config(TransferMode::Chunked, 64), clock_at(0, 30))
            .with_retry_policy(RetryPolicy::new(0, 1, Duration::from_millis(10)));
        let status = session.status();

        let started = std::time::Instant::now();
        assert!(session.run(&mut link).await.is_ok());

        assert!(started.elapsed() >= Duration::from_millis(10));
        assert_eq!(link.connects(), 2);
        let status = status.lock().unwrap().clone();
        assert_eq!(status.attempts, 2);
        assert_eq!(status.state, TransferState::Completed);
    }

    #[tokio::test]
    async fn test_connection_failure_terminal_outside_quiet_hours() {
        let mut link = MockLink::new(64).failing_connects(1);
        let session = session(b"Time\n", &config(TransferMode::Chunked, 64), clock_at(10, 0))
            .with_retry_policy(RetryPolicy::new(0, 1, Duration::from_secs(300)));
        let status = session.status();

        let result = session.run(&mut link).await;

        assert!(matches!(result, Err(TransferError::ConnectionFailure { .. })));
        assert_eq!(link.connects(), 1);
        assert!(link.sent().is_empty());
        assert!(matches!(
            status.lock().unwrap().state,
            TransferState::Failed(TransferError::ConnectionFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_mid_transfer() {
        let mut link = MockLink::new(4);
        link.fail_after_sends = Some(3);
        let config = config(TransferMode::Chunked, 4);
        let session = session(b"0123456789abcdef", &config, clock_at(10, 0));
        let status = session.status();

        let result = session.run(&mut link).await;

        assert_eq!(
            result,
            Err(TransferError::SendFailed {
                sent: 8,
                reason: LinkError::Disconnected.to_string(),
            })
        );
        assert_eq!(status.lock().unwrap().bytes_sent, 8);
    }
}
