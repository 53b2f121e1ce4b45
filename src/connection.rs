//! # Radio Link Module
//!
//! The connection-oriented radio link a finished log is streamed over.
//! Delivery of individual writes is the link's responsibility; callers only
//! see connect / send / disconnect.
//!
//! ## Key Components
//! - `RadioLink`: async seam implemented by adapters and test doubles
//! - `BleLink`: Bluetooth LE adapter writing to the Nordic UART service of
//!   the counterpart, split into `max_payload` sized writes

use crate::device_scanner::find_peer;
use crate::error::LinkError;
use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use std::time::Duration;

/// Nordic UART service RX characteristic (central → peripheral)
pub const NUS_RX_CHARACTERISTIC: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";

/// Default BLE write size (ATT MTU 23 minus 3 bytes of header)
pub const DEFAULT_BLE_PAYLOAD: usize = 20;

#[async_trait]
pub trait RadioLink: Send {
    /// Establish a connection to the counterpart at `address`
    async fn connect(&mut self, address: &str) -> Result<(), LinkError>;

    /// Deliver one payload; returns once the link has accepted it
    async fn send(&mut self, payload: &[u8]) -> Result<(), LinkError>;

    async fn disconnect(&mut self) -> Result<(), LinkError>;

    /// Largest payload the link carries in one message
    fn max_payload(&self) -> usize;
}

/// Bluetooth LE link to a Nordic UART peripheral
pub struct BleLink {
    scan_time: Duration,
    payload: usize,
    peripheral: Option<Peripheral>,
    rx: Option<Characteristic>,
}

impl BleLink {
    pub fn new(scan_time: Duration, payload: usize) -> Self {
        Self {
            scan_time,
            payload: payload.max(1),
            peripheral: None,
            rx: None,
        }
    }
}

impl Default for BleLink {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), DEFAULT_BLE_PAYLOAD)
    }
}

#[async_trait]
impl RadioLink for BleLink {
    async fn connect(&mut self, address: &str) -> Result<(), LinkError> {
        let peripheral = find_peer(address, self.scan_time).await?;

        peripheral
            .connect()
            .await
            .map_err(|e| LinkError::Connect(e.to_string()))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| LinkError::Connect(e.to_string()))?;

        let rx = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid.to_string().eq_ignore_ascii_case(NUS_RX_CHARACTERISTIC));
        let rx = match rx {
            Some(rx) => rx,
            None => {
                let _ = peripheral.disconnect().await;
                return Err(LinkError::Connect(
                    "Peer does not expose the UART service".to_string(),
                ));
            }
        };

        log::info!("Connected to {}", address);
        self.peripheral = Some(peripheral);
        self.rx = Some(rx);
        Ok(())
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let (peripheral, rx) = match (&self.peripheral, &self.rx) {
            (Some(peripheral), Some(rx)) => (peripheral, rx),
            _ => return Err(LinkError::Disconnected),
        };

        for piece in payload.chunks(self.payload) {
            peripheral
                .write(rx, piece, WriteType::WithResponse)
                .await
                .map_err(|e| LinkError::Write(e.to_string()))?;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), LinkError> {
        self.rx = None;
        if let Some(peripheral) = self.peripheral.take() {
            peripheral
                .disconnect()
                .await
                .map_err(|e| LinkError::Connect(e.to_string()))?;
        }
        Ok(())
    }

    fn max_payload(&self) -> usize {
        self.payload
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory link that records payloads and fails on demand
    #[derive(Clone, Default)]
    pub struct MockLink {
        /// Number of upcoming `connect` calls that fail
        pub connect_failures: Arc<Mutex<usize>>,
        /// Fail every `send` after this many succeeded
        pub fail_after_sends: Option<usize>,
        pub connects: Arc<Mutex<usize>>,
        pub disconnects: Arc<Mutex<usize>>,
        pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
        pub payload: usize,
    }

    impl MockLink {
        pub fn new(payload: usize) -> Self {
            Self {
                payload,
                ..Self::default()
            }
        }

        pub fn failing_connects(self, count: usize) -> Self {
            *self.connect_failures.lock().unwrap() = count;
            self
        }

        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }

        pub fn connects(&self) -> usize {
            *self.connects.lock().unwrap()
        }

        pub fn disconnects(&self) -> usize {
            *self.disconnects.lock().unwrap()
        }
    }

    #[async_trait]
    impl RadioLink for MockLink {
        async fn connect(&mut self, address: &str) -> Result<(), LinkError> {
            *self.connects.lock().unwrap() += 1;
            let mut failures = self.connect_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(LinkError::PeerNotFound(address.to_string()));
            }
            Ok(())
        }

        async fn send(&mut self, payload: &[u8]) -> Result<(), LinkError> {
            let mut sent = self.sent.lock().unwrap();
            if self.fail_after_sends.map_or(false, |limit| sent.len() >= limit) {
                return Err(LinkError::Disconnected);
            }
            sent.push(payload.to_vec());
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), LinkError> {
            *self.disconnects.lock().unwrap() += 1;
            Ok(())
        }

        fn max_payload(&self) -> usize {
            self.payload
        }
    }
}
