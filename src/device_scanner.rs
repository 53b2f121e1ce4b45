use crate::error::LinkError;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Manager, Peripheral};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothDevice {
    pub address: String,
    pub name: String,
}

impl BluetoothDevice {
    pub fn new(address: String, name: String) -> Self {
        Self { address, name }
    }
}

/// Strip the address-type suffix some stacks append (`"aa:bb:... random"`)
pub fn normalize_address(address: &str) -> String {
    address
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}

async fn scan_peripherals(duration: Duration) -> Result<Vec<Peripheral>, LinkError> {
    let manager = Manager::new()
        .await
        .map_err(|e| LinkError::Connect(format!("Failed to create BLE manager: {}", e)))?;

    let adapters = manager
        .adapters()
        .await
        .map_err(|e| LinkError::Connect(format!("Failed to get adapters: {}", e)))?;

    let central = adapters.into_iter().next().ok_or(LinkError::NoAdapter)?;

    central
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| LinkError::Connect(format!("Failed to start scan: {}", e)))?;

    tokio::time::sleep(duration).await;

    central
        .stop_scan()
        .await
        .map_err(|e| LinkError::Connect(format!("Failed to stop scan: {}", e)))?;

    central
        .peripherals()
        .await
        .map_err(|e| LinkError::Connect(format!("Failed to get peripherals: {}", e)))
}

/// Scans for nearby devices that advertise a name
pub async fn scan_devices(duration: Duration) -> Result<Vec<BluetoothDevice>, LinkError> {
    let mut devices = Vec::new();

    for peripheral in scan_peripherals(duration).await? {
        if let Ok(Some(props)) = peripheral.properties().await {
            if let Some(local_name) = props.local_name {
                devices.push(BluetoothDevice::new(peripheral.address().to_string(), local_name));
            }
        }
    }

    Ok(devices)
}

/// Scan until `duration` elapses and return the peripheral at `address`
pub async fn find_peer(address: &str, duration: Duration) -> Result<Peripheral, LinkError> {
    let wanted = normalize_address(address);

    scan_peripherals(duration)
        .await?
        .into_iter()
        .find(|p| p.address().to_string().eq_ignore_ascii_case(&wanted))
        .ok_or_else(|| LinkError::PeerNotFound(address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("e8:1f:2a:00:11:22 random"), "E8:1F:2A:00:11:22");
        assert_eq!(normalize_address("E8:1F:2A:00:11:22"), "E8:1F:2A:00:11:22");
    }
}
