//! # Sensor Capability Module
//!
//! A capability is one sensor source with a uniform lifecycle:
//! `start` claims hardware, readings accumulate while started, `drain` hands
//! the values collected since the previous drain to the scheduler and resets
//! the accumulator to zero, and `stop` releases the hardware again.
//!
//! ## Built-in sources
//! | key     | name  | columns                      | power rail  |
//! |---------|-------|------------------------------|-------------|
//! | `accel` | Accel | AccelX, AccelY, AccelZ       | none        |
//! | `hrm`   | HR    | Heartrate                    | HeartRate   |
//! | `baro`  | Baro  | Temperature                  | Barometer   |
//!
//! Externally registered sources carry their own columns and are fed through
//! `Reading::External` with a matching `source` key.

use crate::hardware::{Hardware, PowerRail, Reading};

/// Which source a capability reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityKind {
    Accelerometer,
    HeartRate,
    Barometer,
    External,
}

impl CapabilityKind {
    fn power_rail(&self) -> Option<PowerRail> {
        match self {
            CapabilityKind::HeartRate => Some(PowerRail::HeartRate),
            CapabilityKind::Barometer => Some(PowerRail::Barometer),
            CapabilityKind::Accelerometer | CapabilityKind::External => None,
        }
    }
}

/// Static description of a capability as stored in the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDescriptor {
    /// Selection key used in settings (`accel`, `hrm`, ...)
    pub key: String,
    /// Display name
    pub name: String,
    /// Ordered column names this capability contributes to a row
    pub fields: Vec<String>,
    pub kind: CapabilityKind,
}

impl SensorDescriptor {
    pub fn new(key: &str, name: &str, fields: &[&str], kind: CapabilityKind) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            kind,
        }
    }

    pub fn accelerometer() -> Self {
        Self::new("accel", "Accel", &["AccelX", "AccelY", "AccelZ"], CapabilityKind::Accelerometer)
    }

    pub fn heart_rate() -> Self {
        Self::new("hrm", "HR", &["Heartrate"], CapabilityKind::HeartRate)
    }

    pub fn barometer() -> Self {
        Self::new("baro", "Baro", &["Temperature"], CapabilityKind::Barometer)
    }

    /// Create a live, stopped capability from this descriptor
    pub fn instantiate(&self) -> SensorCapability {
        SensorCapability {
            descriptor: self.clone(),
            values: vec![0.0; self.fields.len()],
            started: false,
        }
    }
}

/// A live sensor source owned by the active recorder set
#[derive(Debug)]
pub struct SensorCapability {
    descriptor: SensorDescriptor,
    values: Vec<f64>,
    started: bool,
}

impl SensorCapability {
    pub fn key(&self) -> &str {
        &self.descriptor.key
    }

    pub fn fields(&self) -> &[String] {
        &self.descriptor.fields
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Claim hardware; a second call while started does nothing
    pub fn start(&mut self, hardware: &dyn Hardware) {
        if self.started {
            return;
        }
        if let Some(rail) = self.descriptor.kind.power_rail() {
            hardware.set_power(rail, true);
        }
        self.values.iter_mut().for_each(|v| *v = 0.0);
        self.started = true;
    }

    /// Release hardware; a second call while stopped does nothing
    pub fn stop(&mut self, hardware: &dyn Hardware) {
        if !self.started {
            return;
        }
        if let Some(rail) = self.descriptor.kind.power_rail() {
            hardware.set_power(rail, false);
        }
        self.started = false;
    }

    /// Take a reading if it belongs to this source. Ignored while stopped.
    pub fn on_reading(&mut self, reading: &Reading) {
        if !self.started {
            return;
        }

        match (&self.descriptor.kind, reading) {
            (CapabilityKind::Accelerometer, Reading::Accel { x, y, z }) => {
                self.values = vec![*x, *y, *z];
            }
            (CapabilityKind::HeartRate, Reading::HeartRate { bpm }) => {
                self.values = vec![*bpm];
            }
            (CapabilityKind::Barometer, Reading::Pressure { temperature, .. }) => {
                self.values = vec![*temperature];
            }
            (CapabilityKind::External, Reading::External { source, values })
                if *source == self.descriptor.key =>
            {
                // Pad or truncate to the declared column count
                let width = self.descriptor.fields.len();
                let mut row: Vec<f64> = values.iter().copied().take(width).collect();
                row.resize(width, 0.0);
                self.values = row;
            }
            _ => {}
        }
    }

    /// Return the values collected since the last drain and reset them to zero
    pub fn drain(&mut self) -> Vec<f64> {
        let width = self.descriptor.fields.len();
        std::mem::replace(&mut self.values, vec![0.0; width])
    }
}
