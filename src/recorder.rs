//! # Active Recorder Set
//!
//! Resolves the selected sensor keys against the registry into live
//! capabilities for one recording session and owns them until the session ends.
//!
//! ## Responsibilities
//! 1. Resolution in registry order; unknown keys are dropped with a warning
//! 2. Exactly one hardware claim per capability (`start_all`) and one release
//!    (`stop_all`), both safe to repeat
//! 3. Flattening one drained row across all capabilities
//! 4. Dispatching raw readings to the started capabilities

use crate::hardware::{Hardware, Reading};
use crate::registry::SensorRegistry;
use crate::sensor::SensorCapability;
use std::collections::BTreeSet;

/// Name of the first column of every log header
pub const TIME_COLUMN: &str = "Time";

#[derive(Debug, Default)]
pub struct ActiveRecorderSet {
    recorders: Vec<SensorCapability>,
}

impl ActiveRecorderSet {
    /// Live capabilities for `selected`, in registration order
    pub fn resolve(selected: &BTreeSet<String>, registry: &SensorRegistry) -> Self {
        for name in selected {
            if !registry.contains(name) {
                log::warn!("Sensor {} is not available, skipping", name);
            }
        }

        let recorders = registry
            .list()
            .iter()
            .filter(|descriptor| selected.contains(&descriptor.key))
            .map(|descriptor| descriptor.instantiate())
            .collect();

        Self { recorders }
    }

    pub fn len(&self) -> usize {
        self.recorders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorders.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.recorders.iter().map(|r| r.key()).collect()
    }

    pub fn start_all(&mut self, hardware: &dyn Hardware) {
        for recorder in self.recorders.iter_mut() {
            recorder.start(hardware);
        }
    }

    pub fn stop_all(&mut self, hardware: &dyn Hardware) {
        for recorder in self.recorders.iter_mut() {
            recorder.stop(hardware);
        }
    }

    pub fn any_started(&self) -> bool {
        self.recorders.iter().any(|r| r.is_started())
    }

    /// `Time` followed by every capability's columns
    pub fn header_columns(&self) -> Vec<String> {
        std::iter::once(TIME_COLUMN.to_string())
            .chain(self.recorders.iter().flat_map(|r| r.fields().iter().cloned()))
            .collect()
    }

    pub fn dispatch(&mut self, reading: &Reading) {
        for recorder in self.recorders.iter_mut() {
            recorder.on_reading(reading);
        }
    }

    /// Drain every capability in order into one flat row
    pub fn sample_row(&mut self) -> Vec<f64> {
        self.recorders.iter_mut().flat_map(|r| r.drain()).collect()
    }
}
