//! # Sensor Capability Registry
//!
//! Ordered table of every sensor source the device can record, keyed by the
//! selection key used in settings. Registration order is fixed at startup
//! (built-ins first, then extensions in discovery order) and decides the
//! column order of log headers.
//!
//! ## Extension points
//! - `RegistryExtension`: code that inserts capabilities before the engine starts
//! - `*.sensor.toml` descriptor files in the storage directory, read in
//!   file-name order:
//!
//! ```toml
//! [[sensor]]
//! key = "spo2"
//! name = "SpO2"
//! fields = ["SpO2", "Quality"]
//! ```

use crate::error::SensorError;
use crate::hardware::Hardware;
use crate::recorder::TIME_COLUMN;
use crate::sensor::{CapabilityKind, SensorCapability, SensorDescriptor};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DESCRIPTOR_SUFFIX: &str = ".sensor.toml";

/// Load-time hook that may insert one or more capabilities
pub trait RegistryExtension {
    fn extend(&self, registry: &mut SensorRegistry);
}

#[derive(Debug, Deserialize)]
struct DescriptorFile {
    #[serde(default)]
    sensor: Vec<DescriptorEntry>,
}

#[derive(Debug, Deserialize)]
struct DescriptorEntry {
    key: String,
    name: Option<String>,
    fields: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SensorRegistry {
    descriptors: Vec<SensorDescriptor>,
}

impl SensorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in capabilities. The barometer is only present when the platform
    /// reports pressure sensing.
    pub fn with_builtins(hardware: &dyn Hardware) -> Self {
        let mut registry = Self::empty();
        registry.descriptors.push(SensorDescriptor::accelerometer());
        registry.descriptors.push(SensorDescriptor::heart_rate());
        if hardware.has_pressure_sensor() {
            registry.descriptors.push(SensorDescriptor::barometer());
        }
        registry
    }

    /// Built-ins, then code extensions, then descriptor files from `dir`
    pub fn discover(
        hardware: &dyn Hardware,
        extensions: &[Box<dyn RegistryExtension>],
        dir: Option<&Path>,
    ) -> Self {
        let mut registry = Self::with_builtins(hardware);
        for extension in extensions {
            extension.extend(&mut registry);
        }
        if let Some(dir) = dir {
            let loaded = registry.load_descriptor_files(dir);
            if loaded > 0 {
                log::info!("Registered {} external sensor(s) from {}", loaded, dir.display());
            }
        }
        registry
    }

    /// Append a capability; the first registration of a key wins
    pub fn register(&mut self, descriptor: SensorDescriptor) -> Result<(), SensorError> {
        if self.contains(&descriptor.key) {
            return Err(SensorError::DuplicateSensor(descriptor.key));
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn list(&self) -> &[SensorDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, key: &str) -> Option<&SensorDescriptor> {
        self.descriptors.iter().find(|d| d.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn instantiate(&self, key: &str) -> Result<SensorCapability, SensorError> {
        self.get(key)
            .map(SensorDescriptor::instantiate)
            .ok_or_else(|| SensorError::UnknownSensor(key.to_string()))
    }

    /// Register every `[[sensor]]` entry of the descriptor files in `dir`.
    /// Unreadable files and duplicate keys are skipped with a warning.
    pub fn load_descriptor_files(&mut self, dir: &Path) -> usize {
        let mut loaded = 0;

        for path in descriptor_paths(dir) {
            let contents = match fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(e) => {
                    log::warn!("Skipping descriptor {}: {}", path.display(), e);
                    continue;
                }
            };
            let file: DescriptorFile = match toml::from_str(&contents) {
                Ok(file) => file,
                Err(e) => {
                    log::warn!("Skipping descriptor {}: {}", path.display(), e);
                    continue;
                }
            };

            for entry in file.sensor {
                if let Err(reason) = validate_entry(&entry) {
                    log::warn!(
                        "Skipping sensor entry {:?} in {}: {}",
                        entry.key,
                        path.display(),
                        reason
                    );
                    continue;
                }
                let descriptor = SensorDescriptor {
                    name: entry.name.unwrap_or_else(|| entry.key.clone()),
                    key: entry.key,
                    fields: entry.fields,
                    kind: CapabilityKind::External,
                };
                match self.register(descriptor) {
                    Ok(()) => loaded += 1,
                    Err(e) => log::warn!("{} ({})", e, path.display()),
                }
            }
        }

        loaded
    }
}

/// Keys are single feed-line tokens; field names must be usable as CSV
/// header cells next to `Time`
fn validate_entry(entry: &DescriptorEntry) -> Result<(), String> {
    if entry.key.is_empty() || entry.key.contains(|c: char| c.is_whitespace() || c == ',') {
        return Err("key must be one word without commas".to_string());
    }
    if entry.fields.is_empty() {
        return Err("no fields".to_string());
    }
    for field in &entry.fields {
        if field.trim().is_empty() || field.contains([',', '\r', '\n']) {
            return Err(format!("invalid field name {:?}", field));
        }
        if field == TIME_COLUMN {
            return Err(format!("field name {} is reserved", TIME_COLUMN));
        }
    }
    Ok(())
}

fn descriptor_paths(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| name.ends_with(DESCRIPTOR_SUFFIX))
        })
        .collect();
    paths.sort();
    paths
}
