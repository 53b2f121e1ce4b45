//! # Hardware Abstraction Module
//!
//! The seam between the recording engine and the device: power rails that
//! sensor capabilities claim and release, platform feature probing, and the
//! raw `Reading` events the platform posts while sensors are powered.
//!
//! ## Key Components
//! - `Hardware`: trait implemented by the platform (or a test double)
//! - `PowerRail`: hardware blocks that must be powered explicitly
//! - `Reading`: one raw sample from a sensor source, passed through unfiltered
//! - `HostHardware`: host-side implementation that only logs power changes

/// Hardware blocks with an explicit power switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerRail {
    HeartRate,
    Barometer,
}

/// Platform services needed by sensor capabilities
pub trait Hardware: Send + Sync {
    /// Claim (`on = true`) or release a power rail
    fn set_power(&self, rail: PowerRail, on: bool);

    /// Whether the platform can sense pressure
    fn has_pressure_sensor(&self) -> bool;
}

/// Raw sample delivered by the platform
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Accel { x: f64, y: f64, z: f64 },
    HeartRate { bpm: f64 },
    Pressure { temperature: f64, pressure: f64 },
    /// Sample for an externally registered capability
    External { source: String, values: Vec<f64> },
}

impl Reading {
    /// Parse a whitespace separated feed line such as `accel 0.1 -0.2 0.98`,
    /// `hrm 72`, `baro 24.5 1013.2` or `<key> <v1> <v2> ...`
    pub fn parse_line(line: &str) -> Option<Reading> {
        let mut parts = line.split_whitespace();
        let source = parts.next()?;
        let values: Vec<f64> = parts.map(|p| p.parse::<f64>()).collect::<Result<_, _>>().ok()?;

        match (source, values.as_slice()) {
            ("accel", [x, y, z]) => Some(Reading::Accel { x: *x, y: *y, z: *z }),
            ("hrm", [bpm]) => Some(Reading::HeartRate { bpm: *bpm }),
            ("baro", [temperature, pressure]) => Some(Reading::Pressure {
                temperature: *temperature,
                pressure: *pressure,
            }),
            ("accel", _) | ("hrm", _) | ("baro", _) => None,
            (_, []) => None,
            (source, values) => Some(Reading::External {
                source: source.to_string(),
                values: values.to_vec(),
            }),
        }
    }
}

/// Hardware stand-in for running the engine on a host machine
#[derive(Debug, Clone, Default)]
pub struct HostHardware {
    pressure: bool,
}

impl HostHardware {
    pub fn new(pressure: bool) -> Self {
        Self { pressure }
    }
}

impl Hardware for HostHardware {
    fn set_power(&self, rail: PowerRail, on: bool) {
        log::debug!("Power {:?} {}", rail, if on { "on" } else { "off" });
    }

    fn has_pressure_sensor(&self) -> bool {
        self.pressure
    }
}
