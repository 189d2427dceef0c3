//! Spring-mass-damper integrator: `m·x'' + c·x' + k·x = 0` advanced with a
//! fixed-step semi-implicit Euler scheme.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Parameters of one integration run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscillatorConfig {
    pub mass: f64,
    pub damping: f64,
    pub stiffness: f64,
    pub x0: f64,
    pub v0: f64,
    pub t_end: f64,
    pub dt: f64,
}

impl Default for OscillatorConfig {
    fn default() -> Self {
        Self {
            mass: 1.0,
            damping: 0.2,
            stiffness: 10.0,
            x0: 1.0,
            v0: 0.0,
            t_end: 10.0,
            dt: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("{field} must be a finite number, got {value}")]
    NonFinite { field: &'static str, value: f64 },
    #[error("mass must be greater than zero, got {0}")]
    NonPositiveMass(f64),
    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: f64 },
    #[error("dt must be greater than zero, got {0}")]
    NonPositiveStep(f64),
}

impl OscillatorConfig {
    /// Field names in positional order.
    pub const FIELDS: [&'static str; 7] = ["mass", "damping", "stiffness", "x0", "v0", "t_end", "dt"];

    pub fn field(&self, name: &str) -> Option<f64> {
        Some(match name {
            "mass" => self.mass,
            "damping" => self.damping,
            "stiffness" => self.stiffness,
            "x0" => self.x0,
            "v0" => self.v0,
            "t_end" => self.t_end,
            "dt" => self.dt,
            _ => return None,
        })
    }

    /// Returns false when `name` is not a field.
    pub fn set_field(&mut self, name: &str, value: f64) -> bool {
        let slot = match name {
            "mass" => &mut self.mass,
            "damping" => &mut self.damping,
            "stiffness" => &mut self.stiffness,
            "x0" => &mut self.x0,
            "v0" => &mut self.v0,
            "t_end" => &mut self.t_end,
            "dt" => &mut self.dt,
            _ => return false,
        };
        *slot = value;
        true
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        for name in Self::FIELDS {
            let value = self.field(name).unwrap_or(f64::NAN);
            if !value.is_finite() {
                return Err(SimulationError::NonFinite { field: name, value });
            }
        }
        if self.mass <= 0.0 {
            return Err(SimulationError::NonPositiveMass(self.mass));
        }
        if self.damping < 0.0 {
            return Err(SimulationError::Negative { field: "damping", value: self.damping });
        }
        if self.stiffness < 0.0 {
            return Err(SimulationError::Negative { field: "stiffness", value: self.stiffness });
        }
        if self.dt <= 0.0 {
            return Err(SimulationError::NonPositiveStep(self.dt));
        }
        Ok(())
    }

    /// `floor(t_end / dt) + 1`, or 0 when `t_end` is negative.
    ///
    /// The integrator accumulates `t` by repeated addition, so the real count
    /// may differ from this by one sample near `t_end`.
    pub fn estimated_samples(&self) -> u64 {
        if self.t_end.is_nan() || self.t_end < 0.0 || self.dt.is_nan() || self.dt <= 0.0 {
            return 0;
        }
        let steps = (self.t_end / self.dt).floor();
        if steps >= u64::MAX as f64 {
            u64::MAX
        } else {
            steps as u64 + 1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySample {
    pub time: f64,
    pub position: f64,
}

/// Samples in increasing time order, starting at `t = 0`.
///
/// Serializes in column form, `{"time": [...], "position": [...]}`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trajectory {
    samples: Vec<TrajectorySample>,
}

impl Trajectory {
    pub fn samples(&self) -> &[TrajectorySample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&TrajectorySample> {
        self.samples.last()
    }

    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.time).collect()
    }

    pub fn positions(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.position).collect()
    }
}

#[derive(Serialize, Deserialize)]
struct Columns {
    time: Vec<f64>,
    position: Vec<f64>,
}

impl Serialize for Trajectory {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Columns { time: self.times(), position: self.positions() }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Trajectory {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let cols = Columns::deserialize(deserializer)?;
        if cols.time.len() != cols.position.len() {
            return Err(serde::de::Error::custom("time and position have different lengths"));
        }
        let samples = cols
            .time
            .into_iter()
            .zip(cols.position)
            .map(|(time, position)| TrajectorySample { time, position })
            .collect();
        Ok(Self { samples })
    }
}

/// Integrate the oscillator from `t = 0` while `t <= t_end`.
pub fn simulate(config: &OscillatorConfig) -> Result<Trajectory, SimulationError> {
    config.validate()?;

    let c_over_m = config.damping / config.mass;
    let k_over_m = config.stiffness / config.mass;
    let dt = config.dt;

    let mut samples = Vec::with_capacity(config.estimated_samples().min(1 << 20) as usize);
    let (mut x, mut v) = (config.x0, config.v0);
    let mut t = 0.0;

    while t <= config.t_end {
        samples.push(TrajectorySample { time: t, position: x });
        let a = -c_over_m * v - k_over_m * x;
        // velocity first, then position with the updated velocity
        v += a * dt;
        x += v * dt;
        t += dt;
    }

    Ok(Trajectory { samples })
}
