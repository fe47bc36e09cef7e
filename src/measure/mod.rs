//! Latency measurement: delay scheduling, trigger key learning and the trial loop

mod delays;
mod learn;
mod run;
#[cfg(test)]
pub(crate) mod test_helpers;

pub use delays::{delays, delays_with_rng};
pub use learn::{learn_trigger_key, scan_keyboards, ScanHit};
pub use run::{Measurement, Phase};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One completed trial
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds from trigger assertion to the key press timestamp
    pub latency: f64,
    /// Full spread of the trigger timestamp, in seconds
    pub uncertainty: f64,
}

impl Sample {
    pub fn latency_ms(&self) -> f64 {
        self.latency * 1000.0
    }

    /// Half of the uncertainty spread, i.e. the +/- bound, in milliseconds
    pub fn half_width_ms(&self) -> f64 {
        self.uncertainty / 2.0 * 1000.0
    }
}

/// Parameters of one latency run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Key code to wait for; learned from the device when `None`
    pub key_code: Option<u16>,
    /// Shortest pause before a trial, in seconds
    pub min_delay: f64,
    /// Longest pause before a trial, in seconds
    pub max_delay: f64,
    pub iterations: usize,
    /// Per-read wait for the next event
    pub timeout: Duration,
    /// Pause after learning so stray release events drain
    pub settle: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            key_code: None,
            min_delay: 0.05,
            max_delay: 1.0,
            iterations: 100,
            timeout: Duration::from_secs(3),
            settle: Duration::from_millis(500),
        }
    }
}
