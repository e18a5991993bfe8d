//! # Scheduler Configuration
//!
//! Loaded once at startup, usually from TOML:
//!
//! ```toml
//! target_fps = 120
//! parallel = true
//! log_frame_timing = false
//! phases = ["input", "update", "render"]
//! ```
//!
//! Missing keys take their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ScheduleError, ScheduleResult};
use crate::phase::default_phases;

/// Scheduler configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Frames per second driven by the frame clock. Also fixes `delta_time`.
    pub target_fps: u32,
    /// Phase names in execution order.
    pub phases: Vec<String>,
    /// Run independent systems of a phase on separate threads.
    pub parallel: bool,
    /// Log each frame's duration at debug level.
    pub log_frame_timing: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            phases: default_phases(),
            parallel: true,
            log_frame_timing: false,
        }
    }
}

impl SchedulerConfig {
    /// Parses and validates a TOML configuration.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::InvalidConfig`] for malformed TOML or invalid values.
    pub fn from_toml_str(source: &str) -> ScheduleResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| ScheduleError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the frame rate and phase list.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::InvalidConfig`] for a zero frame rate, an empty phase
    /// list, or duplicate phase names.
    pub fn validate(&self) -> ScheduleResult<()> {
        if self.target_fps == 0 {
            return Err(ScheduleError::InvalidConfig("target_fps must be positive".into()));
        }
        if self.phases.is_empty() {
            return Err(ScheduleError::InvalidConfig("phase list is empty".into()));
        }
        for (i, phase) in self.phases.iter().enumerate() {
            if self.phases[..i].contains(phase) {
                return Err(ScheduleError::InvalidConfig(format!("duplicate phase {phase}")));
            }
        }
        Ok(())
    }

    /// Fixed time step reported to systems, in seconds.
    #[must_use]
    pub fn delta_time(&self) -> f64 {
        1.0 / f64::from(self.target_fps.max(1))
    }

    /// Wall-clock duration of one frame.
    #[must_use]
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.target_fps.max(1)))
    }
}
