//! # Scheduler Error Types
//!
//! Everything about ordering is checked when the schedule is built. The only
//! errors a running frame can produce come from the systems themselves.

use thiserror::Error;

use tessera_core::StoreError;

/// Errors raised while building or running a schedule.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    /// Two systems share a name.
    #[error("duplicate system: {0}")]
    DuplicateSystem(String),

    /// A system names a phase that is not in the phase list.
    #[error("system {system} uses unknown phase {phase}")]
    UnknownPhase {
        /// System name.
        system: String,
        /// Phase name.
        phase: String,
    },

    /// An ordering hint names a system that was never registered.
    #[error("system {system} references unknown system {reference}")]
    UnknownSystem {
        /// System declaring the hint.
        system: String,
        /// Missing target.
        reference: String,
    },

    /// A system has neither a phase nor a hint to derive one from.
    #[error("system {0} has no phase")]
    NoPhase(String),

    /// Ordering hints contradict the phase order.
    #[error("cannot place system {system}: {reason}")]
    Unsatisfiable {
        /// System that cannot be placed.
        system: String,
        /// What went wrong.
        reason: String,
    },

    /// Ordering hints form a cycle.
    #[error("ordering cycle among systems: {}", .0.join(", "))]
    Cycle(Vec<String>),

    /// Scheduler configuration is invalid.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// A system returned an error. The rest of its phase completed; later
    /// phases of that frame did not run.
    #[error("system {system} failed: {message}")]
    SystemFailed {
        /// System name.
        system: String,
        /// Error message reported by the system.
        message: String,
    },

    /// A system panicked.
    #[error("system {0} panicked")]
    SystemPanicked(String),

    /// The background service thread could not be started.
    #[error("failed to start scheduler thread: {0}")]
    Spawn(String),

    /// The background service thread died.
    #[error("scheduler service thread panicked")]
    ServicePanicked,

    /// Store error while validating the schedule.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for scheduler operations.
pub type ScheduleResult<T> = Result<T, ScheduleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_systems() {
        let err = ScheduleError::Cycle(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "ordering cycle among systems: a, b");
    }
}
