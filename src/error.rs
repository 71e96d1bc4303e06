//! Custom error types for kun.

use thiserror::Error;

use crate::workflow::PhaseError;

/// Errors that can occur while assembling or running a phase workflow.
#[derive(Error, Debug)]
pub enum KunError {
    #[error("Unknown feature gate: {0}")]
    UnknownGate(String),

    #[error("Feature gate {name} is locked to {default} and cannot be overridden")]
    LockedGate { name: String, default: bool },

    #[error("Feature gate already registered: {0}")]
    DuplicateGate(String),

    #[error("Invalid feature gates: {0}")]
    InvalidFeatureGates(String),

    #[error("Duplicate phase name {name:?} under {parent:?}")]
    DuplicatePhase { parent: String, name: String },

    #[error("Invalid phase name: {0:?}")]
    InvalidPhaseName(String),

    #[error("Phase {phase:?} inherits unknown flag --{flag}")]
    UnknownFlag { phase: String, flag: String },

    #[error("Invalid phase selection: {0:?} does not exist")]
    InvalidSelection(String),

    #[error("Phase {phase:?} failed")]
    PhaseActionFailed {
        phase: String,
        completed: Vec<String>,
        #[source]
        source: PhaseError,
    },
}

impl KunError {
    /// Returns true if this error was detected before any phase ran.
    pub const fn is_configuration_error(&self) -> bool {
        !matches!(self, Self::PhaseActionFailed { .. })
    }

    /// Returns true if the failing phase reported that it may be retried.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::PhaseActionFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
