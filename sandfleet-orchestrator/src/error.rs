use sandfleet_common::MachineState;
use std::time::Duration;

/// Coarse classification callers use to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or missing settings. Fatal at startup.
    Configuration,
    /// Cloud/database faults and timeouts. The same call may succeed later.
    Transient,
    /// The caller asked for something that breaks a controller invariant.
    Invariant,
}

#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("machine '{label}' is not registered")]
    NotFound { label: String },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("cloud operation '{operation}' failed: {source:#}")]
    Cloud {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{resource} turned into state '{actual}' instead of '{expected}'")]
    UnexpectedState {
        resource: String,
        expected: String,
        actual: String,
    },

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("database error: {0:#}")]
    Database(#[source] anyhow::Error),
}

impl MachineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MachineError::Configuration(_) => ErrorKind::Configuration,
            MachineError::NotFound { .. } | MachineError::InvariantViolation(_) => {
                ErrorKind::Invariant
            }
            MachineError::Cloud { .. }
            | MachineError::UnexpectedState { .. }
            | MachineError::Timeout { .. }
            | MachineError::Database(_) => ErrorKind::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub(crate) fn cloud(operation: impl Into<String>, source: anyhow::Error) -> Self {
        MachineError::Cloud {
            operation: operation.into(),
            source,
        }
    }

    pub(crate) fn already_stopped(label: &str) -> Self {
        MachineError::InvariantViolation(format!(
            "trying to stop an already stopped machine: {}",
            label
        ))
    }

    pub(crate) fn wrong_state(label: &str, expected: MachineState, actual: MachineState) -> Self {
        MachineError::InvariantViolation(format!(
            "instance '{}' state '{}' is not {}",
            label, actual, expected
        ))
    }
}

pub type MachineResult<T> = Result<T, MachineError>;
