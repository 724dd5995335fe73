//! Error types for plugin hosting.

use std::path::PathBuf;
use thiserror::Error;

/// Where in the instantiation pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Lookup,
    Opening,
    Spawning,
    Connecting,
    Instantiation,
    Activation,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStage::Lookup => write!(f, "looking up descriptor"),
            LoadStage::Opening => write!(f, "opening library"),
            LoadStage::Spawning => write!(f, "spawning server process"),
            LoadStage::Connecting => write!(f, "connecting to server"),
            LoadStage::Instantiation => write!(f, "creating instance"),
            LoadStage::Activation => write!(f, "activating"),
        }
    }
}

/// Plugin hosting errors.
///
/// All of these isolate the single affected unit: instantiation failures
/// leave the slot bypassed, process failures latch the node to silence. None
/// of them propagate into the engine lifecycle.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Unit '{0}' is not in the catalog or registry")]
    UnknownUnit(String),

    #[error("Load failed at {stage} stage: {path}\n  Reason: {reason}")]
    LoadFailed {
        path: PathBuf,
        stage: LoadStage,
        reason: String,
    },

    #[error("Unit panicked during {stage}")]
    Panicked { stage: LoadStage },

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
    },

    #[error("Server process crashed")]
    ProcessCrashed,

    #[error("Unit is latched failed; reload it first")]
    Failed,

    #[error("Failed to save unit state: {0}")]
    StateSave(String),

    #[error("Failed to restore unit state: {0}")]
    StateRestore(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_stage_display() {
        assert_eq!(LoadStage::Opening.to_string(), "opening library");
        assert_eq!(LoadStage::Spawning.to_string(), "spawning server process");
        assert_eq!(LoadStage::Instantiation.to_string(), "creating instance");
    }

    #[test]
    fn test_error_display() {
        let err = HostError::Timeout {
            operation: "process".into(),
            duration_ms: 50,
        };
        assert!(err.to_string().contains("50ms"));
        assert!(err.to_string().contains("process"));

        let err = HostError::UnknownUnit("acme.reverb".into());
        assert!(err.to_string().contains("acme.reverb"));
    }
}
