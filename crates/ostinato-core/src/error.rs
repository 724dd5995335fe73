//! Error types for ostinato-core.

use crate::graph::{ConnectionId, NodeId, PortId};
use thiserror::Error;

/// Errors from structural graph operations.
///
/// Every variant is raised *before* any mutation takes place; a failed
/// operation leaves the graph exactly as it was.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("connecting {src:?} -> {dest:?} would create a cycle")]
    Cycle { src: PortId, dest: PortId },

    #[error("port kinds do not match: {source_kind} -> {dest_kind}")]
    KindMismatch {
        source_kind: &'static str,
        dest_kind: &'static str,
    },

    #[error("connection source must be an output port and destination an input port")]
    Direction,

    #[error("unknown node: {0:?}")]
    DanglingNode(NodeId),

    #[error("unknown port: {0:?}")]
    DanglingPort(PortId),

    #[error("unknown connection: {0:?}")]
    DanglingConnection(ConnectionId),

    #[error("a port cannot be connected to its own node")]
    SelfLoop,

    #[error("connection {0:?} already exists between these ports")]
    DuplicateConnection(ConnectionId),
}

/// Errors from backend negotiation and lifecycle.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("no audio backend accepts the requested configuration")]
    NoBackend,

    #[error("backend '{0}' is not available")]
    UnknownBackend(String),

    #[error("sample rate {0} Hz not supported by the selected backend")]
    UnsupportedSampleRate(u32),

    #[error("buffer size {0} not supported by the selected backend")]
    UnsupportedBufferSize(u32),

    #[cfg(feature = "cpal")]
    #[error("no default output device")]
    DeviceNotAvailable(#[from] cpal::DefaultStreamConfigError),

    #[cfg(feature = "cpal")]
    #[error("failed to build audio stream")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[cfg(feature = "cpal")]
    #[error("failed to start audio stream")]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// Errors from engine lifecycle and command application.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("operation requires engine state {required}, but engine is {actual}")]
    InvalidState {
        required: &'static str,
        actual: &'static str,
    },

    #[error("command queue is full; the realtime thread is not draining")]
    CommandQueueFull,

    #[error("invalid tempo: {0} BPM")]
    InvalidTempo(f64),

    #[error("invalid loop range: start={start}, end={end}")]
    InvalidLoopRange { start: u64, end: u64 },

    #[error("invalid time signature: {numerator}/{denominator}")]
    InvalidTimeSignature { numerator: u32, denominator: u32 },
}

/// Errors from restoring a persisted graph state.
#[derive(Error, Debug)]
pub enum RestoreError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("snapshot references node kind '{0}' that cannot be rebuilt")]
    UnknownNodeKind(String),

    #[error("snapshot is internally inconsistent: {0}")]
    Corrupt(String),
}

/// Result type alias.
pub type Result<T, E = EngineError> = core::result::Result<T, E>;
