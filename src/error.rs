//! Top-level error type for the engine facade.

use thiserror::Error;

/// Errors surfaced by [`OstinatoEngine`](crate::OstinatoEngine).
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Engine(#[from] ostinato_core::EngineError),

    #[error(transparent)]
    Backend(#[from] ostinato_core::BackendError),

    #[error(transparent)]
    Restore(#[from] ostinato_core::RestoreError),

    #[cfg(feature = "plugin")]
    #[error(transparent)]
    Host(#[from] ostinato_plugin::HostError),

    #[cfg(feature = "export")]
    #[error(transparent)]
    Export(#[from] ostinato_export::ExportError),

    #[error("operation requires engine state {required}, but engine is {actual}")]
    InvalidState {
        required: &'static str,
        actual: &'static str,
    },

    #[error("unknown strip: {0}")]
    UnknownStrip(usize),

    #[error("unknown plugin node: {0:?}")]
    UnknownPlugin(ostinato_core::NodeId),
}

impl From<ostinato_core::GraphError> for Error {
    fn from(e: ostinato_core::GraphError) -> Self {
        Error::Engine(e.into())
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
