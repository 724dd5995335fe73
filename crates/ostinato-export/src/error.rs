//! Export error types.

use thiserror::Error;

/// Errors from offline export.
///
/// An export failure aborts only the export: partial output files are
/// removed and the live engine state is untouched.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Invalid export range: start={start}, end={end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("Export cancelled")]
    Cancelled,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Resampling failed: {0}")]
    Resample(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rubato::ResamplerConstructionError> for ExportError {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        ExportError::Resample(e.to_string())
    }
}

impl From<rubato::ResampleError> for ExportError {
    fn from(e: rubato::ResampleError) -> Self {
        ExportError::Resample(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;
