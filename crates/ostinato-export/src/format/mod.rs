//! Output containers.

#[cfg(feature = "flac")]
pub mod flac;
#[cfg(feature = "wav")]
pub mod wav;

use crate::error::{ExportError, Result};
use crate::options::{AudioFormat, ExportOptions};
use std::path::Path;

/// Encode a processed stereo pair into the configured container.
pub fn write_file(
    path: &Path,
    left: &[f32],
    right: &[f32],
    sample_rate: u32,
    options: &ExportOptions,
) -> Result<()> {
    match options.format {
        #[cfg(feature = "wav")]
        AudioFormat::Wav => wav::write_wav(path, left, right, sample_rate, options),
        #[cfg(feature = "flac")]
        AudioFormat::Flac => flac::write_flac(path, left, right, sample_rate, options),
        #[allow(unreachable_patterns)]
        other => Err(ExportError::UnsupportedFormat(format!(
            "{other:?} support is not compiled in"
        ))),
    }
}
