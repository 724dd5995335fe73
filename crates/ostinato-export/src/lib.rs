//! Offline export for the ostinato engine.
//!
//! Renders the same graph the live scheduler evaluates, block by block, into
//! WAV or FLAC, with optional resampling and dither plus a post-render
//! peak/loudness scan.

pub mod error;
pub use error::{ExportError, Result};

pub mod options;
pub use options::{AudioFormat, BitDepth, DitherType, ExportMetadata, ExportOptions};

pub mod dsp;
pub use dsp::{resample_stereo, scan_loudness, Ditherer, LoudnessScan, ResampleQuality};

pub mod format;

pub mod renderer;
pub use renderer::{render_range, render_to_file, ExportRange, ProgressFn, RenderReport};
