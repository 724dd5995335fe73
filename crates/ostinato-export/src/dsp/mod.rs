//! Offline DSP for the export path: dither, resampling, loudness scan.

mod dither;
mod resample;
mod scan;

pub use dither::Ditherer;
pub use resample::{resample_stereo, ResampleQuality};
pub use scan::{scan_loudness, LoudnessScan};
