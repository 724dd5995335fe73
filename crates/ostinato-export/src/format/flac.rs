//! FLAC encoding via flacenc. Lossless 16/24-bit only.

use crate::error::{ExportError, Result};
use crate::options::{BitDepth, ExportOptions};
use flacenc::bitsink::ByteSink;
use flacenc::component::BitRepr;
use flacenc::config::Encoder as EncoderConfig;
use flacenc::encode_with_fixed_block_size;
use flacenc::error::Verify;
use flacenc::source::MemSource;
use std::io::Write;
use std::path::Path;

const FLAC_BLOCK_SIZE: usize = 4096;

/// Write a processed stereo (or downmixed mono) pair as FLAC.
///
/// TODO: embed title/artist/genre as vorbis comments once flacenc exposes
/// metadata blocks.
pub fn write_flac(
    path: &Path,
    left: &[f32],
    right: &[f32],
    sample_rate: u32,
    options: &ExportOptions,
) -> Result<()> {
    if left.len() != right.len() {
        return Err(ExportError::InvalidData(
            "left and right channels have different lengths".into(),
        ));
    }
    if options.bit_depth == BitDepth::Float32 {
        return Err(ExportError::UnsupportedFormat(
            "FLAC does not support 32-bit float; use 16-bit or 24-bit".into(),
        ));
    }
    let bits_per_sample = options.bit_depth.bits() as usize;

    let (samples, channels) = if options.mono {
        let mono: Vec<i32> = left
            .iter()
            .zip(right)
            .map(|(&l, &r)| float_to_int((l + r) * 0.5, options.bit_depth))
            .collect();
        (mono, 1usize)
    } else {
        let mut interleaved = Vec::with_capacity(left.len() * 2);
        for i in 0..left.len() {
            interleaved.push(float_to_int(left[i], options.bit_depth));
            interleaved.push(float_to_int(right[i], options.bit_depth));
        }
        (interleaved, 2usize)
    };

    let config = EncoderConfig::default()
        .into_verified()
        .map_err(|e| ExportError::Encoding(format!("invalid FLAC config: {e:?}")))?;
    let source = MemSource::from_samples(&samples, channels, bits_per_sample, sample_rate as usize);
    let stream = encode_with_fixed_block_size(&config, source, FLAC_BLOCK_SIZE)
        .map_err(|e| ExportError::Encoding(format!("FLAC encoding failed: {e:?}")))?;

    let mut sink = ByteSink::new();
    stream
        .write(&mut sink)
        .map_err(|e| ExportError::Encoding(format!("FLAC stream write failed: {e:?}")))?;

    let mut file = std::fs::File::create(path)?;
    file.write_all(&sink.into_inner())?;
    Ok(())
}

#[inline]
fn float_to_int(sample: f32, bit_depth: BitDepth) -> i32 {
    let clamped = sample.clamp(-1.0, 1.0);
    match bit_depth {
        BitDepth::Int16 => (clamped * 32767.0) as i32,
        BitDepth::Int24 => (clamped * 8_388_607.0) as i32,
        BitDepth::Float32 => unreachable!("rejected above"),
    }
}
