//! Sample-rate conversion via rubato.

use crate::error::Result;
use rubato::{FftFixedIn, Resampler};

/// Resampling quality presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleQuality {
    Fast,
    #[default]
    Medium,
    High,
}

impl ResampleQuality {
    fn chunk_size(&self) -> usize {
        match self {
            ResampleQuality::Fast => 512,
            ResampleQuality::Medium => 1024,
            ResampleQuality::High => 4096,
        }
    }

    fn sub_chunks(&self) -> usize {
        match self {
            ResampleQuality::Fast => 1,
            ResampleQuality::Medium => 2,
            ResampleQuality::High => 8,
        }
    }
}

/// Resample a stereo pair. A no-op when the rates already match.
pub fn resample_stereo(
    left: &[f32],
    right: &[f32],
    source_rate: u32,
    target_rate: u32,
    quality: ResampleQuality,
) -> Result<(Vec<f32>, Vec<f32>)> {
    if source_rate == target_rate {
        return Ok((left.to_vec(), right.to_vec()));
    }

    let chunk_size = quality.chunk_size();
    let mut resampler = FftFixedIn::<f32>::new(
        source_rate as usize,
        target_rate as usize,
        chunk_size,
        quality.sub_chunks(),
        2,
    )?;

    let input_frames = left.len().min(right.len());
    let expected =
        (input_frames as f64 * target_rate as f64 / source_rate as f64).ceil() as usize;
    let mut out_left = Vec::with_capacity(expected + chunk_size);
    let mut out_right = Vec::with_capacity(expected + chunk_size);

    let mut pos = 0;
    while pos < input_frames {
        let needed = resampler.input_frames_next();
        let mut chunk_left = vec![0.0f32; needed];
        let mut chunk_right = vec![0.0f32; needed];
        let available = (input_frames - pos).min(needed);
        chunk_left[..available].copy_from_slice(&left[pos..pos + available]);
        chunk_right[..available].copy_from_slice(&right[pos..pos + available]);

        let output = resampler.process(&[chunk_left, chunk_right], None)?;
        out_left.extend_from_slice(&output[0]);
        out_right.extend_from_slice(&output[1]);
        pos += needed;
    }

    let final_len = expected.min(out_left.len());
    out_left.truncate(final_len);
    out_right.truncate(final_len);
    Ok((out_left, out_right))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(rate: u32, samples: usize) -> Vec<f32> {
        (0..samples)
            .map(|i| (std::f32::consts::TAU * 1000.0 * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_same_rate_is_identity() {
        let left = vec![0.1, 0.2, 0.3];
        let right = vec![0.4, 0.5, 0.6];
        let (l, r) = resample_stereo(&left, &right, 48000, 48000, ResampleQuality::Fast).unwrap();
        assert_eq!(l, left);
        assert_eq!(r, right);
    }

    #[test]
    fn test_upsample_length() {
        let src = sine(44100, 4410);
        let (l, r) =
            resample_stereo(&src, &src, 44100, 48000, ResampleQuality::Medium).unwrap();
        let expected = (4410.0 * 48000.0 / 44100.0) as i64;
        assert!((l.len() as i64 - expected).abs() < 100, "len {}", l.len());
        assert_eq!(l.len(), r.len());
    }

    #[test]
    fn test_downsample_length() {
        let src = sine(96000, 9600);
        let (l, _) = resample_stereo(&src, &src, 96000, 44100, ResampleQuality::High).unwrap();
        let expected = (9600.0 * 44100.0 / 96000.0) as i64;
        assert!((l.len() as i64 - expected).abs() < 100, "len {}", l.len());
    }
}
