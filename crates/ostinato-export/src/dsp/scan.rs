//! Post-render peak/loudness scan (EBU R128 / ITU-R BS.1770).

use ebur128::{EbuR128, Mode};

/// Result of the post-render scan.
#[derive(Debug, Clone, Copy)]
pub struct LoudnessScan {
    /// Integrated loudness in LUFS.
    pub integrated_lufs: f64,
    /// Maximum true peak in dBTP.
    pub true_peak_dbtp: f64,
    /// Sample peak in dBFS.
    pub sample_peak_dbfs: f64,
    /// True when peaks exceed 0 dBFS. A warning, never an error.
    pub clipped: bool,
}

/// One-shot scan of a rendered stereo pair.
pub fn scan_loudness(left: &[f32], right: &[f32], sample_rate: u32) -> LoudnessScan {
    let len = left.len().min(right.len());

    let sample_peak = left[..len]
        .iter()
        .chain(&right[..len])
        .fold(0.0f32, |m, &s| m.max(s.abs()));
    let sample_peak_dbfs = if sample_peak > 0.0 {
        20.0 * (sample_peak as f64).log10()
    } else {
        -144.0
    };

    let mut integrated_lufs = -70.0;
    let mut true_peak_dbtp = -144.0;
    if let Ok(mut meter) = EbuR128::new(2, sample_rate, Mode::I | Mode::TRUE_PEAK) {
        if len > 0 {
            let _ = meter.add_frames_planar_f32(&[&left[..len], &right[..len]]);
        }
        integrated_lufs = meter.loudness_global().unwrap_or(-70.0);
        let peak = meter
            .true_peak(0)
            .unwrap_or(0.0)
            .max(meter.true_peak(1).unwrap_or(0.0));
        if peak > 0.0 {
            true_peak_dbtp = 20.0 * peak.log10();
        }
    }

    LoudnessScan {
        integrated_lufs,
        true_peak_dbtp,
        sample_peak_dbfs,
        clipped: sample_peak_dbfs > 0.0 || true_peak_dbtp > 0.0,
    }
}
