//! Parameter descriptors and level mappings.
//!
//! Parameters double as control ports: every spec here is addressable as an
//! automation/modulation target on its owning node.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Amplitude below which a signal is treated as silence.
pub const AMP_MIN: f32 = 0.000_001;

/// Convert decibels to linear amplitude.
#[inline]
pub fn db_to_amp(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels.
///
/// Amplitudes at or below [`AMP_MIN`] clamp to -120 dB.
#[inline]
pub fn amp_to_db(amp: f32) -> f32 {
    if amp <= AMP_MIN {
        -120.0
    } else {
        20.0 * amp.log10()
    }
}

/// Convert linear amplitude to a 0..1 fader position.
///
/// Uses the 192/198 logarithmic fader law common to control surfaces: unity
/// gain sits at ~0.824 of fader travel, leaving headroom up to +6 dB at the
/// top of the throw.
pub fn fader_val_from_amp(amp: f32) -> f32 {
    if amp <= AMP_MIN {
        return 0.0;
    }
    let ln2 = core::f32::consts::LN_2;
    let num = (6.0 * amp.ln() + 192.0 * ln2).powf(8.0);
    let den = (198.0 * ln2).powf(8.0);
    (num / den).clamp(0.0, 1.0)
}

/// Convert a 0..1 fader position back to linear amplitude.
pub fn amp_from_fader_val(val: f32) -> f32 {
    if val <= 0.0 {
        return 0.0;
    }
    let ln2 = core::f32::consts::LN_2;
    ((val.powf(1.0 / 8.0) * 198.0 * ln2 - 192.0 * ln2) / 6.0).exp()
}

/// Constant-power pan gains for placing a mono source in a stereo field.
///
/// `pan` is -1.0 (full left) .. 1.0 (full right); center attenuates both
/// channels by ~3 dB so perceived loudness stays constant across the sweep.
#[inline]
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * 0.5 * core::f32::consts::FRAC_PI_2;
    (angle.cos(), angle.sin())
}

/// Balance gains for an already-stereo pair.
///
/// Center leaves both channels at unity; moving off-center attenuates only
/// the far channel, so cascaded fader stages stay level-neutral.
#[inline]
pub fn balance_gains(pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    if pan > 0.0 {
        (1.0 - pan, 1.0)
    } else {
        (1.0, 1.0 + pan)
    }
}

/// How a parameter responds to automation events inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SmoothingPolicy {
    /// Ramp to the new value over the smoothing window.
    #[default]
    Ramped,
    /// Jump to the new value at the event's frame offset.
    Stepped,
}

/// Value scale, for display and surface mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParameterScale {
    #[default]
    Linear,
    /// Logarithmic fader-style travel (gain parameters).
    Fader,
    /// On/off, automated as 0.0 / 1.0.
    Toggle,
}

/// Description of one node parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Node-local parameter id, stable across sessions.
    pub id: u32,
    pub name: Cow<'static, str>,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub scale: ParameterScale,
    pub smoothing: SmoothingPolicy,
}

impl ParameterSpec {
    pub const fn new(id: u32, name: &'static str, min: f32, max: f32, default: f32) -> Self {
        Self {
            id,
            name: Cow::Borrowed(name),
            min,
            max,
            default,
            scale: ParameterScale::Linear,
            smoothing: SmoothingPolicy::Ramped,
        }
    }

    /// A parameter with a runtime-supplied name (hosted plugin parameters).
    pub fn dynamic(id: u32, name: String, min: f32, max: f32, default: f32) -> Self {
        Self {
            id,
            name: Cow::Owned(name),
            min,
            max,
            default,
            scale: ParameterScale::Linear,
            smoothing: SmoothingPolicy::Ramped,
        }
    }

    pub const fn fader(id: u32, name: &'static str, default: f32) -> Self {
        Self {
            id,
            name: Cow::Borrowed(name),
            min: 0.0,
            max: 2.0,
            default,
            scale: ParameterScale::Fader,
            smoothing: SmoothingPolicy::Ramped,
        }
    }

    pub const fn toggle(id: u32, name: &'static str, default: bool) -> Self {
        Self {
            id,
            name: Cow::Borrowed(name),
            min: 0.0,
            max: 1.0,
            default: if default { 1.0 } else { 0.0 },
            scale: ParameterScale::Toggle,
            smoothing: SmoothingPolicy::Stepped,
        }
    }

    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}
