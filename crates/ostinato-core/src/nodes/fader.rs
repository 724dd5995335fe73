//! Channel and master fader.

use crate::graph::{NodePorts, ProcessBlock};
use crate::lockfree::AtomicFlag;
use crate::node::ProcessingNode;
use crate::parameter::{balance_gains, ParameterSpec};
use crate::smooth::SmoothedValue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Monitor dim applied to non-listened channels while any listen is active.
const DIM_AMP: f32 = 0.25;
const SMOOTH_SECS: f32 = 0.005;

pub const PARAM_GAIN: u32 = 0;
pub const PARAM_PAN: u32 = 1;
pub const PARAM_MUTE: u32 = 2;
pub const PARAM_SOLO: u32 = 3;
pub const PARAM_LISTEN: u32 = 4;
pub const PARAM_MONO: u32 = 5;
pub const PARAM_PHASE: u32 = 6;

static FADER_PARAMS: [ParameterSpec; 7] = [
    ParameterSpec::fader(PARAM_GAIN, "gain", 1.0),
    ParameterSpec::new(PARAM_PAN, "pan", -1.0, 1.0, 0.0),
    ParameterSpec::toggle(PARAM_MUTE, "mute", false),
    ParameterSpec::toggle(PARAM_SOLO, "solo", false),
    ParameterSpec::toggle(PARAM_LISTEN, "listen", false),
    ParameterSpec::toggle(PARAM_MONO, "mono", false),
    ParameterSpec::toggle(PARAM_PHASE, "phase", false),
];

/// Whether a fader sits on a channel or on the master bus.
///
/// The master fader ignores solo gating and monitor dim; channels honor both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FaderKind {
    #[default]
    Channel,
    Master,
}

/// Solo/listen coordination shared by every fader in the engine.
///
/// The edit side recomputes the flags whenever any strip's solo or listen
/// state changes; faders only read them.
#[derive(Debug, Default)]
pub struct SoloState {
    pub any_solo: AtomicFlag,
    pub any_listen: AtomicFlag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaderConfig {
    pub kind: FaderKind,
}

/// Stereo fader: gain, balance (unity at center), mute/solo/listen,
/// mono-compat sum and phase invert.
///
/// Mute wins over solo: a muted fader is silent no matter what. With any solo
/// active, non-soloed channel faders are gated closed unless they are
/// listened. Gating ramps over the smoothing window to stay click-free.
pub struct Fader {
    kind: FaderKind,
    solo_state: Arc<SoloState>,
    gain: SmoothedValue,
    pan: f32,
    pan_l: SmoothedValue,
    pan_r: SmoothedValue,
    gate: SmoothedValue,
    mute: bool,
    solo: bool,
    listen: bool,
    mono: bool,
    phase: bool,
    amp_l: Vec<f32>,
    amp_r: Vec<f32>,
}

impl Fader {
    pub fn new(kind: FaderKind, solo_state: Arc<SoloState>) -> Self {
        let (pl, pr) = balance_gains(0.0);
        Self {
            kind,
            solo_state,
            gain: SmoothedValue::new(1.0, SMOOTH_SECS, 44100.0),
            pan: 0.0,
            pan_l: SmoothedValue::new(pl, SMOOTH_SECS, 44100.0),
            pan_r: SmoothedValue::new(pr, SMOOTH_SECS, 44100.0),
            gate: SmoothedValue::new(1.0, SMOOTH_SECS, 44100.0),
            mute: false,
            solo: false,
            listen: false,
            mono: false,
            phase: false,
            amp_l: Vec::new(),
            amp_r: Vec::new(),
        }
    }

    pub fn config(&self) -> FaderConfig {
        FaderConfig { kind: self.kind }
    }

    fn gate_target(&self) -> f32 {
        if self.mute {
            return 0.0;
        }
        if self.kind == FaderKind::Master {
            return 1.0;
        }
        if self.listen {
            return 1.0;
        }
        if self.solo_state.any_solo.get() && !self.solo {
            return 0.0;
        }
        if self.solo_state.any_listen.get() {
            return DIM_AMP;
        }
        1.0
    }

    fn apply_event(&mut self, param: u32, value: f32) {
        match param {
            PARAM_GAIN => self.gain.set_target(value),
            PARAM_PAN => {
                self.pan = value;
                let (l, r) = balance_gains(value);
                self.pan_l.set_target(l);
                self.pan_r.set_target(r);
            }
            PARAM_MUTE => self.mute = value > 0.5,
            PARAM_SOLO => self.solo = value > 0.5,
            PARAM_LISTEN => self.listen = value > 0.5,
            PARAM_MONO => self.mono = value > 0.5,
            PARAM_PHASE => self.phase = value > 0.5,
            _ => {}
        }
        if matches!(param, PARAM_MUTE | PARAM_SOLO | PARAM_LISTEN) {
            self.gate.set_target(self.gate_target());
        }
    }

    fn run_segment(&mut self, block: &mut ProcessBlock<'_>, start: usize, end: usize) {
        for i in start..end {
            let g = self.gain.next() * self.gate.next();
            self.amp_l[i] = g * self.pan_l.next();
            self.amp_r[i] = g * self.pan_r.next();
        }
        let mono = self.mono;
        let phase = self.phase;
        let (left, right) = block.audio_out_pair(0, 1);
        let end = end.min(left.len()).min(right.len());
        for i in start..end {
            let (mut l, mut r) = (left[i], right[i]);
            if mono {
                let m = (l + r) * 0.5;
                l = m;
                r = m;
            }
            if phase {
                l = -l;
                r = -r;
            }
            left[i] = l * self.amp_l[i];
            right[i] = r * self.amp_r[i];
        }
    }
}

impl ProcessingNode for Fader {
    fn name(&self) -> &str {
        match self.kind {
            FaderKind::Channel => "fader",
            FaderKind::Master => "master-fader",
        }
    }

    fn ports(&self) -> NodePorts {
        NodePorts::stereo_through()
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &FADER_PARAMS
    }

    fn prepare(&mut self, sample_rate: f64, max_block_size: usize) {
        self.gain.set_sample_rate(SMOOTH_SECS, sample_rate);
        self.pan_l.set_sample_rate(SMOOTH_SECS, sample_rate);
        self.pan_r.set_sample_rate(SMOOTH_SECS, sample_rate);
        self.gate.set_sample_rate(SMOOTH_SECS, sample_rate);
        self.amp_l.resize(max_block_size, 0.0);
        self.amp_r.resize(max_block_size, 0.0);
    }

    fn process(&mut self, block: &mut ProcessBlock<'_>) {
        block.copy_through();

        // Solo/listen flags may have changed since the last block.
        self.gate.set_target(self.gate_target());

        let n = block.n_samples();
        let mut cursor = 0usize;
        let events_end = block.param_events().len();
        for idx in 0..events_end {
            let event = block.param_events()[idx];
            let offset = block.event_offset(&event);
            if offset > cursor {
                self.run_segment(block, cursor, offset);
                cursor = offset;
            }
            self.apply_event(event.param, event.value);
        }
        if cursor < n {
            self.run_segment(block, cursor, n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::db_to_amp;
    use crate::test_util::NodeHarness;

    #[test]
    fn test_unity_passthrough() {
        let (mut harness, _) = harness_with_gain(1.0);
        harness.run_block(256);
        let out = harness.run_block(256);
        // Balance law: center leaves both channels at unity
        assert!((out[0][128] - 0.5).abs() < 1e-4);
        assert!((out[1][128] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_minus_six_db() {
        let (mut harness, _) = harness_with_gain(db_to_amp(-6.0));
        // Let the gain ramp settle, then measure
        harness.run_block(256);
        let out = harness.run_block(256);
        let expected = db_to_amp(-6.0) * 0.5;
        let peak = out[0].iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!((peak - expected).abs() < 1e-3, "peak {peak}");
    }

    fn harness_with_gain(amp: f32) -> (NodeHarness, Arc<SoloState>) {
        let solo = Arc::new(SoloState::default());
        let fader = Fader::new(FaderKind::Channel, Arc::clone(&solo));
        let mut harness = NodeHarness::new(Box::new(fader), 48000.0, 256);
        harness.set_input_value(0.5);
        harness.set_param(PARAM_GAIN, amp);
        (harness, solo)
    }

    #[test]
    fn test_mute_silences() {
        let (mut harness, _) = harness_with_gain(1.0);
        harness.set_param(PARAM_MUTE, 1.0);
        harness.run_block(256);
        harness.run_block(256); // gate fully closed after the ramp
        let out = harness.run_block(256);
        let peak = out[0].iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!(peak < 1e-6, "peak {peak}");
    }

    #[test]
    fn test_mute_wins_over_solo() {
        let (mut harness, solo) = harness_with_gain(1.0);
        solo.any_solo.set(true);
        harness.set_param(PARAM_SOLO, 1.0);
        harness.set_param(PARAM_MUTE, 1.0);
        harness.run_block(256);
        harness.run_block(256);
        let out = harness.run_block(256);
        let peak = out[0].iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!(peak < 1e-6);
    }

    #[test]
    fn test_other_solo_gates_this_channel() {
        let (mut harness, solo) = harness_with_gain(1.0);
        solo.any_solo.set(true); // someone else is soloed
        harness.run_block(256);
        harness.run_block(256);
        let out = harness.run_block(256);
        let peak = out[0].iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!(peak < 1e-6);
    }

    #[test]
    fn test_soloed_channel_passes() {
        let (mut harness, solo) = harness_with_gain(1.0);
        solo.any_solo.set(true);
        harness.set_param(PARAM_SOLO, 1.0);
        harness.run_block(256);
        let out = harness.run_block(256);
        let peak = out[0].iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!(peak > 0.3);
    }

    #[test]
    fn test_master_ignores_solo_gating() {
        let solo = Arc::new(SoloState::default());
        solo.any_solo.set(true);
        let fader = Fader::new(FaderKind::Master, Arc::clone(&solo));
        let mut harness = NodeHarness::new(Box::new(fader), 48000.0, 256);
        harness.set_input_value(0.5);
        harness.run_block(256);
        let out = harness.run_block(256);
        let peak = out[0].iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!(peak > 0.3);
    }

    #[test]
    fn test_phase_invert() {
        let (mut harness, _) = harness_with_gain(1.0);
        harness.set_param(PARAM_PHASE, 1.0);
        harness.run_block(256);
        let out = harness.run_block(256);
        // Input is +0.5; inverted output must be negative
        assert!(out[0][128] < 0.0);
    }

    #[test]
    fn test_mono_sums_channels() {
        let solo = Arc::new(SoloState::default());
        let fader = Fader::new(FaderKind::Channel, solo);
        let mut harness = NodeHarness::new(Box::new(fader), 48000.0, 256);
        harness.set_input_channels(0.8, 0.2);
        harness.set_param(PARAM_MONO, 1.0);
        harness.run_block(256);
        let out = harness.run_block(256);
        // Both channels carry (0.8+0.2)/2 = 0.5 pre-pan
        let (pl, pr) = balance_gains(0.0);
        assert!((out[0][128] - 0.5 * pl).abs() < 1e-3);
        assert!((out[1][128] - 0.5 * pr).abs() < 1e-3);
    }

    #[test]
    fn test_pan_full_left() {
        let (mut harness, _) = harness_with_gain(1.0);
        harness.set_param(PARAM_PAN, -1.0);
        harness.run_block(256);
        harness.run_block(256);
        let out = harness.run_block(256);
        assert!(out[0][128].abs() > 0.45);
        assert!(out[1][128].abs() < 1e-3);
    }
}
