//! Track input processor: the head of every channel strip.

use crate::graph::{NodePorts, PortDecl, ProcessBlock};
use crate::node::ProcessingNode;
use crate::parameter::ParameterSpec;
use crate::smooth::SmoothedValue;

const SMOOTH_SECS: f32 = 0.005;

pub const PARAM_INPUT_GAIN: u32 = 0;
pub const PARAM_MONO: u32 = 1;

static TRACK_PARAMS: [ParameterSpec; 2] = [
    ParameterSpec::new(PARAM_INPUT_GAIN, "input_gain", 0.0, 2.0, 1.0),
    ParameterSpec::toggle(PARAM_MONO, "mono", false),
];

/// Passes track input through to the insert chain, with input trim and an
/// optional mono fold-down. Also forwards the track's event stream.
pub struct TrackProcessor {
    gain: SmoothedValue,
    mono: bool,
    amp: Vec<f32>,
}

impl TrackProcessor {
    pub fn new() -> Self {
        Self {
            gain: SmoothedValue::new(1.0, SMOOTH_SECS, 44100.0),
            mono: false,
            amp: Vec::new(),
        }
    }
}

impl Default for TrackProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingNode for TrackProcessor {
    fn name(&self) -> &str {
        "track-in"
    }

    fn ports(&self) -> NodePorts {
        NodePorts::new(
            vec![
                PortDecl::audio("in_l"),
                PortDecl::audio("in_r"),
                PortDecl::event("events_in"),
            ],
            vec![
                PortDecl::audio("out_l"),
                PortDecl::audio("out_r"),
                PortDecl::event("events_out"),
            ],
        )
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &TRACK_PARAMS
    }

    fn prepare(&mut self, sample_rate: f64, max_block_size: usize) {
        self.gain.set_sample_rate(SMOOTH_SECS, sample_rate);
        self.amp.resize(max_block_size, 0.0);
    }

    fn process(&mut self, block: &mut ProcessBlock<'_>) {
        block.copy_through();

        for idx in 0..block.param_events().len() {
            let event = block.param_events()[idx];
            match event.param {
                PARAM_INPUT_GAIN => self.gain.set_target(event.value),
                PARAM_MONO => self.mono = event.value > 0.5,
                _ => {}
            }
        }

        let n = block.n_samples();
        for i in 0..n {
            self.amp[i] = self.gain.next();
        }
        let mono = self.mono;
        let amp = &self.amp;
        let (left, right) = block.audio_out_pair(0, 1);
        let n = n.min(left.len()).min(right.len());
        for i in 0..n {
            let (mut l, mut r) = (left[i], right[i]);
            if mono {
                let m = (l + r) * 0.5;
                l = m;
                r = m;
            }
            left[i] = l * amp[i];
            right[i] = r * amp[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::NodeHarness;

    #[test]
    fn test_passthrough_at_unity() {
        let mut harness = NodeHarness::new(Box::new(TrackProcessor::new()), 48000.0, 128);
        harness.set_input_value(0.6);
        let out = harness.run_block(128);
        assert!((out[0][64] - 0.6).abs() < 1e-4);
    }

    #[test]
    fn test_input_trim() {
        let mut harness = NodeHarness::new(Box::new(TrackProcessor::new()), 48000.0, 256);
        harness.set_input_value(0.6);
        harness.set_param(PARAM_INPUT_GAIN, 0.5);
        harness.run_block(256);
        let out = harness.run_block(256);
        assert!((out[0][128] - 0.3).abs() < 1e-3);
    }

    #[test]
    fn test_mono_fold() {
        let mut harness = NodeHarness::new(Box::new(TrackProcessor::new()), 48000.0, 128);
        harness.set_input_channels(1.0, 0.0);
        harness.set_param(PARAM_MONO, 1.0);
        let out = harness.run_block(128);
        assert!((out[0][64] - 0.5).abs() < 1e-3);
        assert!((out[1][64] - 0.5).abs() < 1e-3);
    }
}
