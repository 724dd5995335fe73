//! Signal sources for wiring up sessions and tests.

use crate::graph::{NodePorts, PortDecl, ProcessBlock};
use crate::node::ProcessingNode;
use crate::parameter::{ParameterSpec, ParameterScale, SmoothingPolicy};
use serde::{Deserialize, Serialize};

pub const PARAM_FREQ: u32 = 0;
pub const PARAM_AMP: u32 = 1;

static SINE_PARAMS: [ParameterSpec; 2] = [
    ParameterSpec {
        id: PARAM_FREQ,
        name: std::borrow::Cow::Borrowed("frequency"),
        min: 1.0,
        max: 20_000.0,
        default: 440.0,
        scale: ParameterScale::Linear,
        smoothing: SmoothingPolicy::Stepped,
    },
    ParameterSpec::new(PARAM_AMP, "amplitude", 0.0, 1.0, 1.0),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SineConfig {
    pub frequency: f32,
    pub amplitude: f32,
}

/// Deterministic stereo sine generator.
///
/// Phase derives from the transport position rather than internal state, so
/// any render of the same range produces identical samples.
pub struct SineSource {
    frequency: f32,
    amplitude: f32,
}

impl SineSource {
    pub fn new(frequency: f32, amplitude: f32) -> Self {
        Self {
            frequency,
            amplitude,
        }
    }

    pub fn config(&self) -> SineConfig {
        SineConfig {
            frequency: self.frequency,
            amplitude: self.amplitude,
        }
    }

    pub fn from_config(config: &SineConfig) -> Self {
        Self::new(config.frequency, config.amplitude)
    }
}

impl ProcessingNode for SineSource {
    fn name(&self) -> &str {
        "sine"
    }

    fn ports(&self) -> NodePorts {
        NodePorts::stereo_source()
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &SINE_PARAMS
    }

    fn process(&mut self, block: &mut ProcessBlock<'_>) {
        for idx in 0..block.param_events().len() {
            let event = block.param_events()[idx];
            match event.param {
                PARAM_FREQ => self.frequency = event.value,
                PARAM_AMP => self.amplitude = event.value,
                _ => {}
            }
        }

        let start = block.transport().block_start;
        let rate = block.transport().sample_rate;
        let step = std::f64::consts::TAU * self.frequency as f64 / rate;
        let amp = self.amplitude;
        let n = block.n_samples();

        for ch in 0..2 {
            let out = block.audio_out(ch);
            for (i, sample) in out.iter_mut().take(n).enumerate() {
                *sample = (((start + i as u64) as f64) * step).sin() as f32 * amp;
            }
        }
    }
}

/// Constant CV source.
pub struct ControlSource {
    value: f32,
}

pub const PARAM_VALUE: u32 = 0;

static CONTROL_PARAMS: [ParameterSpec; 1] = [ParameterSpec {
    id: PARAM_VALUE,
    name: std::borrow::Cow::Borrowed("value"),
    min: -1.0,
    max: 1.0,
    default: 0.0,
    scale: ParameterScale::Linear,
    smoothing: SmoothingPolicy::Stepped,
}];

impl ControlSource {
    pub fn new(value: f32) -> Self {
        Self { value }
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

impl ProcessingNode for ControlSource {
    fn name(&self) -> &str {
        "control-source"
    }

    fn ports(&self) -> NodePorts {
        NodePorts::new(Vec::new(), vec![PortDecl::control("out")])
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &CONTROL_PARAMS
    }

    fn process(&mut self, block: &mut ProcessBlock<'_>) {
        for idx in 0..block.param_events().len() {
            let event = block.param_events()[idx];
            if event.param == PARAM_VALUE {
                self.value = event.value;
            }
        }
        let value = self.value;
        block.set_control_out(0, value);
    }
}

/// Silent stereo source. Outputs are pre-zeroed, so this is a no-op node.
pub struct NullSource;

impl ProcessingNode for NullSource {
    fn name(&self) -> &str {
        "null-source"
    }

    fn ports(&self) -> NodePorts {
        NodePorts::stereo_source()
    }

    fn process(&mut self, _block: &mut ProcessBlock<'_>) {}
}
