//! Macro modulator: one control fanned out to scalable CV outputs.

use crate::graph::{NodePorts, PortDecl, ProcessBlock};
use crate::node::ProcessingNode;
use crate::parameter::{ParameterSpec, ParameterScale, SmoothingPolicy};
use serde::{Deserialize, Serialize};

pub const PARAM_MACRO: u32 = 0;
/// Depth parameter id for CV output `i` is `PARAM_DEPTH_BASE + i`.
pub const PARAM_DEPTH_BASE: u32 = 1;

pub const MAX_CV_OUTPUTS: usize = 8;

const CV_NAMES: [&str; MAX_CV_OUTPUTS] = [
    "cv_1", "cv_2", "cv_3", "cv_4", "cv_5", "cv_6", "cv_7", "cv_8",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroConfig {
    pub outputs: usize,
}

/// One user-facing macro knob driving several CV outputs.
///
/// The macro value comes from the control input when anything is connected
/// to it (automation, another modulator), otherwise from the `macro` param.
/// Each CV output is the macro scaled by its own depth, so a single knob can
/// sweep several plugin parameters with independent amounts and polarity.
/// Outputs are block-rate.
pub struct MacroProcessor {
    outputs: usize,
    macro_value: f32,
    depth: [f32; MAX_CV_OUTPUTS],
    params: Vec<ParameterSpec>,
}

impl MacroProcessor {
    pub fn new(outputs: usize) -> Self {
        let outputs = outputs.clamp(1, MAX_CV_OUTPUTS);
        let mut params = vec![ParameterSpec {
            id: PARAM_MACRO,
            name: std::borrow::Cow::Borrowed("macro"),
            min: 0.0,
            max: 1.0,
            default: 0.0,
            scale: ParameterScale::Linear,
            smoothing: SmoothingPolicy::Stepped,
        }];
        for i in 0..outputs {
            params.push(ParameterSpec {
                id: PARAM_DEPTH_BASE + i as u32,
                name: std::borrow::Cow::Borrowed(CV_NAMES[i]),
                min: -1.0,
                max: 1.0,
                default: 1.0,
                scale: ParameterScale::Linear,
                smoothing: SmoothingPolicy::Stepped,
            });
        }
        Self {
            outputs,
            macro_value: 0.0,
            depth: [1.0; MAX_CV_OUTPUTS],
            params,
        }
    }

    pub fn config(&self) -> MacroConfig {
        MacroConfig {
            outputs: self.outputs,
        }
    }
}

impl ProcessingNode for MacroProcessor {
    fn name(&self) -> &str {
        "macro"
    }

    fn ports(&self) -> NodePorts {
        NodePorts::new(
            vec![PortDecl::control("macro_in")],
            CV_NAMES[..self.outputs]
                .iter()
                .map(|name| PortDecl::control(name))
                .collect(),
        )
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &self.params
    }

    fn process(&mut self, block: &mut ProcessBlock<'_>) {
        for idx in 0..block.param_events().len() {
            let event = block.param_events()[idx];
            match event.param {
                PARAM_MACRO => self.macro_value = event.value.clamp(0.0, 1.0),
                id if id >= PARAM_DEPTH_BASE => {
                    let slot = (id - PARAM_DEPTH_BASE) as usize;
                    if slot < self.outputs {
                        self.depth[slot] = event.value.clamp(-1.0, 1.0);
                    }
                }
                _ => {}
            }
        }

        let value = if block.input_connected(0) {
            block.control_in(0).clamp(0.0, 1.0)
        } else {
            self.macro_value
        };

        for i in 0..self.outputs {
            block.set_control_out(i, value * self.depth[i]);
        }
    }
}
