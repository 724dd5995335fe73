//! Auxiliary send.

use crate::graph::{NodePorts, PortDecl, ProcessBlock};
use crate::node::ProcessingNode;
use crate::parameter::ParameterSpec;
use crate::smooth::SmoothedValue;
use serde::{Deserialize, Serialize};

const SMOOTH_SECS: f32 = 0.005;

pub const PARAM_AMOUNT: u32 = 0;

static SEND_PARAMS: [ParameterSpec; 1] = [ParameterSpec::new(PARAM_AMOUNT, "amount", 0.0, 2.0, 1.0)];

/// Whether a send carries audio or events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SendKind {
    #[default]
    Audio,
    Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendConfig {
    pub kind: SendKind,
}

/// Scales its input by `amount` toward an auxiliary destination.
///
/// Enable/disable and the destination itself live on the send's outgoing
/// connections; disabling those never touches the node or the graph's
/// acyclicity determination. Event sends pass their stream through untouched.
pub struct ChannelSend {
    kind: SendKind,
    amount: SmoothedValue,
    amp: Vec<f32>,
}

impl ChannelSend {
    pub fn new(kind: SendKind) -> Self {
        Self {
            kind,
            amount: SmoothedValue::new(1.0, SMOOTH_SECS, 44100.0),
            amp: Vec::new(),
        }
    }

    pub fn config(&self) -> SendConfig {
        SendConfig { kind: self.kind }
    }

    fn run_segment(&mut self, block: &mut ProcessBlock<'_>, start: usize, end: usize) {
        for i in start..end {
            self.amp[i] = self.amount.next();
        }
        for ch in 0..2 {
            let (input, output) = block.audio_in_out(ch, ch);
            let end = end.min(input.len()).min(output.len());
            for i in start..end {
                output[i] = input[i] * self.amp[i];
            }
        }
    }
}

impl ProcessingNode for ChannelSend {
    fn name(&self) -> &str {
        match self.kind {
            SendKind::Audio => "send",
            SendKind::Event => "event-send",
        }
    }

    fn ports(&self) -> NodePorts {
        match self.kind {
            SendKind::Audio => NodePorts::stereo_through(),
            SendKind::Event => NodePorts::new(
                vec![PortDecl::event("in")],
                vec![PortDecl::event("out")],
            ),
        }
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &SEND_PARAMS
    }

    fn prepare(&mut self, sample_rate: f64, max_block_size: usize) {
        self.amount.set_sample_rate(SMOOTH_SECS, sample_rate);
        self.amp.resize(max_block_size, 0.0);
    }

    fn process(&mut self, block: &mut ProcessBlock<'_>) {
        if self.kind == SendKind::Event {
            block.copy_through();
            return;
        }

        let n = block.n_samples();
        let mut cursor = 0usize;
        for idx in 0..block.param_events().len() {
            let event = block.param_events()[idx];
            let offset = block.event_offset(&event);
            if offset > cursor {
                self.run_segment(block, cursor, offset);
                cursor = offset;
            }
            if event.param == PARAM_AMOUNT {
                self.amount.set_target(event.value);
            }
        }
        if cursor < n {
            self.run_segment(block, cursor, n);
        }
    }
}
