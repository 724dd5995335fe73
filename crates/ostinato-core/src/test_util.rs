//! In-crate test harness: drives a single node through a real executor.

#![allow(dead_code)]

use crate::commands::{CommandBatch, EngineCommand, ParamEvent, ParamEventBlock, PortLocation};
use crate::graph::{
    Connection, ConnectionId, GraphExecutor, NodeId, NodePorts, PortDecl, PortKind, ProcessBlock,
};
use crate::node::ProcessingNode;
use crate::parameter::ParameterSpec;
use crate::transport::TransportView;

/// Constant stereo source with settable channel values.
pub(crate) struct ConstSource {
    left: f32,
    right: f32,
}

pub(crate) const CONST_LEFT: u32 = 0;
pub(crate) const CONST_RIGHT: u32 = 1;

static CONST_PARAMS: [ParameterSpec; 2] = [
    ParameterSpec::new(CONST_LEFT, "left", -2.0, 2.0, 0.0),
    ParameterSpec::new(CONST_RIGHT, "right", -2.0, 2.0, 0.0),
];

impl ProcessingNode for ConstSource {
    fn name(&self) -> &str {
        "const-source"
    }

    fn ports(&self) -> NodePorts {
        NodePorts::stereo_source()
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &CONST_PARAMS
    }

    fn process(&mut self, block: &mut ProcessBlock<'_>) {
        for event in block.param_events().to_vec() {
            match event.param {
                CONST_LEFT => self.left = event.value,
                CONST_RIGHT => self.right = event.value,
                _ => {}
            }
        }
        let left = self.left;
        let right = self.right;
        block.audio_out(0).fill(left);
        block.audio_out(1).fill(right);
    }
}

/// Drives one node fed by a [`ConstSource`] through a real [`GraphExecutor`].
pub(crate) struct NodeHarness {
    executor: GraphExecutor,
    source: NodeId,
    target: NodeId,
    staged: Vec<ParamEvent>,
    events: ParamEventBlock,
    block_start: u64,
    sample_rate: f64,
}

impl NodeHarness {
    pub fn new(node: Box<dyn ProcessingNode>, sample_rate: f64, max_block: usize) -> Self {
        let mut executor = GraphExecutor::new(sample_rate, max_block);
        let source = NodeId(0);
        let target = NodeId(1);
        let target_ports = node.ports();

        let mut batch = CommandBatch::default();
        batch.commands.push(EngineCommand::AddNode {
            id: source,
            node: Box::new(ConstSource {
                left: 0.0,
                right: 0.0,
            }),
        });
        batch.commands.push(EngineCommand::AddNode { id: target, node });

        let audio_ins = target_ports
            .inputs
            .iter()
            .filter(|d| d.kind == PortKind::Audio)
            .count()
            .min(2);
        for ch in 0..audio_ins {
            let in_index = audio_input_index(&target_ports.inputs, ch);
            batch.commands.push(EngineCommand::Connect {
                connection: Connection {
                    id: ConnectionId(ch as u64),
                    source: crate::graph::PortId(100 + ch as u64),
                    dest: crate::graph::PortId(200 + ch as u64),
                    enabled: true,
                    multiplier: 1.0,
                    feedback: false,
                },
                src: PortLocation {
                    node: source,
                    index: ch,
                    kind: PortKind::Audio,
                },
                dst: PortLocation {
                    node: target,
                    index: in_index,
                    kind: PortKind::Audio,
                },
            });
        }
        executor.apply_batch(batch);

        Self {
            executor,
            source,
            target,
            staged: Vec::new(),
            events: ParamEventBlock::with_capacity(64),
            block_start: 0,
            sample_rate,
        }
    }

    pub fn set_input_value(&mut self, value: f32) {
        self.set_input_channels(value, value);
    }

    pub fn set_input_channels(&mut self, left: f32, right: f32) {
        self.staged.push(ParamEvent {
            node: self.source,
            param: CONST_LEFT,
            value: left,
            time: 0,
        });
        self.staged.push(ParamEvent {
            node: self.source,
            param: CONST_RIGHT,
            value: right,
            time: 0,
        });
    }

    pub fn set_param(&mut self, param: u32, value: f32) {
        self.staged.push(ParamEvent {
            node: self.target,
            param,
            value,
            time: 0,
        });
    }

    /// Schedule a parameter event at an absolute sample time.
    pub fn set_param_at(&mut self, param: u32, value: f32, time: u64) {
        self.staged.push(ParamEvent {
            node: self.target,
            param,
            value,
            time,
        });
    }

    pub fn connect_feedback(&mut self, from_channel: usize, to_channel: usize, multiplier: f32) {
        let conn_id = ConnectionId(1000);
        self.executor.apply_batch(CommandBatch::single(EngineCommand::Connect {
            connection: Connection {
                id: conn_id,
                source: crate::graph::PortId(300),
                dest: crate::graph::PortId(301),
                enabled: true,
                multiplier,
                feedback: true,
            },
            src: PortLocation {
                node: self.target,
                index: from_channel,
                kind: PortKind::Audio,
            },
            dst: PortLocation {
                node: self.target,
                index: to_channel,
                kind: PortKind::Audio,
            },
        }));
    }

    /// Run one block and return the target's audio outputs.
    pub fn run_block(&mut self, n: usize) -> Vec<Vec<f32>> {
        self.events.clear();
        for event in self.staged.drain(..) {
            self.events.push(event);
        }
        self.events.finish();

        let mut view = TransportView::stopped(self.sample_rate, n);
        view.block_start = self.block_start;
        self.executor.evaluate(&view, &self.events);
        self.block_start += n as u64;

        let mut out = Vec::new();
        let mut ch = 0;
        while let Some(buf) = self.executor.node_audio_out(self.target, ch, n) {
            out.push(buf.to_vec());
            ch += 1;
        }
        out
    }

    pub fn executor(&mut self) -> &mut GraphExecutor {
        &mut self.executor
    }
}

fn audio_input_index(decls: &[PortDecl], audio_channel: usize) -> usize {
    decls
        .iter()
        .enumerate()
        .filter(|(_, d)| d.kind == PortKind::Audio)
        .nth(audio_channel)
        .map(|(i, _)| i)
        .unwrap_or(audio_channel)
}
