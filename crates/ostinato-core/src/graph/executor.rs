//! Realtime side of the graph: node storage, block buffers, evaluation.

use super::{Connection, ConnectionId, NodeId, PortKind, Topology};
use crate::buffer::EventBuffer;
use crate::commands::{CommandBatch, EngineCommand, ParamEvent, ParamEventBlock, PortLocation};
use crate::node::ProcessingNode;
use crate::transport::TransportView;
use std::collections::HashMap;

static EMPTY_AUDIO: [f32; 0] = [];

/// Storage for one port's block of signal.
#[derive(Debug, Clone)]
pub(crate) enum PortBuffer {
    Audio(Vec<f32>),
    Event(EventBuffer),
    Control(f32),
}

impl PortBuffer {
    fn for_kind(kind: PortKind, max_block: usize) -> Self {
        match kind {
            PortKind::Audio => PortBuffer::Audio(vec![0.0; max_block]),
            PortKind::Event => PortBuffer::Event(EventBuffer::new()),
            PortKind::Control => PortBuffer::Control(0.0),
        }
    }

    fn clear(&mut self) {
        match self {
            PortBuffer::Audio(buf) => buf.fill(0.0),
            PortBuffer::Event(buf) => buf.clear(),
            PortBuffer::Control(v) => *v = 0.0,
        }
    }
}

/// Slab of port buffers; freed slots are reused.
#[derive(Debug, Default)]
pub(crate) struct BufferArena {
    slots: Vec<Option<PortBuffer>>,
    free: Vec<usize>,
    max_block: usize,
}

impl BufferArena {
    fn alloc(&mut self, kind: PortKind) -> usize {
        let buf = PortBuffer::for_kind(kind, self.max_block);
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(buf);
            idx
        } else {
            self.slots.push(Some(buf));
            self.slots.len() - 1
        }
    }

    fn release(&mut self, idx: usize) {
        if idx < self.slots.len() && self.slots[idx].take().is_some() {
            self.free.push(idx);
        }
    }

    fn set_block_len(&mut self, max_block: usize) {
        self.max_block = max_block;
        for slot in self.slots.iter_mut().flatten() {
            if let PortBuffer::Audio(buf) = slot {
                buf.resize(max_block, 0.0);
            }
            slot.clear();
        }
    }

    #[inline]
    fn clear(&mut self, idx: usize) {
        if let Some(buf) = self.slots.get_mut(idx).and_then(|s| s.as_mut()) {
            buf.clear();
        }
    }

    #[inline]
    fn audio(&self, idx: usize, n: usize) -> &[f32] {
        match self.slots.get(idx).and_then(|s| s.as_ref()) {
            Some(PortBuffer::Audio(buf)) => &buf[..n.min(buf.len())],
            _ => &EMPTY_AUDIO,
        }
    }

    /// Mutable access to two distinct audio buffers at once.
    fn audio_pair_mut(&mut self, a: usize, b: usize, n: usize) -> (&mut [f32], &mut [f32]) {
        debug_assert_ne!(a, b);
        let (lo, hi, swapped) = if a < b { (a, b, false) } else { (b, a, true) };
        let (head, tail) = self.slots.split_at_mut(hi);
        let first = match head.get_mut(lo).and_then(|s| s.as_mut()) {
            Some(PortBuffer::Audio(buf)) => {
                let n = n.min(buf.len());
                &mut buf[..n]
            }
            _ => &mut [],
        };
        let second = match tail.first_mut().and_then(|s| s.as_mut()) {
            Some(PortBuffer::Audio(buf)) => {
                let n = n.min(buf.len());
                &mut buf[..n]
            }
            _ => &mut [],
        };
        if swapped {
            (second, first)
        } else {
            (first, second)
        }
    }

    #[inline]
    fn audio_mut(&mut self, idx: usize, n: usize) -> &mut [f32] {
        match self.slots.get_mut(idx).and_then(|s| s.as_mut()) {
            Some(PortBuffer::Audio(buf)) => {
                let n = n.min(buf.len());
                &mut buf[..n]
            }
            _ => &mut [],
        }
    }

    #[inline]
    fn control(&self, idx: usize) -> f32 {
        match self.slots.get(idx).and_then(|s| s.as_ref()) {
            Some(PortBuffer::Control(v)) => *v,
            _ => 0.0,
        }
    }

    #[inline]
    fn set_control(&mut self, idx: usize, value: f32) {
        if let Some(PortBuffer::Control(v)) = self.slots.get_mut(idx).and_then(|s| s.as_mut()) {
            *v = value;
        }
    }

    #[inline]
    fn events(&self, idx: usize) -> Option<&EventBuffer> {
        match self.slots.get(idx).and_then(|s| s.as_ref()) {
            Some(PortBuffer::Event(buf)) => Some(buf),
            _ => None,
        }
    }

    #[inline]
    fn events_mut(&mut self, idx: usize) -> Option<&mut EventBuffer> {
        match self.slots.get_mut(idx).and_then(|s| s.as_mut()) {
            Some(PortBuffer::Event(buf)) => Some(buf),
            _ => None,
        }
    }
}

/// One port slot of a live node.
#[derive(Debug)]
pub(crate) struct RtSlot {
    pub(crate) kind: PortKind,
    pub(crate) buf: usize,
    /// Incoming connections (input slots only).
    pub(crate) incoming: Vec<ConnectionId>,
}

pub(crate) struct RtNode {
    pub(crate) node: Box<dyn ProcessingNode>,
    pub(crate) in_slots: Vec<RtSlot>,
    pub(crate) out_slots: Vec<RtSlot>,
}

#[derive(Debug)]
struct RtConnection {
    src_node: NodeId,
    src_buf: usize,
    dst_node: NodeId,
    dst_index: usize,
    enabled: bool,
    multiplier: f32,
    feedback_slot: Option<usize>,
}

/// Previous-block copy of a feedback connection's source output.
#[derive(Debug)]
struct FeedbackTap {
    src_buf: usize,
    buf: PortBuffer,
}

/// The realtime graph: owns node objects and buffers, applies pre-validated
/// commands at block boundaries, evaluates in topological order.
#[derive(Default)]
pub struct GraphExecutor {
    nodes: HashMap<NodeId, RtNode>,
    connections: HashMap<ConnectionId, RtConnection>,
    topology: Topology,
    feedback: Vec<Option<FeedbackTap>>,
    feedback_free: Vec<usize>,
    inputs: BufferArena,
    outputs: BufferArena,
    sample_rate: f64,
    max_block: usize,
    master: Option<NodeId>,
}

impl GraphExecutor {
    pub fn new(sample_rate: f64, max_block: usize) -> Self {
        let mut exec = Self {
            sample_rate,
            max_block,
            ..Self::default()
        };
        exec.inputs.set_block_len(max_block);
        exec.outputs.set_block_len(max_block);
        exec
    }

    /// Reconfigure for a new sample rate / block size. Re-prepares all nodes.
    pub fn prepare(&mut self, sample_rate: f64, max_block: usize) {
        self.sample_rate = sample_rate;
        self.max_block = max_block;
        self.inputs.set_block_len(max_block);
        self.outputs.set_block_len(max_block);
        for tap in self.feedback.iter_mut().flatten() {
            if let PortBuffer::Audio(buf) = &mut tap.buf {
                buf.resize(max_block, 0.0);
            }
            tap.buf.clear();
        }
        for rt in self.nodes.values_mut() {
            rt.node.prepare(sample_rate, max_block);
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn max_block(&self) -> usize {
        self.max_block
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn master(&self) -> Option<NodeId> {
        self.master
    }

    /// Apply one command batch. Runs at the block boundary, never mid-block.
    pub fn apply_batch(&mut self, batch: CommandBatch) {
        for command in batch.commands {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::AddNode { id, mut node } => {
                let ports = node.ports();
                node.prepare(self.sample_rate, self.max_block);
                let in_slots = ports
                    .inputs
                    .iter()
                    .map(|decl| RtSlot {
                        kind: decl.kind,
                        buf: self.inputs.alloc(decl.kind),
                        incoming: Vec::new(),
                    })
                    .collect();
                let out_slots = ports
                    .outputs
                    .iter()
                    .map(|decl| RtSlot {
                        kind: decl.kind,
                        buf: self.outputs.alloc(decl.kind),
                        incoming: Vec::new(),
                    })
                    .collect();
                self.nodes.insert(
                    id,
                    RtNode {
                        node,
                        in_slots,
                        out_slots,
                    },
                );
                self.topology.add_node(id);
            }

            EngineCommand::RemoveNode { id } => {
                // The edit side disconnects first; stale edges must not
                // survive a remove either way.
                let stale: Vec<ConnectionId> = self
                    .connections
                    .iter()
                    .filter(|(_, c)| c.src_node == id || c.dst_node == id)
                    .map(|(&cid, _)| cid)
                    .collect();
                for cid in stale {
                    self.remove_connection(cid);
                }
                if let Some(mut rt) = self.nodes.remove(&id) {
                    rt.node.release();
                    for slot in &rt.in_slots {
                        self.inputs.release(slot.buf);
                    }
                    for slot in &rt.out_slots {
                        self.outputs.release(slot.buf);
                    }
                }
                self.topology.remove_node(id);
                if self.master == Some(id) {
                    self.master = None;
                }
            }

            EngineCommand::Connect {
                connection,
                src,
                dst,
            } => self.add_connection(connection, src, dst),

            EngineCommand::Disconnect { id } => self.remove_connection(id),

            EngineCommand::SetConnectionEnabled { id, enabled } => {
                if let Some(conn) = self.connections.get_mut(&id) {
                    conn.enabled = enabled;
                }
            }

            EngineCommand::SetConnectionGain { id, multiplier } => {
                if let Some(conn) = self.connections.get_mut(&id) {
                    conn.multiplier = multiplier;
                }
            }

            EngineCommand::SetMaster { id } => {
                self.master = id;
            }
        }
    }

    fn add_connection(&mut self, connection: Connection, src: PortLocation, dst: PortLocation) {
        let Some(src_rt) = self.nodes.get(&src.node) else {
            return;
        };
        let Some(slot) = src_rt.out_slots.get(src.index) else {
            return;
        };
        let src_buf = slot.buf;

        let feedback_slot = connection.feedback.then(|| {
            let tap = FeedbackTap {
                src_buf,
                buf: PortBuffer::for_kind(src.kind, self.max_block),
            };
            if let Some(idx) = self.feedback_free.pop() {
                self.feedback[idx] = Some(tap);
                idx
            } else {
                self.feedback.push(Some(tap));
                self.feedback.len() - 1
            }
        });

        if let Some(dst_rt) = self.nodes.get_mut(&dst.node) {
            if let Some(slot) = dst_rt.in_slots.get_mut(dst.index) {
                slot.incoming.push(connection.id);
            }
        }

        self.connections.insert(
            connection.id,
            RtConnection {
                src_node: src.node,
                src_buf,
                dst_node: dst.node,
                dst_index: dst.index,
                enabled: connection.enabled,
                multiplier: connection.multiplier,
                feedback_slot,
            },
        );
        self.topology
            .add_edge(connection.id, src.node, dst.node, connection.feedback);
    }

    fn remove_connection(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.remove(&id) else {
            return;
        };
        if let Some(dst_rt) = self.nodes.get_mut(&conn.dst_node) {
            if let Some(slot) = dst_rt.in_slots.get_mut(conn.dst_index) {
                slot.incoming.retain(|&cid| cid != id);
            }
        }
        if let Some(fs) = conn.feedback_slot {
            self.feedback[fs] = None;
            self.feedback_free.push(fs);
        }
        self.topology.remove_edge(id);
    }

    /// Evaluate every node once, in dependency order.
    ///
    /// Inputs are mixed from enabled connections (feedback edges read the
    /// previous block), outputs are zeroed before each node runs.
    pub fn evaluate(&mut self, transport: &TransportView, events: &ParamEventBlock) {
        let n = transport.n_samples.min(self.max_block);
        let Self {
            nodes,
            connections,
            topology,
            feedback,
            inputs,
            outputs,
            ..
        } = self;

        for &nid in topology.order() {
            let Some(rt) = nodes.get_mut(&nid) else {
                continue;
            };

            for slot in &rt.in_slots {
                inputs.clear(slot.buf);
                for &cid in &slot.incoming {
                    let Some(conn) = connections.get(&cid) else {
                        continue;
                    };
                    if !conn.enabled {
                        continue;
                    }
                    match conn.feedback_slot {
                        Some(fs) => {
                            if let Some(tap) = feedback[fs].as_ref() {
                                mix_buffer(&tap.buf, inputs, slot.buf, conn.multiplier, n);
                            }
                        }
                        None => {
                            mix_arena(outputs, conn.src_buf, inputs, slot.buf, conn.multiplier, n);
                        }
                    }
                }
            }

            for slot in &rt.out_slots {
                outputs.clear(slot.buf);
            }

            let mut block = ProcessBlock {
                inputs,
                outputs,
                in_slots: &rt.in_slots,
                out_slots: &rt.out_slots,
                n_samples: n,
                transport,
                events: events.for_node(nid),
            };
            rt.node.process(&mut block);
        }

        // Capture this block's outputs for next block's feedback reads.
        for tap in feedback.iter_mut().flatten() {
            copy_into_tap(outputs, tap, n);
        }
    }

    /// Audio output buffer of the master node's given channel, post-evaluate.
    pub fn master_audio(&self, channel: usize, n: usize) -> Option<&[f32]> {
        let id = self.master?;
        let rt = self.nodes.get(&id)?;
        let slot = rt
            .out_slots
            .iter()
            .filter(|s| s.kind == PortKind::Audio)
            .nth(channel)?;
        Some(self.outputs.audio(slot.buf, n))
    }

    /// Audio output of an arbitrary node, for tests and taps.
    pub fn node_audio_out(&self, node: NodeId, channel: usize, n: usize) -> Option<&[f32]> {
        let rt = self.nodes.get(&node)?;
        let slot = rt
            .out_slots
            .iter()
            .filter(|s| s.kind == PortKind::Audio)
            .nth(channel)?;
        Some(self.outputs.audio(slot.buf, n))
    }

    /// Control output value of a node, post-evaluate.
    pub fn node_control_out(&self, node: NodeId, index: usize) -> Option<f32> {
        let rt = self.nodes.get(&node)?;
        let slot = rt
            .out_slots
            .iter()
            .filter(|s| s.kind == PortKind::Control)
            .nth(index)?;
        Some(self.outputs.control(slot.buf))
    }

    /// Current evaluation order (recomputed if dirty).
    pub fn order(&mut self) -> Vec<NodeId> {
        self.topology.order().to_vec()
    }
}

fn mix_arena(
    src_arena: &BufferArena,
    src_buf: usize,
    dst_arena: &mut BufferArena,
    dst_buf: usize,
    multiplier: f32,
    n: usize,
) {
    match src_arena.slots.get(src_buf).and_then(|s| s.as_ref()) {
        Some(buf) => mix_buffer(buf, dst_arena, dst_buf, multiplier, n),
        None => {}
    }
}

fn mix_buffer(
    src: &PortBuffer,
    dst_arena: &mut BufferArena,
    dst_buf: usize,
    multiplier: f32,
    n: usize,
) {
    match src {
        PortBuffer::Audio(src_samples) => {
            let dst = dst_arena.audio_mut(dst_buf, n);
            let n = dst.len().min(src_samples.len());
            for i in 0..n {
                dst[i] += src_samples[i] * multiplier;
            }
        }
        PortBuffer::Event(src_events) => {
            if let Some(dst) = dst_arena.events_mut(dst_buf) {
                dst.merge_from(src_events);
            }
        }
        PortBuffer::Control(v) => {
            let sum = dst_arena.control(dst_buf) + v * multiplier;
            dst_arena.set_control(dst_buf, sum);
        }
    }
}

fn copy_into_tap(outputs: &BufferArena, tap: &mut FeedbackTap, n: usize) {
    match (&mut tap.buf, outputs.slots.get(tap.src_buf).and_then(|s| s.as_ref())) {
        (PortBuffer::Audio(dst), Some(PortBuffer::Audio(src))) => {
            let n = n.min(dst.len()).min(src.len());
            dst[..n].copy_from_slice(&src[..n]);
        }
        (PortBuffer::Event(dst), Some(PortBuffer::Event(src))) => {
            dst.copy_from(src);
        }
        (PortBuffer::Control(dst), Some(PortBuffer::Control(src))) => {
            *dst = *src;
        }
        _ => {}
    }
}

/// Per-node view of one block: mixed inputs, zeroed outputs, transport state,
/// and this node's parameter events sorted by time.
pub struct ProcessBlock<'a> {
    inputs: &'a BufferArena,
    outputs: &'a mut BufferArena,
    in_slots: &'a [RtSlot],
    out_slots: &'a [RtSlot],
    n_samples: usize,
    transport: &'a TransportView,
    events: &'a [ParamEvent],
}

impl<'a> ProcessBlock<'a> {
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    #[inline]
    pub fn transport(&self) -> &TransportView {
        self.transport
    }

    /// Parameter events for this node, sorted by time.
    #[inline]
    pub fn param_events(&self) -> &[ParamEvent] {
        self.events
    }

    /// Frame offset of an event within this block.
    #[inline]
    pub fn event_offset(&self, event: &ParamEvent) -> usize {
        (event.time.saturating_sub(self.transport.block_start) as usize).min(self.n_samples)
    }

    #[inline]
    pub fn audio_in(&self, index: usize) -> &[f32] {
        match self.in_slots.get(index) {
            Some(slot) if slot.kind == PortKind::Audio => self.inputs.audio(slot.buf, self.n_samples),
            _ => &EMPTY_AUDIO,
        }
    }

    /// Like [`audio_in`](Self::audio_in), but borrowing from the arena's
    /// lifetime so it can be held across mutable output access.
    #[inline]
    pub fn audio_in_ref(&self, index: usize) -> &'a [f32] {
        match self.in_slots.get(index) {
            Some(slot) if slot.kind == PortKind::Audio => {
                self.inputs.audio(slot.buf, self.n_samples)
            }
            _ => &EMPTY_AUDIO,
        }
    }

    #[inline]
    pub fn audio_out(&mut self, index: usize) -> &mut [f32] {
        match self.out_slots.get(index) {
            Some(slot) if slot.kind == PortKind::Audio => {
                self.outputs.audio_mut(slot.buf, self.n_samples)
            }
            _ => &mut [],
        }
    }

    /// Mutable access to two audio output channels at once.
    pub fn audio_out_pair(&mut self, a: usize, b: usize) -> (&mut [f32], &mut [f32]) {
        let buf_a = match self.out_slots.get(a) {
            Some(slot) if slot.kind == PortKind::Audio => slot.buf,
            _ => return (&mut [], &mut []),
        };
        let buf_b = match self.out_slots.get(b) {
            Some(slot) if slot.kind == PortKind::Audio => slot.buf,
            _ => return (&mut [], &mut []),
        };
        if buf_a == buf_b {
            return (&mut [], &mut []);
        }
        self.outputs.audio_pair_mut(buf_a, buf_b, self.n_samples)
    }

    /// Simultaneous read of one input and write of one output channel.
    #[inline]
    pub fn audio_in_out(&mut self, in_index: usize, out_index: usize) -> (&[f32], &mut [f32]) {
        let input = match self.in_slots.get(in_index) {
            Some(slot) if slot.kind == PortKind::Audio => {
                self.inputs.audio(slot.buf, self.n_samples)
            }
            _ => &EMPTY_AUDIO[..],
        };
        let output = match self.out_slots.get(out_index) {
            Some(slot) if slot.kind == PortKind::Audio => {
                self.outputs.audio_mut(slot.buf, self.n_samples)
            }
            _ => &mut [],
        };
        (input, output)
    }

    #[inline]
    pub fn control_in(&self, index: usize) -> f32 {
        match self.in_slots.get(index) {
            Some(slot) if slot.kind == PortKind::Control => self.inputs.control(slot.buf),
            _ => 0.0,
        }
    }

    #[inline]
    pub fn set_control_out(&mut self, index: usize, value: f32) {
        if let Some(slot) = self.out_slots.get(index) {
            if slot.kind == PortKind::Control {
                self.outputs.set_control(slot.buf, value);
            }
        }
    }

    #[inline]
    pub fn events_in(&self, index: usize) -> Option<&EventBuffer> {
        match self.in_slots.get(index) {
            Some(slot) if slot.kind == PortKind::Event => self.inputs.events(slot.buf),
            _ => None,
        }
    }

    /// Like [`events_in`](Self::events_in), but borrowing from the arena's
    /// lifetime so it can be held across mutable output access.
    #[inline]
    pub fn events_in_ref(&self, index: usize) -> Option<&'a EventBuffer> {
        match self.in_slots.get(index) {
            Some(slot) if slot.kind == PortKind::Event => self.inputs.events(slot.buf),
            _ => None,
        }
    }

    #[inline]
    pub fn events_out(&mut self, index: usize) -> Option<&mut EventBuffer> {
        match self.out_slots.get(index) {
            Some(slot) if slot.kind == PortKind::Event => self.outputs.events_mut(slot.buf),
            _ => None,
        }
    }

    /// Whether any connection (enabled or not) targets the given input.
    #[inline]
    pub fn input_connected(&self, index: usize) -> bool {
        self.in_slots
            .get(index)
            .map(|s| !s.incoming.is_empty())
            .unwrap_or(false)
    }

    /// Copy every input to the same-index output of matching kind.
    pub fn copy_through(&mut self) {
        let pairs = self.in_slots.len().min(self.out_slots.len());
        for i in 0..pairs {
            let (in_slot, out_slot) = (&self.in_slots[i], &self.out_slots[i]);
            if in_slot.kind != out_slot.kind {
                continue;
            }
            match in_slot.kind {
                PortKind::Audio => {
                    let src_buf = in_slot.buf;
                    let dst_buf = out_slot.buf;
                    let n = self.n_samples;
                    // Arenas are distinct, so this is a straight copy.
                    let src = self.inputs.audio(src_buf, n);
                    let dst = self.outputs.audio_mut(dst_buf, n);
                    let n = src.len().min(dst.len());
                    dst[..n].copy_from_slice(&src[..n]);
                }
                PortKind::Event => {
                    if let (Some(src), Some(dst)) = (
                        self.inputs.events(in_slot.buf),
                        self.outputs.events_mut(out_slot.buf),
                    ) {
                        dst.copy_from(src);
                    }
                }
                PortKind::Control => {
                    let v = self.inputs.control(in_slot.buf);
                    self.outputs.set_control(out_slot.buf, v);
                }
            }
        }
    }
}
