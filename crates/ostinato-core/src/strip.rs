//! Channel strip: input processor, insert chain, fader, sends, direct out.

use crate::error::{EngineError, GraphError};
use crate::graph::{ConnectOptions, ConnectionId, NodeId, PortId, PortKind, RoutingGraph};
use crate::node::ProcessingNode;
use crate::nodes::params::{fader as fader_params, send as send_params};
use crate::nodes::{ChannelSend, Fader, FaderKind, SendKind, SoloState, TrackProcessor};
use crate::parameter::db_to_amp;
use std::sync::Arc;

/// One auxiliary send slot.
#[derive(Debug)]
pub struct SendSlot {
    pub node: NodeId,
    pub kind: SendKind,
    pub pre_fader: bool,
    /// Connections from the tap point into the send node.
    tap: Vec<ConnectionId>,
    /// Connections from the send node into its destination.
    dest: Vec<ConnectionId>,
}

impl SendSlot {
    pub fn is_enabled(&self, graph: &RoutingGraph) -> bool {
        self.dest
            .iter()
            .all(|id| graph.connection(*id).map(|c| c.enabled).unwrap_or(false))
    }
}

/// A track's mixer channel as a fixed sub-graph:
///
/// `input -> insert[0] -> ... -> pre-fader tap -> fader -> post-fader tap
///  -> sends (parallel) -> direct out`
///
/// Insert mutations relink the chain inside a single command batch, so the
/// realtime side never evaluates a gap or a transient loop.
pub struct ChannelStrip {
    name: String,
    input: NodeId,
    inserts: Vec<NodeId>,
    fader: NodeId,
    sends: Vec<SendSlot>,
    chain: Vec<ConnectionId>,
    direct_out: Vec<ConnectionId>,
    direct_out_dest: Option<[PortId; 2]>,
}

impl ChannelStrip {
    /// Create the strip's fixed nodes and internal wiring.
    pub fn new(
        graph: &mut RoutingGraph,
        name: impl Into<String>,
        solo_state: Arc<SoloState>,
    ) -> Result<Self, EngineError> {
        let name = name.into();
        let mut strip = Self {
            name,
            input: NodeId(0),
            inserts: Vec::new(),
            fader: NodeId(0),
            sends: Vec::new(),
            chain: Vec::new(),
            direct_out: Vec::new(),
            direct_out_dest: None,
        };
        graph.with_batch(|graph| {
            strip.input = graph.add_node_with_kind(
                Box::new(TrackProcessor::new()),
                "core.track-in",
                Vec::new(),
            )?;
            let fader = Fader::new(FaderKind::Channel, solo_state);
            let config = bincode_config(&fader.config());
            strip.fader = graph.add_node_with_kind(Box::new(fader), "core.fader", config)?;
            strip.rebuild_chain(graph)
        })?;
        Ok(strip)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_node(&self) -> NodeId {
        self.input
    }

    pub fn fader_node(&self) -> NodeId {
        self.fader
    }

    pub fn inserts(&self) -> &[NodeId] {
        &self.inserts
    }

    pub fn sends(&self) -> &[SendSlot] {
        &self.sends
    }

    /// Audio input ports of the strip (for routing sources into it).
    pub fn audio_inputs(&self, graph: &RoutingGraph) -> Result<[PortId; 2], GraphError> {
        Ok([
            graph.audio_in(self.input, 0)?,
            graph.audio_in(self.input, 1)?,
        ])
    }

    pub fn event_input(&self, graph: &RoutingGraph) -> Result<PortId, GraphError> {
        graph.event_in(self.input, 0)
    }

    /// The node whose audio output is the pre-fader tap point.
    pub fn pre_fader_node(&self) -> NodeId {
        self.inserts.last().copied().unwrap_or(self.input)
    }

    /// Post-fader stereo outputs.
    pub fn post_fader_outputs(&self, graph: &RoutingGraph) -> Result<[PortId; 2], GraphError> {
        Ok([
            graph.audio_out(self.fader, 0)?,
            graph.audio_out(self.fader, 1)?,
        ])
    }

    // --- Insert chain -------------------------------------------------------

    /// Add an insert at `index` (clamped to the chain length).
    ///
    /// The node must have at least stereo audio I/O. An empty slot is simply
    /// absent from the chain: bypass is pass-through wiring, not silence.
    pub fn add_insert(
        &mut self,
        graph: &mut RoutingGraph,
        index: usize,
        node: Box<dyn ProcessingNode>,
    ) -> Result<NodeId, EngineError> {
        let ports = node.ports();
        let audio_ins = ports.inputs.iter().filter(|d| d.kind == PortKind::Audio).count();
        let audio_outs = ports
            .outputs
            .iter()
            .filter(|d| d.kind == PortKind::Audio)
            .count();
        if audio_ins < 2 || audio_outs < 2 {
            return Err(GraphError::KindMismatch {
                source_kind: "audio",
                dest_kind: "insert without stereo audio i/o",
            }
            .into());
        }

        let index = index.min(self.inserts.len());
        let mut added = NodeId(0);
        graph.with_batch(|graph| {
            added = graph.add_node(node)?;
            self.inserts.insert(index, added);
            self.rebuild_chain(graph)
        })?;
        Ok(added)
    }

    /// Insert an already-added node (e.g. a hosted plugin) into the chain.
    pub fn add_insert_node(
        &mut self,
        graph: &mut RoutingGraph,
        index: usize,
        node: NodeId,
    ) -> Result<(), EngineError> {
        if graph.node(node).is_none() {
            return Err(GraphError::DanglingNode(node).into());
        }
        let index = index.min(self.inserts.len());
        graph.with_batch(|graph| {
            self.inserts.insert(index, node);
            self.rebuild_chain(graph)
        })
    }

    /// Remove the insert at `index`, destroying the node.
    pub fn remove_insert(
        &mut self,
        graph: &mut RoutingGraph,
        index: usize,
    ) -> Result<(), EngineError> {
        if index >= self.inserts.len() {
            return Err(GraphError::DanglingNode(NodeId(u64::MAX)).into());
        }
        graph.with_batch(|graph| {
            let node = self.inserts.remove(index);
            self.rebuild_chain(graph)?;
            graph.remove_node(node)
        })
    }

    /// Move an insert to a new position, relinking neighbours atomically.
    pub fn move_insert(
        &mut self,
        graph: &mut RoutingGraph,
        from: usize,
        to: usize,
    ) -> Result<(), EngineError> {
        if from >= self.inserts.len() || to >= self.inserts.len() {
            return Err(GraphError::DanglingNode(NodeId(u64::MAX)).into());
        }
        if from == to {
            return Ok(());
        }
        graph.with_batch(|graph| {
            let node = self.inserts.remove(from);
            self.inserts.insert(to, node);
            self.rebuild_chain(graph)
        })
    }

    /// Tear down and re-create the serial chain and send taps.
    ///
    /// Runs inside a batch; all connects here are between ports this strip
    /// owns (plus pre-validated send taps), so they cannot fail cycle or
    /// kind checks.
    fn rebuild_chain(&mut self, graph: &mut RoutingGraph) -> Result<(), EngineError> {
        for id in self.chain.drain(..) {
            graph.disconnect(id)?;
        }
        let tap_ids: Vec<(usize, Vec<ConnectionId>)> = self
            .sends
            .iter()
            .enumerate()
            .map(|(i, s)| (i, s.tap.clone()))
            .collect();
        for (slot, taps) in tap_ids {
            for id in taps {
                graph.disconnect(id)?;
            }
            self.sends[slot].tap.clear();
        }

        let mut prev = self.input;
        for &insert in &self.inserts {
            for ch in 0..2 {
                let src = graph.audio_out(prev, ch)?;
                let dst = graph.audio_in(insert, ch)?;
                self.chain.push(graph.connect(src, dst)?);
            }
            prev = insert;
        }
        for ch in 0..2 {
            let src = graph.audio_out(prev, ch)?;
            let dst = graph.audio_in(self.fader, ch)?;
            self.chain.push(graph.connect(src, dst)?);
        }

        for slot in 0..self.sends.len() {
            let (kind, pre_fader, node) = {
                let s = &self.sends[slot];
                (s.kind, s.pre_fader, s.node)
            };
            let tap_node = if pre_fader { self.pre_fader_node() } else { self.fader };
            match kind {
                SendKind::Audio => {
                    for ch in 0..2 {
                        let src = graph.audio_out(tap_node, ch)?;
                        let dst = graph.audio_in(node, ch)?;
                        self.sends[slot].tap.push(graph.connect(src, dst)?);
                    }
                }
                SendKind::Event => {
                    let src = graph.event_out(self.input, 0)?;
                    let dst = graph.event_in(node, 0)?;
                    self.sends[slot].tap.push(graph.connect(src, dst)?);
                }
            }
        }
        Ok(())
    }

    // --- Sends --------------------------------------------------------------

    /// Add a send feeding `dest` ports (two audio inputs, or one event input).
    pub fn add_send(
        &mut self,
        graph: &mut RoutingGraph,
        kind: SendKind,
        pre_fader: bool,
        dest: &[PortId],
    ) -> Result<usize, EngineError> {
        let expected = match kind {
            SendKind::Audio => 2,
            SendKind::Event => 1,
        };
        if dest.len() != expected {
            return Err(GraphError::Direction.into());
        }
        // A send back into something that feeds this strip would loop.
        for pid in dest {
            let info = graph.port(*pid).ok_or(GraphError::DanglingPort(*pid))?;
            if graph.node_reaches(info.node, self.input) {
                return Err(GraphError::Cycle {
                    src: *pid,
                    dest: *pid,
                }
                .into());
            }
        }

        let dest: Vec<PortId> = dest.to_vec();
        let mut slot_index = 0;
        graph.with_batch(|graph| {
            let send = ChannelSend::new(kind);
            let config = bincode_config(&send.config());
            let node = graph.add_node_with_kind(Box::new(send), "core.send", config)?;
            let mut slot = SendSlot {
                node,
                kind,
                pre_fader,
                tap: Vec::new(),
                dest: Vec::new(),
            };

            let tap_node = if pre_fader { self.pre_fader_node() } else { self.fader };
            match kind {
                SendKind::Audio => {
                    for ch in 0..2 {
                        let src = graph.audio_out(tap_node, ch)?;
                        let dst = graph.audio_in(node, ch)?;
                        slot.tap.push(graph.connect(src, dst)?);
                    }
                    for (ch, pid) in dest.iter().enumerate() {
                        let src = graph.audio_out(node, ch)?;
                        slot.dest.push(graph.connect(src, *pid)?);
                    }
                }
                SendKind::Event => {
                    let src = graph.event_out(self.input, 0)?;
                    let dst = graph.event_in(node, 0)?;
                    slot.tap.push(graph.connect(src, dst)?);
                    let src = graph.event_out(node, 0)?;
                    slot.dest.push(graph.connect(src, dest[0])?);
                }
            }

            slot_index = self.sends.len();
            self.sends.push(slot);
            Ok(())
        })?;
        Ok(slot_index)
    }

    pub fn remove_send(
        &mut self,
        graph: &mut RoutingGraph,
        index: usize,
    ) -> Result<(), EngineError> {
        if index >= self.sends.len() {
            return Err(GraphError::DanglingNode(NodeId(u64::MAX)).into());
        }
        graph.with_batch(|graph| {
            let slot = self.sends.remove(index);
            graph.remove_node(slot.node)
        })
    }

    /// Disable or re-enable a send's destination connections.
    ///
    /// The connections stay in the data model, so re-enabling restores the
    /// exact prior routing.
    pub fn enable_send(
        &mut self,
        graph: &mut RoutingGraph,
        index: usize,
        enabled: bool,
    ) -> Result<(), EngineError> {
        let slot = self
            .sends
            .get(index)
            .ok_or(GraphError::DanglingNode(NodeId(u64::MAX)))?;
        let ids = slot.dest.clone();
        graph.with_batch(|graph| {
            for id in ids {
                graph.set_connection_enabled(id, enabled)?;
            }
            Ok(())
        })
    }

    pub fn set_send_amount(
        &mut self,
        graph: &mut RoutingGraph,
        index: usize,
        amount: f32,
    ) -> Result<(), EngineError> {
        let slot = self
            .sends
            .get(index)
            .ok_or(GraphError::DanglingNode(NodeId(u64::MAX)))?;
        graph.set_parameter(slot.node, send_params::PARAM_AMOUNT, amount)
    }

    /// Switch a send between pre- and post-fader tap points.
    pub fn set_send_pre_fader(
        &mut self,
        graph: &mut RoutingGraph,
        index: usize,
        pre_fader: bool,
    ) -> Result<(), EngineError> {
        if index >= self.sends.len() {
            return Err(GraphError::DanglingNode(NodeId(u64::MAX)).into());
        }
        if self.sends[index].pre_fader == pre_fader {
            return Ok(());
        }
        graph.with_batch(|graph| {
            self.sends[index].pre_fader = pre_fader;
            self.rebuild_chain(graph)
        })
    }

    // --- Direct out ---------------------------------------------------------

    /// Route the post-fader output to a destination's stereo inputs, or
    /// nowhere. Rejected if the route would feed back into this strip.
    pub fn set_direct_out(
        &mut self,
        graph: &mut RoutingGraph,
        dest: Option<[PortId; 2]>,
    ) -> Result<(), EngineError> {
        if let Some(ports) = &dest {
            for pid in ports {
                let info = graph.port(*pid).ok_or(GraphError::DanglingPort(*pid))?;
                if graph.node_reaches(info.node, self.input) {
                    return Err(GraphError::Cycle {
                        src: *pid,
                        dest: *pid,
                    }
                    .into());
                }
            }
        }
        graph.with_batch(|graph| {
            for id in self.direct_out.drain(..) {
                graph.disconnect(id)?;
            }
            if let Some(ports) = dest {
                for (ch, pid) in ports.iter().enumerate() {
                    let src = graph.audio_out(self.fader, ch)?;
                    self.direct_out.push(graph.connect(src, *pid)?);
                }
            }
            self.direct_out_dest = dest;
            Ok(())
        })
    }

    pub fn direct_out(&self) -> Option<[PortId; 2]> {
        self.direct_out_dest
    }

    // --- Fader controls -----------------------------------------------------

    pub fn set_gain(&self, graph: &mut RoutingGraph, amp: f32) -> Result<(), EngineError> {
        graph.set_parameter(self.fader, fader_params::PARAM_GAIN, amp)
    }

    pub fn set_gain_db(&self, graph: &mut RoutingGraph, db: f32) -> Result<(), EngineError> {
        self.set_gain(graph, db_to_amp(db))
    }

    pub fn set_pan(&self, graph: &mut RoutingGraph, pan: f32) -> Result<(), EngineError> {
        graph.set_parameter(self.fader, fader_params::PARAM_PAN, pan)
    }

    pub fn set_mute(&self, graph: &mut RoutingGraph, mute: bool) -> Result<(), EngineError> {
        graph.set_parameter(self.fader, fader_params::PARAM_MUTE, toggle(mute))
    }

    pub fn set_solo(&self, graph: &mut RoutingGraph, solo: bool) -> Result<(), EngineError> {
        graph.set_parameter(self.fader, fader_params::PARAM_SOLO, toggle(solo))
    }

    pub fn set_listen(&self, graph: &mut RoutingGraph, listen: bool) -> Result<(), EngineError> {
        graph.set_parameter(self.fader, fader_params::PARAM_LISTEN, toggle(listen))
    }

    pub fn set_mono_compat(&self, graph: &mut RoutingGraph, mono: bool) -> Result<(), EngineError> {
        graph.set_parameter(self.fader, fader_params::PARAM_MONO, toggle(mono))
    }

    pub fn set_phase_invert(&self, graph: &mut RoutingGraph, invert: bool) -> Result<(), EngineError> {
        graph.set_parameter(self.fader, fader_params::PARAM_PHASE, toggle(invert))
    }

    pub fn is_muted(&self, graph: &RoutingGraph) -> bool {
        graph
            .parameter(self.fader, fader_params::PARAM_MUTE)
            .map(|v| v > 0.5)
            .unwrap_or(false)
    }

    pub fn is_soloed(&self, graph: &RoutingGraph) -> bool {
        graph
            .parameter(self.fader, fader_params::PARAM_SOLO)
            .map(|v| v > 0.5)
            .unwrap_or(false)
    }

    pub fn is_listened(&self, graph: &RoutingGraph) -> bool {
        graph
            .parameter(self.fader, fader_params::PARAM_LISTEN)
            .map(|v| v > 0.5)
            .unwrap_or(false)
    }

    /// Reconstruct a strip view over nodes already present in the graph.
    ///
    /// Used on snapshot restore: the graph has been rebuilt node-by-node and
    /// connection-by-connection, and this recovers the strip's bookkeeping
    /// (chain/tap/dest connection ids) from the mirror.
    pub fn adopt(
        graph: &RoutingGraph,
        name: impl Into<String>,
        input: NodeId,
        inserts: Vec<NodeId>,
        fader: NodeId,
        sends: Vec<(NodeId, SendKind, bool)>,
        direct_out: Option<[PortId; 2]>,
    ) -> Self {
        let between = |src: NodeId, dst: NodeId| -> Vec<ConnectionId> {
            graph
                .connections()
                .filter(|c| {
                    graph.port(c.source).map(|p| p.node) == Some(src)
                        && graph.port(c.dest).map(|p| p.node) == Some(dst)
                })
                .map(|c| c.id)
                .collect()
        };

        let mut chain = Vec::new();
        let mut prev = input;
        for &insert in &inserts {
            chain.extend(between(prev, insert));
            prev = insert;
        }
        chain.extend(between(prev, fader));

        let send_slots = sends
            .into_iter()
            .map(|(node, kind, pre_fader)| {
                let tap_node = if pre_fader {
                    inserts.last().copied().unwrap_or(input)
                } else {
                    fader
                };
                let dest = graph
                    .connections()
                    .filter(|c| graph.port(c.source).map(|p| p.node) == Some(node))
                    .map(|c| c.id)
                    .collect();
                SendSlot {
                    node,
                    kind,
                    pre_fader,
                    tap: between(tap_node, node),
                    dest,
                }
            })
            .collect();

        let direct_out_conns = direct_out
            .map(|ports| {
                graph
                    .connections()
                    .filter(|c| {
                        graph.port(c.source).map(|p| p.node) == Some(fader)
                            && ports.contains(&c.dest)
                    })
                    .map(|c| c.id)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: name.into(),
            input,
            inserts,
            fader,
            sends: send_slots,
            chain,
            direct_out: direct_out_conns,
            direct_out_dest: direct_out,
        }
    }

    /// Remove every node this strip owns.
    pub fn destroy(self, graph: &mut RoutingGraph) -> Result<(), EngineError> {
        graph.with_batch(|graph| {
            for slot in &self.sends {
                graph.remove_node(slot.node)?;
            }
            for &insert in &self.inserts {
                graph.remove_node(insert)?;
            }
            graph.remove_node(self.fader)?;
            graph.remove_node(self.input)
        })
    }
}

fn toggle(on: bool) -> f32 {
    if on {
        1.0
    } else {
        0.0
    }
}

fn bincode_config<T: serde::Serialize>(value: &T) -> Vec<u8> {
    crate::snapshot::encode_config(value)
}
