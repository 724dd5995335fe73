//! OstinatoEngine: facade coordinating graph, strips, transport, backend,
//! plugin hosting and export.

use crate::error::{Error, Result};
use ostinato_core::{
    AudioBackend, ChannelStrip, ConnectOptions, ConnectionId, DspLoadMeter, DspLoadMetrics,
    EngineScheduler, EngineState, Fader, GraphState, MacroProcessor, NodeFactoryRegistry, NodeId,
    PortId, RoutingGraph, SendKind, SineSource, SoloState, StripState, TrackProcessor,
    TransportHandle,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "plugin")]
use ostinato_plugin::{BridgedHost, FormatKind, InstanceHandle, NativeHost, PluginDescriptor};

#[cfg(feature = "export")]
use std::path::Path;
#[cfg(feature = "export")]
use std::sync::atomic::AtomicBool;

/// Index of a channel strip within the engine.
pub type StripId = usize;

/// A structural or parameter command from an external layer (undo log,
/// automation bridge). The engine applies it and keeps no history.
#[derive(Debug, Clone)]
pub enum EngineOp {
    Connect {
        src: PortId,
        dst: PortId,
        options: ConnectOptions,
    },
    Disconnect(ConnectionId),
    SetConnectionEnabled {
        id: ConnectionId,
        enabled: bool,
    },
    SetConnectionGain {
        id: ConnectionId,
        multiplier: f32,
    },
    SetParameter {
        node: NodeId,
        param: u32,
        value: f32,
    },
    ScheduleParameter {
        node: NodeId,
        param: u32,
        value: f32,
        time: u64,
    },
    RemoveNode(NodeId),
}

/// The engine: one routing graph, one scheduler, one backend.
///
/// Lifecycle: `Uninitialized -> Ready -> Running <-> Stopped -> Released`,
/// with `Exporting` a sub-state of `Stopped`. The builder's `build()` is the
/// `initialize` transition; when no real backend accepts the config it falls
/// back to the null backend and records a warning instead of aborting.
pub struct OstinatoEngine {
    state: Mutex<EngineState>,
    graph: Mutex<RoutingGraph>,
    scheduler: Arc<Mutex<EngineScheduler>>,
    backend: Mutex<Box<dyn AudioBackend>>,
    backend_warning: Option<ostinato_core::BackendError>,
    transport: TransportHandle,
    meter: Arc<DspLoadMeter>,
    solo: Arc<SoloState>,
    strips: Mutex<Vec<ChannelStrip>>,
    master: NodeId,
    factories: NodeFactoryRegistry,
    sample_rate: f64,
    block_size: usize,

    #[cfg(feature = "plugin")]
    native_host: NativeHost,
    #[cfg(feature = "plugin")]
    bridged_host: BridgedHost,
    #[cfg(feature = "plugin")]
    plugins: Mutex<HashMap<NodeId, Arc<dyn InstanceHandle>>>,
}

impl OstinatoEngine {
    /// Create a new engine builder.
    pub fn builder() -> crate::OstinatoEngineBuilder {
        crate::OstinatoEngineBuilder::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        graph: RoutingGraph,
        scheduler: Arc<Mutex<EngineScheduler>>,
        backend: Box<dyn AudioBackend>,
        backend_warning: Option<ostinato_core::BackendError>,
        transport: TransportHandle,
        meter: Arc<DspLoadMeter>,
        solo: Arc<SoloState>,
        master: NodeId,
        sample_rate: f64,
        block_size: usize,
        #[cfg(feature = "plugin")] native_host: NativeHost,
        #[cfg(feature = "plugin")] bridged_host: BridgedHost,
    ) -> Self {
        let engine = Self {
            state: Mutex::new(EngineState::Ready),
            graph: Mutex::new(graph),
            scheduler,
            backend: Mutex::new(backend),
            backend_warning,
            transport,
            meter,
            solo: Arc::clone(&solo),
            strips: Mutex::new(Vec::new()),
            master,
            factories: NodeFactoryRegistry::new(),
            sample_rate,
            block_size,
            #[cfg(feature = "plugin")]
            native_host,
            #[cfg(feature = "plugin")]
            bridged_host,
            #[cfg(feature = "plugin")]
            plugins: Mutex::new(HashMap::new()),
        };
        engine.register_builtin_factories(solo);
        engine
    }

    fn register_builtin_factories(&self, solo: Arc<SoloState>) {
        use ostinato_core::{decode_config, ProcessingNode};

        self.factories.register("core.fader", move |config| {
            let config: ostinato_core::nodes::FaderConfig = decode_config(config)?;
            Ok(Box::new(Fader::new(config.kind, Arc::clone(&solo))) as Box<dyn ProcessingNode>)
        });
        self.factories.register("core.track-in", |_| {
            Ok(Box::new(TrackProcessor::new()) as Box<dyn ProcessingNode>)
        });
        self.factories.register("core.send", |config| {
            let config: ostinato_core::nodes::SendConfig = decode_config(config)?;
            Ok(Box::new(ostinato_core::ChannelSend::new(config.kind)) as Box<dyn ProcessingNode>)
        });
        self.factories.register("core.sine", |config| {
            let config: ostinato_core::nodes::SineConfig = decode_config(config)?;
            Ok(Box::new(SineSource::from_config(&config)) as Box<dyn ProcessingNode>)
        });
        self.factories.register("core.macro", |config| {
            let config: ostinato_core::nodes::MacroConfig = decode_config(config)?;
            Ok(Box::new(MacroProcessor::new(config.outputs)) as Box<dyn ProcessingNode>)
        });
        self.factories.register("core.null-source", |_| {
            Ok(Box::new(ostinato_core::NullSource) as Box<dyn ProcessingNode>)
        });
    }

    /// Factories used to rebuild nodes on restore; embedders may register
    /// their own kinds here before calling [`restore`](Self::restore).
    pub fn factories(&self) -> &NodeFactoryRegistry {
        &self.factories
    }

    // --- Lifecycle ----------------------------------------------------------

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// The warning raised when backend negotiation fell back to null.
    pub fn backend_warning(&self) -> Option<&ostinato_core::BackendError> {
        self.backend_warning.as_ref()
    }

    pub fn backend_name(&self) -> String {
        self.backend.lock().name().to_string()
    }

    /// Start pulling audio (`Ready`/`Stopped` -> `Running`).
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            EngineState::Ready | EngineState::Stopped => {
                self.backend.lock().start(Arc::clone(&self.scheduler))?;
                *state = EngineState::Running;
                Ok(())
            }
            EngineState::Running => Ok(()),
            other => Err(Error::InvalidState {
                required: "ready or stopped",
                actual: other.name(),
            }),
        }
    }

    /// Stop pulling audio (`Running` -> `Stopped`).
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            EngineState::Running => {
                self.backend.lock().stop();
                *state = EngineState::Stopped;
                Ok(())
            }
            EngineState::Ready | EngineState::Stopped => {
                *state = EngineState::Stopped;
                Ok(())
            }
            other => Err(Error::InvalidState {
                required: "running",
                actual: other.name(),
            }),
        }
    }

    /// Release the engine. Idempotent, legal from any state.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if *state == EngineState::Released {
            return;
        }
        self.backend.lock().stop();
        #[cfg(feature = "plugin")]
        {
            let mut plugins = self.plugins.lock();
            for handle in plugins.values() {
                handle.destroy();
            }
            plugins.clear();
        }
        *state = EngineState::Released;
    }

    // --- Graph & transport --------------------------------------------------

    /// Edit the routing graph. Mutations are validated synchronously and
    /// applied by the realtime side at the next block boundary.
    pub fn graph<R>(&self, f: impl FnOnce(&mut RoutingGraph) -> R) -> R {
        f(&mut self.graph.lock())
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    pub fn metrics(&self) -> DspLoadMetrics {
        self.meter.metrics()
    }

    pub fn meter(&self) -> &Arc<DspLoadMeter> {
        &self.meter
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The master bus fader node.
    pub fn master_node(&self) -> NodeId {
        self.master
    }

    /// Stereo inputs of the master bus.
    pub fn master_inputs(&self) -> Result<[PortId; 2]> {
        let graph = self.graph.lock();
        Ok([
            graph.audio_in(self.master, 0).map_err(Error::from)?,
            graph.audio_in(self.master, 1).map_err(Error::from)?,
        ])
    }

    /// Apply one external command (undo layer, automation bridge).
    pub fn apply(&self, op: EngineOp) -> Result<()> {
        let mut graph = self.graph.lock();
        match op {
            EngineOp::Connect { src, dst, options } => {
                graph.connect_with(src, dst, options)?;
            }
            EngineOp::Disconnect(id) => graph.disconnect(id)?,
            EngineOp::SetConnectionEnabled { id, enabled } => {
                graph.set_connection_enabled(id, enabled)?
            }
            EngineOp::SetConnectionGain { id, multiplier } => {
                graph.set_connection_gain(id, multiplier)?
            }
            EngineOp::SetParameter { node, param, value } => {
                graph.set_parameter(node, param, value)?
            }
            EngineOp::ScheduleParameter {
                node,
                param,
                value,
                time,
            } => graph.schedule_parameter(node, param, value, time)?,
            EngineOp::RemoveNode(node) => {
                graph.remove_node(node)?;
                #[cfg(feature = "plugin")]
                if let Some(handle) = self.plugins.lock().remove(&node) {
                    handle.destroy();
                }
            }
        }
        Ok(())
    }

    // --- Channel strips -----------------------------------------------------

    /// Add a strip, routed to the master bus by default.
    pub fn add_strip(&self, name: impl Into<String>) -> Result<StripId> {
        let mut graph = self.graph.lock();
        let mut strip = ChannelStrip::new(&mut graph, name, Arc::clone(&self.solo))?;
        let master_in = [
            graph.audio_in(self.master, 0).map_err(Error::from)?,
            graph.audio_in(self.master, 1).map_err(Error::from)?,
        ];
        strip.set_direct_out(&mut graph, Some(master_in))?;
        let mut strips = self.strips.lock();
        strips.push(strip);
        Ok(strips.len() - 1)
    }

    /// Work with one strip and the graph together.
    pub fn with_strip<R>(
        &self,
        id: StripId,
        f: impl FnOnce(&mut ChannelStrip, &mut RoutingGraph) -> Result<R>,
    ) -> Result<R> {
        let mut graph = self.graph.lock();
        let mut strips = self.strips.lock();
        let strip = strips.get_mut(id).ok_or(Error::UnknownStrip(id))?;
        let result = f(strip, &mut graph);
        Self::sync_solo_state(&self.solo, &strips, &graph);
        result
    }

    pub fn strip_count(&self) -> usize {
        self.strips.lock().len()
    }

    /// Remove a strip and all its nodes. Later strip ids shift down.
    pub fn remove_strip(&self, id: StripId) -> Result<()> {
        let mut graph = self.graph.lock();
        let mut strips = self.strips.lock();
        if id >= strips.len() {
            return Err(Error::UnknownStrip(id));
        }
        let strip = strips.remove(id);
        #[cfg(feature = "plugin")]
        {
            let mut plugins = self.plugins.lock();
            for insert in strip.inserts() {
                if let Some(handle) = plugins.remove(insert) {
                    handle.destroy();
                }
            }
        }
        strip.destroy(&mut graph)?;
        Self::sync_solo_state(&self.solo, &strips, &graph);
        Ok(())
    }

    /// Recompute the engine-wide solo/listen flags every fader reads.
    fn sync_solo_state(solo: &SoloState, strips: &[ChannelStrip], graph: &RoutingGraph) {
        solo.any_solo.set(strips.iter().any(|s| s.is_soloed(graph)));
        solo.any_listen
            .set(strips.iter().any(|s| s.is_listened(graph)));
    }

    // --- Plugin hosting -----------------------------------------------------

    /// Instantiate a plugin from its descriptor and add it to the graph.
    ///
    /// Instantiation failure is recoverable: the error is returned, nothing
    /// is added, the engine keeps running.
    #[cfg(feature = "plugin")]
    pub fn load_plugin(&self, descriptor: &PluginDescriptor) -> Result<NodeId> {
        let instance = match descriptor.format_kind {
            FormatKind::Native => {
                self.native_host
                    .instantiate(descriptor, self.sample_rate, self.block_size)?
            }
            FormatKind::Bridged => {
                self.bridged_host
                    .instantiate(descriptor, self.sample_rate, self.block_size)?
            }
        };
        let config = bincode::serialize(descriptor).unwrap_or_default();
        let id = self
            .graph
            .lock()
            .add_node_with_kind(instance.node, "plugin", config)?;
        self.plugins.lock().insert(id, instance.handle);
        Ok(id)
    }

    /// Load a plugin straight into a strip's insert chain.
    #[cfg(feature = "plugin")]
    pub fn insert_plugin(
        &self,
        strip: StripId,
        slot: usize,
        descriptor: &PluginDescriptor,
    ) -> Result<NodeId> {
        let node = self.load_plugin(descriptor)?;
        let result = self.with_strip(strip, |strip, graph| {
            strip.add_insert_node(graph, slot, node).map_err(Error::from)
        });
        if let Err(e) = result {
            // Roll the orphaned node back out of the graph
            let _ = self.apply(EngineOp::RemoveNode(node));
            return Err(e);
        }
        Ok(node)
    }

    /// Control-side handle of a hosted plugin node.
    #[cfg(feature = "plugin")]
    pub fn plugin_handle(&self, node: NodeId) -> Result<Arc<dyn InstanceHandle>> {
        self.plugins
            .lock()
            .get(&node)
            .cloned()
            .ok_or(Error::UnknownPlugin(node))
    }

    /// Registry of units the in-process host can build.
    #[cfg(feature = "plugin")]
    pub fn native_registry(&self) -> &ostinato_plugin::NativeUnitRegistry {
        self.native_host.registry()
    }

    // --- Persistence boundary ----------------------------------------------

    /// Capture the full graph state (topology, parameters, strip layouts,
    /// plugin state blobs). Pure read; legal in any state.
    pub fn snapshot(&self) -> GraphState {
        let graph = self.graph.lock();
        let mut state = GraphState::capture(&graph);

        #[cfg(feature = "plugin")]
        {
            let plugins = self.plugins.lock();
            for node in &mut state.nodes {
                if node.kind == "plugin" {
                    if let Some(handle) = plugins.get(&node.id) {
                        let blob = handle.save_state().unwrap_or_default();
                        node.config = bincode::serialize(&(handle.descriptor().clone(), blob))
                            .unwrap_or_default();
                    }
                }
            }
        }

        let strips = self.strips.lock();
        state.strips = strips
            .iter()
            .map(|strip| StripState {
                name: strip.name().to_string(),
                input: strip.input_node(),
                inserts: strip.inserts().to_vec(),
                fader: strip.fader_node(),
                sends: strip
                    .sends()
                    .iter()
                    .map(|slot| ostinato_core::SendState {
                        node: slot.node,
                        pre_fader: slot.pre_fader,
                        enabled: slot.is_enabled(&graph),
                    })
                    .collect(),
                direct_out: strip.direct_out().and_then(|ports| {
                    let left = graph.port(ports[0])?;
                    let right = graph.port(ports[1])?;
                    Some((left.node, left.index, right.index))
                }),
            })
            .collect();
        state
    }

    /// Rebuild the graph from a snapshot. Requires `Ready` or `Stopped`.
    pub fn restore(&self, state: &GraphState) -> Result<()> {
        use ostinato_core::RestoreError;

        {
            let engine_state = self.state.lock();
            match *engine_state {
                EngineState::Ready | EngineState::Stopped => {}
                other => {
                    return Err(Error::InvalidState {
                        required: "ready or stopped",
                        actual: other.name(),
                    })
                }
            }
        }

        let mut graph = self.graph.lock();
        let mut strips = self.strips.lock();

        // Tear down everything; the snapshot carries the master too.
        strips.clear();
        #[cfg(feature = "plugin")]
        {
            let mut plugins = self.plugins.lock();
            for handle in plugins.values() {
                handle.destroy();
            }
            plugins.clear();
        }
        let live: Vec<NodeId> = graph.node_ids().collect();
        for id in live {
            graph.remove_node(id).map_err(Error::from)?;
        }

        // Rebuild nodes with fresh ids, remembering the mapping.
        let mut map: HashMap<NodeId, NodeId> = HashMap::new();
        for node_state in &state.nodes {
            let new_id = match node_state.kind.as_str() {
                #[cfg(feature = "plugin")]
                "plugin" => {
                    let (descriptor, blob): (PluginDescriptor, Vec<u8>) =
                        bincode::deserialize(&node_state.config)
                            .map_err(|e| Error::Restore(RestoreError::Corrupt(e.to_string())))?;
                    let instance = match descriptor.format_kind {
                        FormatKind::Native => self.native_host.instantiate(
                            &descriptor,
                            self.sample_rate,
                            self.block_size,
                        )?,
                        FormatKind::Bridged => self.bridged_host.instantiate(
                            &descriptor,
                            self.sample_rate,
                            self.block_size,
                        )?,
                    };
                    if !blob.is_empty() {
                        instance.handle.restore_state(&blob)?;
                    }
                    let config = bincode::serialize(&descriptor).unwrap_or_default();
                    let id = graph.add_node_with_kind(instance.node, "plugin", config)?;
                    self.plugins.lock().insert(id, instance.handle);
                    id
                }
                kind => {
                    let node = self.factories.create(kind, &node_state.config)?;
                    graph.add_node_with_kind(node, kind, node_state.config.clone())?
                }
            };
            map.insert(node_state.id, new_id);

            for &(param, value) in &node_state.params {
                graph.set_parameter(new_id, param, value)?;
            }
        }

        let remap = |old: NodeId| -> Result<NodeId> {
            map.get(&old)
                .copied()
                .ok_or_else(|| Error::Restore(RestoreError::Corrupt(format!("{old:?} unmapped"))))
        };

        for conn in &state.connections {
            let src = graph
                .output_port(remap(conn.source_node)?, conn.source_index)
                .map_err(Error::from)?;
            let dst = graph
                .input_port(remap(conn.dest_node)?, conn.dest_index)
                .map_err(Error::from)?;
            graph.connect_with(
                src,
                dst,
                ConnectOptions {
                    enabled: conn.enabled,
                    multiplier: conn.multiplier,
                    feedback: conn.feedback,
                },
            )?;
        }

        if let Some(master) = state.master {
            graph.set_master(Some(remap(master)?))?;
        }

        for strip_state in &state.strips {
            let inserts: Vec<NodeId> = strip_state
                .inserts
                .iter()
                .map(|&id| remap(id))
                .collect::<Result<_>>()?;
            let sends = strip_state
                .sends
                .iter()
                .map(|send| {
                    let node = remap(send.node)?;
                    let kind = graph
                        .node(node)
                        .filter(|info| info.name == "event-send")
                        .map(|_| SendKind::Event)
                        .unwrap_or(SendKind::Audio);
                    Ok((node, kind, send.pre_fader))
                })
                .collect::<Result<Vec<_>>>()?;
            let direct_out = match strip_state.direct_out {
                Some((node, l_index, r_index)) => {
                    let node = remap(node)?;
                    Some([
                        graph.input_port(node, l_index).map_err(Error::from)?,
                        graph.input_port(node, r_index).map_err(Error::from)?,
                    ])
                }
                None => None,
            };
            strips.push(ChannelStrip::adopt(
                &graph,
                strip_state.name.clone(),
                remap(strip_state.input)?,
                inserts,
                remap(strip_state.fader)?,
                sends,
                direct_out,
            ));
        }

        Self::sync_solo_state(&self.solo, &strips, &graph);
        Ok(())
    }

    // --- Export -------------------------------------------------------------

    /// Render a transport range to a file.
    ///
    /// Requires `Ready` or `Stopped`; the engine sits in `Exporting` for the
    /// duration, so export never races live playback on the same graph.
    #[cfg(feature = "export")]
    pub fn export(
        &self,
        range: ostinato_export::ExportRange,
        options: &ostinato_export::ExportOptions,
        path: &Path,
        cancel: &AtomicBool,
    ) -> Result<ostinato_export::RenderReport> {
        {
            let mut state = self.state.lock();
            match *state {
                EngineState::Ready | EngineState::Stopped => *state = EngineState::Exporting,
                other => {
                    return Err(Error::InvalidState {
                        required: "stopped",
                        actual: other.name(),
                    })
                }
            }
        }

        let result = {
            let mut scheduler = self.scheduler.lock();
            ostinato_export::render_to_file(&mut scheduler, range, options, path, None, cancel)
        };

        *self.state.lock() = EngineState::Stopped;
        result.map_err(Error::from)
    }
}

impl Drop for OstinatoEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
