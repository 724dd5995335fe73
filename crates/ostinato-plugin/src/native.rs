//! In-process host: wraps a [`NativeUnit`] behind the node contract with
//! per-node fault isolation.

use crate::descriptor::{FormatKind, PluginDescriptor};
use crate::error::{HostError, LoadStage, Result};
use crate::external;
use crate::host::{InstanceHandle, NativeUnit, NativeUnitRegistry, PluginInstance, UnitIo};
use crate::protocol::ParamChange;
use ostinato_core::{
    AtomicFlag, AtomicFloat, Event, NodePorts, ParameterSpec, PortDecl, ProcessBlock,
    ProcessingNode,
};
use smallvec::SmallVec;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Parameters and failure latch shared between node and handle.
pub(crate) struct SharedParams {
    /// Values indexed by descriptor param order.
    pub values: Vec<AtomicFloat>,
    pub failed: AtomicFlag,
}

impl SharedParams {
    pub(crate) fn from_descriptor(descriptor: &PluginDescriptor) -> Arc<Self> {
        Arc::new(Self {
            values: descriptor
                .params
                .iter()
                .map(|p| AtomicFloat::new(p.default))
                .collect(),
            failed: AtomicFlag::new(false),
        })
    }
}

pub(crate) fn node_ports(descriptor: &PluginDescriptor) -> NodePorts {
    let layout = &descriptor.port_layout;
    let mut inputs = Vec::new();
    if layout.audio_inputs >= 2 {
        inputs.push(PortDecl::audio("in_l"));
        inputs.push(PortDecl::audio("in_r"));
    } else if layout.audio_inputs == 1 {
        inputs.push(PortDecl::audio("in"));
    }
    if layout.event_input {
        inputs.push(PortDecl::event("events"));
    }
    let outputs = vec![PortDecl::audio("out_l"), PortDecl::audio("out_r")];
    NodePorts::new(inputs, outputs)
}

pub(crate) fn parameter_specs(descriptor: &PluginDescriptor) -> Vec<ParameterSpec> {
    descriptor
        .params
        .iter()
        .map(|p| ParameterSpec::dynamic(p.id, p.name.clone(), p.min, p.max, p.default))
        .collect()
}

/// Map a descriptor param id to its index, if any.
pub(crate) fn param_index(descriptor: &PluginDescriptor, id: u32) -> Option<usize> {
    descriptor.params.iter().position(|p| p.id == id)
}

/// The in-process host.
pub struct NativeHost {
    registry: NativeUnitRegistry,
}

impl NativeHost {
    pub fn new(registry: NativeUnitRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &NativeUnitRegistry {
        &self.registry
    }

    /// Instantiate a native unit.
    ///
    /// Failures (unknown id, library errors, a panicking constructor) are
    /// reported as recoverable errors: the caller bypasses the slot instead
    /// of aborting the engine.
    pub fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
        sample_rate: f64,
        block_size: usize,
    ) -> Result<PluginInstance> {
        debug_assert_eq!(descriptor.format_kind, FormatKind::Native);

        let unit = build_unit(&self.registry, descriptor)?;
        let mut unit = unit;
        let prepared = catch_unwind(AssertUnwindSafe(|| {
            unit.prepare(sample_rate, block_size);
            unit
        }));
        let unit = prepared.map_err(|_| HostError::Panicked {
            stage: LoadStage::Activation,
        })?;

        let shared = SharedParams::from_descriptor(descriptor);
        let node = NativePluginNode {
            descriptor: descriptor.clone(),
            specs: parameter_specs(descriptor),
            unit,
            shared: Arc::clone(&shared),
            param_cache: vec![0.0; descriptor.params.len()],
        };
        let handle = NativeHandle {
            descriptor: descriptor.clone(),
            shared,
        };
        Ok(PluginInstance {
            node: Box::new(node),
            handle: Arc::new(handle),
        })
    }
}

pub(crate) fn build_unit(
    registry: &NativeUnitRegistry,
    descriptor: &PluginDescriptor,
) -> Result<Box<dyn NativeUnit>> {
    if let Some(factory) = registry.factory(&descriptor.unique_id) {
        let built = catch_unwind(AssertUnwindSafe(|| factory(descriptor)));
        return match built {
            Ok(result) => result,
            Err(_) => Err(HostError::Panicked {
                stage: LoadStage::Instantiation,
            }),
        };
    }
    if let Some(path) = &descriptor.binary_path {
        return Ok(Box::new(external::ExternalUnit::load(path)?));
    }
    Err(HostError::UnknownUnit(descriptor.unique_id.clone()))
}

/// Graph-side node wrapping a native unit.
///
/// A panic inside the unit latches the node: output is silence from that
/// block until the handle clears the latch, and the fault never crosses the
/// node boundary.
pub struct NativePluginNode {
    descriptor: PluginDescriptor,
    specs: Vec<ParameterSpec>,
    unit: Box<dyn NativeUnit>,
    shared: Arc<SharedParams>,
    param_cache: Vec<f32>,
}

impl ProcessingNode for NativePluginNode {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn ports(&self) -> NodePorts {
        node_ports(&self.descriptor)
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &self.specs
    }

    fn prepare(&mut self, sample_rate: f64, max_block_size: usize) {
        self.unit.prepare(sample_rate, max_block_size);
    }

    fn process(&mut self, block: &mut ProcessBlock<'_>) {
        if self.shared.failed.get() {
            return;
        }

        // Fold this block's events into the shared values and collect the
        // sample-accurate change list for the unit.
        let mut changes: SmallVec<[ParamChange; 16]> = SmallVec::new();
        for idx in 0..block.param_events().len() {
            let event = block.param_events()[idx];
            if let Some(index) = param_index(&self.descriptor, event.param) {
                self.shared.values[index].set(event.value);
                changes.push(ParamChange {
                    param: event.param,
                    value: event.value,
                    offset: block.event_offset(&event) as u32,
                });
            }
        }
        for (cache, value) in self.param_cache.iter_mut().zip(&self.shared.values) {
            *cache = value.get();
        }

        let n = block.n_samples();
        let in_l = block.audio_in_ref(0);
        let in_r = block.audio_in_ref(1);
        let event_index = self.descriptor.port_layout.audio_inputs.min(2);
        let events: &[Event] = block
            .events_in_ref(event_index)
            .map(|b| b.as_slice())
            .unwrap_or(&[]);
        let (out_l, out_r) = block.audio_out_pair(0, 1);

        let unit = &mut self.unit;
        let params = &self.param_cache;
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut io = UnitIo {
                in_l,
                in_r,
                out_l,
                out_r,
                events,
                params,
                changes: &changes,
                n_samples: n,
            };
            unit.process(&mut io);
        }));

        if result.is_err() {
            self.shared.failed.set(true);
            let (out_l, out_r) = block.audio_out_pair(0, 1);
            out_l.fill(0.0);
            out_r.fill(0.0);
        }
    }

    fn release(&mut self) {
        self.unit.reset();
    }
}

/// Control-side handle for a native instance.
pub struct NativeHandle {
    descriptor: PluginDescriptor,
    shared: Arc<SharedParams>,
}

impl InstanceHandle for NativeHandle {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn save_state(&self) -> Result<Vec<u8>> {
        let values: Vec<f32> = self.shared.values.iter().map(|v| v.get()).collect();
        Ok(bincode::serialize(&values)?)
    }

    fn restore_state(&self, data: &[u8]) -> Result<()> {
        let values: Vec<f32> =
            bincode::deserialize(data).map_err(|e| HostError::StateRestore(e.to_string()))?;
        if values.len() != self.shared.values.len() {
            return Err(HostError::StateRestore(format!(
                "expected {} parameters, got {}",
                self.shared.values.len(),
                values.len()
            )));
        }
        for (slot, value) in self.shared.values.iter().zip(values) {
            slot.set(value);
        }
        Ok(())
    }

    fn set_parameter(&self, param: u32, value: f32) {
        if let Some(index) = param_index(&self.descriptor, param) {
            self.shared.values[index].set(value);
        }
    }

    fn parameter(&self, param: u32) -> Option<f32> {
        param_index(&self.descriptor, param).map(|i| self.shared.values[i].get())
    }

    fn is_failed(&self) -> bool {
        self.shared.failed.get()
    }

    fn reload(&self) -> Result<()> {
        self.shared.failed.set(false);
        Ok(())
    }

    fn destroy(&self) {}
}
