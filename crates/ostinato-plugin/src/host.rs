//! Unit and instance contracts shared by the native and bridged hosts.

use crate::descriptor::PluginDescriptor;
use crate::error::Result;
use crate::protocol::ParamChange;
use ostinato_core::Event;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-block I/O handed to a native unit.
///
/// `params` holds the current value of every parameter in descriptor order;
/// `changes` lists this block's sample-accurate changes for units that want
/// to apply them at their offsets instead of block-rate.
pub struct UnitIo<'a> {
    pub in_l: &'a [f32],
    pub in_r: &'a [f32],
    pub out_l: &'a mut [f32],
    pub out_r: &'a mut [f32],
    pub events: &'a [Event],
    pub params: &'a [f32],
    pub changes: &'a [ParamChange],
    pub n_samples: usize,
}

/// An in-process processing unit behind the host adapter.
///
/// Units do not talk to the graph directly; the adapter wraps them behind
/// the node contract and isolates their faults.
pub trait NativeUnit: Send {
    fn prepare(&mut self, _sample_rate: f64, _max_block: usize) {}

    fn process(&mut self, io: &mut UnitIo<'_>);

    fn reset(&mut self) {}
}

/// Builds a unit from its descriptor.
pub type UnitFactory = Arc<dyn Fn(&PluginDescriptor) -> Result<Box<dyn NativeUnit>> + Send + Sync>;

/// Registry of in-process unit factories keyed by `unique_id`.
#[derive(Default, Clone)]
pub struct NativeUnitRegistry {
    factories: Arc<RwLock<HashMap<String, UnitFactory>>>,
}

impl NativeUnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the units this crate ships.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::units::register_builtins(&registry);
        registry
    }

    pub fn register<F>(&self, unique_id: impl Into<String>, factory: F)
    where
        F: Fn(&PluginDescriptor) -> Result<Box<dyn NativeUnit>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(unique_id.into(), Arc::new(factory));
    }

    pub fn contains(&self, unique_id: &str) -> bool {
        self.factories.read().contains_key(unique_id)
    }

    pub fn factory(&self, unique_id: &str) -> Option<UnitFactory> {
        self.factories.read().get(unique_id).cloned()
    }
}

/// Control-side handle to a hosted instance.
///
/// The processing node lives in the graph; this handle stays with the
/// engine for state round-trips, parameter pokes and failure inspection.
pub trait InstanceHandle: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;

    /// Opaque state blob. `restore_state(save_state())` is behaviorally
    /// idempotent.
    fn save_state(&self) -> Result<Vec<u8>>;

    fn restore_state(&self, data: &[u8]) -> Result<()>;

    fn set_parameter(&self, param: u32, value: f32);

    fn parameter(&self, param: u32) -> Option<f32>;

    /// Whether the instance has latched to silence after a fault.
    fn is_failed(&self) -> bool;

    /// Clear the failure latch and try to resume processing.
    fn reload(&self) -> Result<()>;

    /// Tear the instance down (stops a bridged instance's server process).
    fn destroy(&self);
}

/// A hosted instance: the graph-side node plus the control-side handle.
pub struct PluginInstance {
    pub node: Box<dyn ostinato_core::ProcessingNode>,
    pub handle: Arc<dyn InstanceHandle>,
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance").finish_non_exhaustive()
    }
}
