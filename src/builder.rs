//! Engine builder: backend negotiation and subsystem wiring.

use crate::engine::OstinatoEngine;
use crate::error::Result;
use ostinato_core::{
    command_channel, negotiate, param_channel, transport_pair, BackendConfig, DspLoadMeter,
    EngineScheduler, Fader, FaderKind, NullBackend, RoutingGraph, SoloState,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[cfg(feature = "plugin")]
use ostinato_plugin::{BridgedHost, BridgedHostConfig, NativeHost, NativeUnitRegistry};

/// Builder for [`OstinatoEngine`].
///
/// # Example
///
/// ```ignore
/// let engine = OstinatoEngine::builder()
///     .sample_rate(48_000)
///     .block_size(256)
///     .headless()
///     .build()?;
///
/// let drums = engine.add_strip("drums")?;
/// engine.transport().play();
/// engine.start()?;
/// ```
pub struct OstinatoEngineBuilder {
    config: BackendConfig,
    command_capacity: usize,
    param_capacity: usize,
    #[cfg(feature = "plugin")]
    bridged_config: BridgedHostConfig,
    #[cfg(feature = "plugin")]
    native_registry: Option<NativeUnitRegistry>,
}

impl Default for OstinatoEngineBuilder {
    fn default() -> Self {
        Self {
            config: BackendConfig::default(),
            command_capacity: ostinato_core::commands::DEFAULT_COMMAND_CAPACITY,
            param_capacity: ostinato_core::commands::DEFAULT_PARAM_CAPACITY,
            #[cfg(feature = "plugin")]
            bridged_config: BridgedHostConfig::default(),
            #[cfg(feature = "plugin")]
            native_registry: None,
        }
    }
}

impl OstinatoEngineBuilder {
    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.config.sample_rate = rate;
        self
    }

    pub fn block_size(mut self, block_size: u32) -> Self {
        self.config.block_size = block_size;
        self
    }

    /// Request a specific backend by name (`"cpal"`, `"null"`).
    pub fn backend(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Use the clock-paced null backend (no audio device).
    pub fn headless(self) -> Self {
        self.backend(ostinato_core::backend::NULL_BACKEND_NAME)
    }

    /// Bridged plugin host configuration (server binary path, timeouts).
    #[cfg(feature = "plugin")]
    pub fn bridged_host(mut self, config: BridgedHostConfig) -> Self {
        self.bridged_config = config;
        self
    }

    /// Replace the native unit registry (defaults to the built-in units).
    #[cfg(feature = "plugin")]
    pub fn native_units(mut self, registry: NativeUnitRegistry) -> Self {
        self.native_registry = Some(registry);
        self
    }

    /// Initialize the engine: negotiate a backend, build the scheduler and
    /// the master bus. A missing audio device never aborts construction; the
    /// engine falls back to the null backend and records the error as a
    /// warning.
    pub fn build(self) -> Result<OstinatoEngine> {
        let (backend, backend_warning) = match negotiate(&self.config) {
            Ok(backend) => (backend, None),
            Err(err) => (
                Box::new(NullBackend::new(&self.config)) as Box<dyn ostinato_core::AudioBackend>,
                Some(err),
            ),
        };
        let sample_rate = backend.sample_rate();
        let block_size = self.config.block_size as usize;

        let (command_tx, command_rx) = command_channel(self.command_capacity);
        let (param_tx, param_rx) = param_channel(self.param_capacity);
        let (clock, transport) = transport_pair(sample_rate);
        let meter = Arc::new(DspLoadMeter::new(sample_rate));

        let mut scheduler = EngineScheduler::new(
            sample_rate,
            block_size,
            command_rx,
            param_rx,
            clock,
            Arc::clone(&meter),
        );
        scheduler.prepare();
        let scheduler = Arc::new(Mutex::new(scheduler));

        let solo = Arc::new(SoloState::default());
        let mut graph = RoutingGraph::new(command_tx, param_tx);
        let master_fader = Fader::new(FaderKind::Master, Arc::clone(&solo));
        let config = ostinato_core::encode_config(&master_fader.config());
        let master = graph.add_node_with_kind(Box::new(master_fader), "core.fader", config)?;
        graph.set_master(Some(master))?;

        Ok(OstinatoEngine::from_parts(
            graph,
            scheduler,
            backend,
            backend_warning,
            transport,
            meter,
            solo,
            master,
            sample_rate,
            block_size,
            #[cfg(feature = "plugin")]
            NativeHost::new(
                self.native_registry
                    .unwrap_or_else(NativeUnitRegistry::with_builtins),
            ),
            #[cfg(feature = "plugin")]
            BridgedHost::new(self.bridged_config),
        ))
    }
}
