//! Real-time audio routing core: port graph, channel strips, transport,
//! per-block scheduler.
//!
//! # Primary API
//!
//! - [`RoutingGraph`]: edit-side graph authority (validate, then publish)
//! - [`GraphExecutor`] / [`EngineScheduler`]: realtime evaluation
//! - [`ChannelStrip`]: insert chain + fader + sends as a fixed sub-graph
//! - [`TransportHandle`]: play/stop/seek/tempo/loop control
//! - [`DspLoadMeter`]: DSP load and xrun accounting
//!
//! Structural edits flow through a bounded SPSC command queue and are applied
//! between blocks; the realtime thread never allocates mid-block, never takes
//! a blocking lock, and never waits on the edit side.

pub mod error;
pub use error::{BackendError, EngineError, GraphError, RestoreError};

pub mod buffer;
pub use buffer::{Event, EventBuffer};

pub(crate) mod lockfree;
pub use lockfree::{AtomicDouble, AtomicFlag, AtomicFloat, AtomicSamples};

pub mod parameter;
pub use parameter::{
    amp_from_fader_val, amp_to_db, db_to_amp, fader_val_from_amp, pan_gains, ParameterScale,
    ParameterSpec, SmoothingPolicy,
};

pub mod smooth;
pub use smooth::SmoothedValue;

pub mod graph;
pub use graph::{
    ConnectOptions, Connection, ConnectionId, GraphExecutor, NodeId, NodeInfo, NodePorts,
    PortDecl, PortDirection, PortId, PortInfo, PortKind, ProcessBlock, RoutingGraph,
};

pub mod node;
pub use node::ProcessingNode;

pub mod commands;
pub use commands::{
    command_channel, param_channel, CommandBatch, CommandReceiver, CommandSender, EngineCommand,
    ParamEvent, ParamEventBlock, ParamReceiver, ParamSender,
};

pub mod nodes;
pub use nodes::{
    ChannelSend, ControlSource, Fader, FaderKind, MacroProcessor, NullSource, SendKind,
    SineSource, SoloState, TrackProcessor,
};

pub mod strip;
pub use strip::{ChannelStrip, SendSlot};

pub mod transport;
pub use transport::{
    transport_pair, TempoMap, TempoMapSnapshot, TimeSignature, Transport, TransportHandle,
    TransportView, BBT,
};

pub mod metering;
pub use metering::{DspLoadMeter, DspLoadMetrics};

pub mod scheduler;
pub use scheduler::{EngineScheduler, EngineState};

pub mod backend;
pub use backend::{
    capabilities, negotiate, AudioBackend, BackendCapabilities, BackendConfig, NullBackend,
};

pub mod snapshot;
pub use snapshot::{
    decode_config, encode_config, ConnectionState, GraphState, NodeFactory, NodeFactoryRegistry,
    NodeState, SendState, StripState,
};

#[cfg(test)]
pub(crate) mod test_util;
