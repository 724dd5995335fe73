//! Plugin hosting for the ostinato engine.
//!
//! Two host adapters behind one contract:
//!
//! - [`NativeHost`]: in-process units (registered factories or shared
//!   libraries), panics caught per node.
//! - [`BridgedHost`]: one server process per instance behind IPC with a
//!   bounded per-block deadline; a wedged or crashed unit degrades to
//!   silence instead of stalling the scheduler.
//!
//! Both produce a [`PluginInstance`]: a graph-side
//! [`ProcessingNode`](ostinato_core::ProcessingNode) plus a control-side
//! [`InstanceHandle`] for state round-trips and parameter access.

pub mod error;
pub use error::{HostError, LoadStage, Result};

pub mod descriptor;
pub use descriptor::{FormatKind, ParamInfo, PluginDescriptor, PortLayout};

pub mod host;
pub use host::{
    InstanceHandle, NativeUnit, NativeUnitRegistry, PluginInstance, UnitFactory, UnitIo,
};

pub mod units;
pub use units::builtin_descriptors;

pub mod protocol;
pub use protocol::{HostMessage, ParamChange, ServerMessage, WireTransport};

pub mod ipc;

pub mod native;
pub use native::NativeHost;

pub mod external;
pub use external::{UnitVTable, UNIT_ABI_VERSION, UNIT_SYMBOL};

pub mod bridged;
pub use bridged::{BridgedHost, BridgedHostConfig};

pub mod server;
