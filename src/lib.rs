//! Real-time audio routing and processing engine.
//!
//! # Primary API
//!
//! - [`OstinatoEngine`] / [`OstinatoEngineBuilder`]: main entry point
//! - [`ChannelStrip`]: insert chain, fader, sends, direct out per track
//! - [`TransportHandle`]: play/stop/seek/tempo/loop
//! - [`EngineOp`]: command surface for an external undo layer
//!
//! # Feature-gated APIs
//!
//! - `"plugin"`: native and bridged plugin hosting ([`PluginDescriptor`])
//! - `"export"`: offline WAV/FLAC rendering ([`ExportOptions`])
//! - `"cpal"`: device output via CPAL (the null backend is always available)
//!
//! # Example
//!
//! ```ignore
//! use ostinato::prelude::*;
//!
//! let engine = OstinatoEngine::builder().build()?;
//! let strip = engine.add_strip("lead")?;
//!
//! engine.graph(|g| {
//!     let sine = g.add_node(Box::new(SineSource::new(440.0, 0.5)))?;
//!     // route the source into the strip ...
//!     Ok::<_, ostinato::Error>(())
//! })?;
//!
//! engine.transport().play();
//! engine.start()?;
//! ```

mod builder;
mod engine;
mod error;

pub use builder::OstinatoEngineBuilder;
pub use engine::{EngineOp, OstinatoEngine, StripId};
pub use error::{Error, Result};

pub use ostinato_core as core;
pub use ostinato_core::{
    amp_to_db, db_to_amp, ChannelStrip, ConnectOptions, Connection, ConnectionId, DspLoadMetrics,
    EngineState, Event, GraphError, GraphState, NodeId, PortId, PortKind, ProcessingNode,
    RoutingGraph, SendKind, SineSource, TimeSignature, TransportHandle,
};

#[cfg(feature = "plugin")]
pub use ostinato_plugin as plugin;
#[cfg(feature = "plugin")]
pub use ostinato_plugin::{FormatKind, InstanceHandle, PluginDescriptor};

#[cfg(feature = "export")]
pub use ostinato_export as export;
#[cfg(feature = "export")]
pub use ostinato_export::{ExportMetadata, ExportOptions, ExportRange};

/// Common imports for engine embedders.
pub mod prelude {
    pub use crate::{
        ChannelStrip, EngineOp, EngineState, Error, OstinatoEngine, OstinatoEngineBuilder,
        RoutingGraph, SendKind, StripId,
    };
    pub use ostinato_core::{db_to_amp, NodeId, PortId, PortKind, SineSource};

    #[cfg(feature = "plugin")]
    pub use crate::{FormatKind, PluginDescriptor};

    #[cfg(feature = "export")]
    pub use crate::{ExportMetadata, ExportOptions, ExportRange};
}
