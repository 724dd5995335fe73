//! The routing graph: typed ports, gained connections, deterministic order.
//!
//! Two representations share the same topology code. [`RoutingGraph`] is the
//! edit-side authority: it validates every structural mutation *before* it
//! happens and mirrors the full port/connection tables. [`GraphExecutor`] is
//! the realtime side: it owns the node objects and block buffers and only
//! ever receives pre-validated mutations through the command queue.

mod connection;
mod executor;
mod model;
mod port;
mod topology;

pub use connection::{Connection, ConnectOptions};
pub use executor::{GraphExecutor, ProcessBlock};
pub use model::{NodeInfo, RoutingGraph};
pub use port::{NodePorts, PortDecl, PortDirection, PortInfo, PortKind};
pub use topology::Topology;

use serde::{Deserialize, Serialize};

/// Stable node identifier; monotonic, never reused within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    /// Construct from a raw id (persistence layers, tests).
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Stable port identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortId(pub(crate) u64);

impl PortId {
    /// Construct from a raw id (persistence layers, tests).
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Stable connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub(crate) u64);

impl ConnectionId {
    /// Construct from a raw id (persistence layers, tests).
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}
