//! Port-to-port connections.

use super::{ConnectionId, PortId};
use serde::{Deserialize, Serialize};

/// A directed connection between an output port and an input port.
///
/// Disabling a connection skips it during evaluation but keeps it in the data
/// model (and in cycle analysis), so re-enabling restores the exact prior
/// routing. Feedback connections deliver the source's previous-block output
/// and never participate in cycle analysis or ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub source: PortId,
    pub dest: PortId,
    pub enabled: bool,
    /// Linear gain applied to this connection's contribution.
    pub multiplier: f32,
    pub feedback: bool,
}

/// Options for [`RoutingGraph::connect_with`](super::RoutingGraph::connect_with).
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    pub enabled: bool,
    pub multiplier: f32,
    /// Mark as a one-block-delay feedback/sidechain edge.
    pub feedback: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            multiplier: 1.0,
            feedback: false,
        }
    }
}

impl ConnectOptions {
    pub fn feedback() -> Self {
        Self {
            feedback: true,
            ..Self::default()
        }
    }

    pub fn with_multiplier(multiplier: f32) -> Self {
        Self {
            multiplier,
            ..Self::default()
        }
    }
}
