//! Persistence boundary: graph snapshots and node factories.
//!
//! The core does not serialize projects itself; it exposes [`GraphState`] for
//! an external persistence layer and rebuilds graphs from it through the
//! [`NodeFactoryRegistry`].

use crate::error::RestoreError;
use crate::graph::{NodeId, RoutingGraph};
use crate::node::ProcessingNode;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Serialized form of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub id: NodeId,
    pub name: String,
    /// Factory kind; `custom:*` kinds cannot be rebuilt.
    pub kind: String,
    pub config: Vec<u8>,
    pub params: Vec<(u32, f32)>,
}

/// Serialized form of one connection, addressed by node + port index so the
/// state survives id reallocation on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionState {
    pub source_node: NodeId,
    pub source_index: usize,
    pub dest_node: NodeId,
    pub dest_index: usize,
    pub enabled: bool,
    pub multiplier: f32,
    pub feedback: bool,
}

/// Serialized strip layout (which nodes play which role).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StripState {
    pub name: String,
    pub input: NodeId,
    pub inserts: Vec<NodeId>,
    pub fader: NodeId,
    pub sends: Vec<SendState>,
    pub direct_out: Option<(NodeId, usize, usize)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendState {
    pub node: NodeId,
    pub pre_fader: bool,
    pub enabled: bool,
}

/// Complete serializable graph topology + parameters + plugin blobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphState {
    pub nodes: Vec<NodeState>,
    pub connections: Vec<ConnectionState>,
    pub strips: Vec<StripState>,
    pub master: Option<NodeId>,
}

impl GraphState {
    /// Capture the current graph. Pure read; legal in any engine state.
    pub fn capture(graph: &RoutingGraph) -> Self {
        let nodes = graph
            .nodes()
            .map(|info| NodeState {
                id: info.id,
                name: info.name.clone(),
                kind: info.kind.clone(),
                config: info.config.clone(),
                params: info.param_values.iter().map(|(&k, &v)| (k, v)).collect(),
            })
            .collect();

        let connections = graph
            .connections()
            .filter_map(|conn| {
                let src = graph.port(conn.source)?;
                let dst = graph.port(conn.dest)?;
                Some(ConnectionState {
                    source_node: src.node,
                    source_index: src.index,
                    dest_node: dst.node,
                    dest_index: dst.index,
                    enabled: conn.enabled,
                    multiplier: conn.multiplier,
                    feedback: conn.feedback,
                })
            })
            .collect();

        Self {
            nodes,
            connections,
            strips: Vec::new(),
            master: graph.master(),
        }
    }
}

/// Constructs a node from its serialized config.
pub type NodeFactory =
    Arc<dyn Fn(&[u8]) -> Result<Box<dyn ProcessingNode>, RestoreError> + Send + Sync>;

/// Registry of node factories keyed by kind string.
///
/// The engine registers the built-in kinds at startup; embedders add their
/// own before calling restore.
#[derive(Default)]
pub struct NodeFactoryRegistry {
    factories: RwLock<HashMap<String, NodeFactory>>,
}

impl NodeFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&[u8]) -> Result<Box<dyn ProcessingNode>, RestoreError> + Send + Sync + 'static,
    {
        self.factories.write().insert(kind.into(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.read().contains_key(kind)
    }

    pub fn create(&self, kind: &str, config: &[u8]) -> Result<Box<dyn ProcessingNode>, RestoreError> {
        let factory = self
            .factories
            .read()
            .get(kind)
            .cloned()
            .ok_or_else(|| RestoreError::UnknownNodeKind(kind.to_string()))?;
        factory(config)
    }
}

/// Encode a factory config blob.
pub fn encode_config<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).unwrap_or_default()
}

/// Decode a factory config blob.
pub fn decode_config<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, RestoreError> {
    bincode::deserialize(bytes).map_err(|e| RestoreError::Corrupt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{command_channel, param_channel};
    use crate::nodes::{FaderConfig, FaderKind, SineConfig, SineSource};

    #[test]
    fn test_config_roundtrip() {
        let config = FaderConfig {
            kind: FaderKind::Master,
        };
        let bytes = encode_config(&config);
        let decoded: FaderConfig = decode_config(&bytes).unwrap();
        assert_eq!(decoded.kind, FaderKind::Master);
    }

    #[test]
    fn test_registry_unknown_kind() {
        let registry = NodeFactoryRegistry::new();
        assert!(matches!(
            registry.create("core.fader", &[]),
            Err(RestoreError::UnknownNodeKind(_))
        ));
    }

    #[test]
    fn test_registry_creates_registered_kind() {
        let registry = NodeFactoryRegistry::new();
        registry.register("core.sine", |bytes| {
            let config: SineConfig = decode_config(bytes)?;
            Ok(Box::new(SineSource::from_config(&config)) as Box<dyn ProcessingNode>)
        });
        assert!(registry.contains("core.sine"));

        let config = encode_config(&SineConfig {
            frequency: 880.0,
            amplitude: 0.5,
        });
        let node = registry.create("core.sine", &config).unwrap();
        assert_eq!(node.name(), "sine");
    }

    #[test]
    fn test_capture_records_topology_and_params() {
        let (ctx, _crx) = command_channel(64);
        let (ptx, _prx) = param_channel(64);
        let mut graph = RoutingGraph::new(ctx, ptx);

        let config = encode_config(&SineConfig {
            frequency: 440.0,
            amplitude: 1.0,
        });
        let a = graph
            .add_node_with_kind(Box::new(SineSource::new(440.0, 1.0)), "core.sine", config)
            .unwrap();
        let b = graph
            .add_node_with_kind(
                Box::new(crate::nodes::TrackProcessor::new()),
                "core.track-in",
                Vec::new(),
            )
            .unwrap();
        graph
            .connect(graph.audio_out(a, 0).unwrap(), graph.audio_in(b, 0).unwrap())
            .unwrap();
        graph.set_parameter(a, 1, 0.25).unwrap();
        graph.set_master(Some(b)).unwrap();

        let state = GraphState::capture(&graph);
        assert_eq!(state.nodes.len(), 2);
        assert_eq!(state.connections.len(), 1);
        assert_eq!(state.master, Some(b));

        let sine = state.nodes.iter().find(|n| n.kind == "core.sine").unwrap();
        assert!(sine.params.contains(&(1, 0.25)));
    }
}
