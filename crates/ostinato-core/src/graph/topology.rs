//! Node-level topology: cycle detection and stable topological ordering.

use super::{ConnectionId, NodeId};
use std::collections::{BinaryHeap, HashMap, HashSet};

#[derive(Debug, Clone, Copy)]
struct Edge {
    id: ConnectionId,
    src: NodeId,
    dst: NodeId,
    feedback: bool,
}

/// Dependency structure shared by the edit model and the realtime executor.
///
/// Ordering is recomputed lazily: structural mutations set a dirty flag and
/// the next [`order`](Topology::order) call re-sorts. The sort is a stable
/// Kahn's algorithm with ties broken by node creation order (ids are
/// monotonic), so the same graph state always yields the same order.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: Vec<NodeId>,
    edges: Vec<Edge>,
    order: Vec<NodeId>,
    dirty: bool,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: NodeId) {
        debug_assert!(!self.nodes.contains(&id));
        self.nodes.push(id);
        self.dirty = true;
    }

    pub fn remove_node(&mut self, id: NodeId) {
        self.nodes.retain(|&n| n != id);
        self.edges.retain(|e| e.src != id && e.dst != id);
        self.dirty = true;
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn add_edge(&mut self, id: ConnectionId, src: NodeId, dst: NodeId, feedback: bool) {
        self.edges.push(Edge {
            id,
            src,
            dst,
            feedback,
        });
        self.dirty = true;
    }

    pub fn remove_edge(&mut self, id: ConnectionId) {
        self.edges.retain(|e| e.id != id);
        self.dirty = true;
    }

    /// Would adding a (non-feedback) edge `src -> dst` close a cycle?
    ///
    /// Walks existing non-feedback edges from `dst`; if `src` is reachable
    /// the new edge would complete a loop. Disabled connections count:
    /// enable/disable must never change the acyclicity determination.
    pub fn would_cycle(&self, src: NodeId, dst: NodeId) -> bool {
        if src == dst {
            return true;
        }
        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for e in self.edges.iter().filter(|e| !e.feedback) {
            adjacency.entry(e.src).or_default().push(e.dst);
        }
        let mut stack = vec![dst];
        let mut seen = HashSet::new();
        while let Some(n) = stack.pop() {
            if n == src {
                return true;
            }
            if !seen.insert(n) {
                continue;
            }
            if let Some(next) = adjacency.get(&n) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The evaluation order. Recomputes if dirty.
    pub fn order(&mut self) -> &[NodeId] {
        if self.dirty {
            self.order = self.compute_order();
            self.dirty = false;
        }
        &self.order
    }

    fn compute_order(&self) -> Vec<NodeId> {
        let mut in_degree: HashMap<NodeId, usize> =
            self.nodes.iter().map(|&n| (n, 0)).collect();
        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for e in self.edges.iter().filter(|e| !e.feedback) {
            adjacency.entry(e.src).or_default().push(e.dst);
            if let Some(d) = in_degree.get_mut(&e.dst) {
                *d += 1;
            }
        }

        // Min-heap on id keeps ties in creation order.
        let mut ready: BinaryHeap<std::cmp::Reverse<NodeId>> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&n, _)| std::cmp::Reverse(n))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(std::cmp::Reverse(n)) = ready.pop() {
            order.push(n);
            if let Some(next) = adjacency.get(&n) {
                for &m in next {
                    let d = in_degree.get_mut(&m).expect("edge to unknown node");
                    *d -= 1;
                    if *d == 0 {
                        ready.push(std::cmp::Reverse(m));
                    }
                }
            }
        }

        debug_assert_eq!(order.len(), self.nodes.len(), "cycle reached the sorter");
        order
    }
}
