//! The polymorphic processing-node contract.

use crate::graph::{NodePorts, ProcessBlock};
use crate::parameter::ParameterSpec;

/// A unit in the routing graph.
///
/// Nodes are constructed off the audio thread, moved into the realtime
/// executor through the command queue, and from then on only touched between
/// or during block evaluation. `process` must be realtime-safe: no heap
/// allocation, no blocking locks, no work unbounded by the block length.
pub trait ProcessingNode: Send {
    fn name(&self) -> &str;

    /// Port layout, fixed for the node's lifetime.
    fn ports(&self) -> NodePorts;

    /// Parameter descriptors; these are the node's automation targets.
    fn parameters(&self) -> &[ParameterSpec] {
        &[]
    }

    /// Called once before processing starts and again whenever the engine is
    /// reconfigured. May allocate.
    fn prepare(&mut self, _sample_rate: f64, _max_block_size: usize) {}

    /// Produce one block. Inputs have already been mixed; outputs are zeroed.
    ///
    /// Parameter events for this node arrive in
    /// [`ProcessBlock::param_events`], sorted by frame offset, and must be
    /// applied at their offsets (ramped or stepped per the parameter's
    /// smoothing policy).
    fn process(&mut self, block: &mut ProcessBlock<'_>);

    /// Called when the node leaves the graph. May release resources.
    fn release(&mut self) {}
}
