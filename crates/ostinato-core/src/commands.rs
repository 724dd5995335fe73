//! Cross-thread mutation: structural command batches and parameter events.
//!
//! Structural edits are validated on the edit side, then published as
//! immutable command batches over a bounded SPSC queue. The realtime thread
//! drains whole batches at the block boundary, so a multi-command edit (an
//! insert relink, a strip teardown) is never observed half-applied.

use crate::error::EngineError;
use crate::graph::{Connection, ConnectionId, NodeId, PortKind};
use crate::node::ProcessingNode;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

pub const DEFAULT_COMMAND_CAPACITY: usize = 256;
pub const DEFAULT_PARAM_CAPACITY: usize = 4096;

/// Resolved location of a port on the realtime side.
#[derive(Debug, Clone, Copy)]
pub struct PortLocation {
    pub node: NodeId,
    pub index: usize,
    pub kind: PortKind,
}

/// One pre-validated structural mutation.
pub enum EngineCommand {
    AddNode {
        id: NodeId,
        node: Box<dyn ProcessingNode>,
    },
    RemoveNode {
        id: NodeId,
    },
    Connect {
        connection: Connection,
        src: PortLocation,
        dst: PortLocation,
    },
    Disconnect {
        id: ConnectionId,
    },
    SetConnectionEnabled {
        id: ConnectionId,
        enabled: bool,
    },
    SetConnectionGain {
        id: ConnectionId,
        multiplier: f32,
    },
    SetMaster {
        id: Option<NodeId>,
    },
}

impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineCommand::AddNode { id, .. } => f.debug_struct("AddNode").field("id", id).finish(),
            EngineCommand::RemoveNode { id } => {
                f.debug_struct("RemoveNode").field("id", id).finish()
            }
            EngineCommand::Connect { connection, .. } => f
                .debug_struct("Connect")
                .field("id", &connection.id)
                .finish(),
            EngineCommand::Disconnect { id } => {
                f.debug_struct("Disconnect").field("id", id).finish()
            }
            EngineCommand::SetConnectionEnabled { id, enabled } => f
                .debug_struct("SetConnectionEnabled")
                .field("id", id)
                .field("enabled", enabled)
                .finish(),
            EngineCommand::SetConnectionGain { id, multiplier } => f
                .debug_struct("SetConnectionGain")
                .field("id", id)
                .field("multiplier", multiplier)
                .finish(),
            EngineCommand::SetMaster { id } => {
                f.debug_struct("SetMaster").field("id", id).finish()
            }
        }
    }
}

/// A group of commands applied at a single block boundary.
#[derive(Debug, Default)]
pub struct CommandBatch {
    pub commands: Vec<EngineCommand>,
}

impl CommandBatch {
    pub fn single(command: EngineCommand) -> Self {
        Self {
            commands: vec![command],
        }
    }
}

/// Edit-side end of the command queue.
pub struct CommandSender {
    inner: HeapProd<CommandBatch>,
}

impl CommandSender {
    pub fn send(&mut self, batch: CommandBatch) -> Result<(), EngineError> {
        self.inner
            .try_push(batch)
            .map_err(|_| EngineError::CommandQueueFull)
    }
}

/// Realtime-side end of the command queue.
pub struct CommandReceiver {
    inner: HeapCons<CommandBatch>,
}

impl CommandReceiver {
    #[inline]
    pub fn try_recv(&mut self) -> Option<CommandBatch> {
        self.inner.try_pop()
    }
}

pub fn command_channel(capacity: usize) -> (CommandSender, CommandReceiver) {
    let (prod, cons) = HeapRb::<CommandBatch>::new(capacity).split();
    (CommandSender { inner: prod }, CommandReceiver { inner: cons })
}

/// A timestamped parameter/automation change.
///
/// `time` is an absolute sample position; events landing inside a block are
/// delivered to their node at `time - block_start`. `time == 0` means "as
/// soon as possible".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamEvent {
    pub node: NodeId,
    pub param: u32,
    pub value: f32,
    pub time: u64,
}

pub struct ParamSender {
    inner: HeapProd<ParamEvent>,
}

impl ParamSender {
    pub fn send(&mut self, event: ParamEvent) -> Result<(), EngineError> {
        self.inner
            .try_push(event)
            .map_err(|_| EngineError::CommandQueueFull)
    }
}

pub struct ParamReceiver {
    inner: HeapCons<ParamEvent>,
}

impl ParamReceiver {
    #[inline]
    pub fn try_recv(&mut self) -> Option<ParamEvent> {
        self.inner.try_pop()
    }
}

pub fn param_channel(capacity: usize) -> (ParamSender, ParamReceiver) {
    let (prod, cons) = HeapRb::<ParamEvent>::new(capacity).split();
    (ParamSender { inner: prod }, ParamReceiver { inner: cons })
}

/// Parameter events selected for the current block, grouped per node.
///
/// Capacity is reserved up front; the realtime pass only sorts and slices.
#[derive(Debug, Default)]
pub struct ParamEventBlock {
    events: Vec<ParamEvent>,
}

impl ParamEventBlock {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn push(&mut self, event: ParamEvent) {
        if self.events.len() < self.events.capacity() {
            self.events.push(event);
        }
    }

    /// Sort by (node, time) so per-node runs are contiguous.
    pub fn finish(&mut self) {
        self.events.sort_unstable_by_key(|e| (e.node, e.time));
    }

    pub fn for_node(&self, node: NodeId) -> &[ParamEvent] {
        let start = self.events.partition_point(|e| e.node < node);
        let end = self.events.partition_point(|e| e.node <= node);
        &self.events[start..end]
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
