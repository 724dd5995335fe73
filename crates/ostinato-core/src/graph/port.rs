//! Port declarations and edit-side port records.

use super::{NodeId, PortId};
use serde::{Deserialize, Serialize};

/// Signal kind carried by a port. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    /// Sample buffer, one channel per port.
    Audio,
    /// MIDI-shaped event stream.
    Event,
    /// Block-rate control/CV value.
    Control,
}

impl PortKind {
    pub fn name(&self) -> &'static str {
        match self {
            PortKind::Audio => "audio",
            PortKind::Event => "event",
            PortKind::Control => "control",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// A port as declared by a node.
#[derive(Debug, Clone, Copy)]
pub struct PortDecl {
    pub name: &'static str,
    pub kind: PortKind,
}

impl PortDecl {
    pub const fn audio(name: &'static str) -> Self {
        Self {
            name,
            kind: PortKind::Audio,
        }
    }

    pub const fn event(name: &'static str) -> Self {
        Self {
            name,
            kind: PortKind::Event,
        }
    }

    pub const fn control(name: &'static str) -> Self {
        Self {
            name,
            kind: PortKind::Control,
        }
    }
}

/// Full port layout of a node, inputs then outputs, in index order.
#[derive(Debug, Clone, Default)]
pub struct NodePorts {
    pub inputs: Vec<PortDecl>,
    pub outputs: Vec<PortDecl>,
}

impl NodePorts {
    pub fn new(inputs: Vec<PortDecl>, outputs: Vec<PortDecl>) -> Self {
        Self { inputs, outputs }
    }

    /// Stereo audio in, stereo audio out.
    pub fn stereo_through() -> Self {
        Self {
            inputs: vec![PortDecl::audio("in_l"), PortDecl::audio("in_r")],
            outputs: vec![PortDecl::audio("out_l"), PortDecl::audio("out_r")],
        }
    }

    /// Stereo audio out only (generators).
    pub fn stereo_source() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: vec![PortDecl::audio("out_l"), PortDecl::audio("out_r")],
        }
    }
}

/// Edit-side record of one live port.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub id: PortId,
    pub node: NodeId,
    pub direction: PortDirection,
    /// Index within the node's input or output list.
    pub index: usize,
    pub kind: PortKind,
    pub name: String,
}
