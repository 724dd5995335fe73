//! Plugin descriptors, as delivered by an external scanner/collection.
//!
//! The core never walks the filesystem looking for plugins; it consumes a
//! ready catalog of descriptors and instantiates from them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a unit is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FormatKind {
    /// In-process: a registered factory or a shared library loaded into the
    /// engine process. Panics are caught per node.
    #[default]
    Native,
    /// Out-of-process: hosted by the bridge server, isolated behind IPC with
    /// a bounded per-block timeout.
    Bridged,
}

/// Audio/event port layout of a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortLayout {
    pub audio_inputs: usize,
    pub audio_outputs: usize,
    pub event_input: bool,
}

impl Default for PortLayout {
    fn default() -> Self {
        Self::stereo_effect()
    }
}

impl PortLayout {
    /// Stereo in, stereo out, no events.
    pub fn stereo_effect() -> Self {
        Self {
            audio_inputs: 2,
            audio_outputs: 2,
            event_input: false,
        }
    }

    /// Stereo instrument: events in, stereo out.
    pub fn instrument() -> Self {
        Self {
            audio_inputs: 0,
            audio_outputs: 2,
            event_input: true,
        }
    }
}

/// One parameter as described by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamInfo {
    pub id: u32,
    pub name: String,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl ParamInfo {
    pub fn normalized(id: u32, name: impl Into<String>, default: f32) -> Self {
        Self {
            id,
            name: name.into(),
            min: 0.0,
            max: 1.0,
            default,
        }
    }
}

/// A unit the catalog knows how to instantiate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Stable identifier, e.g. `"ostinato.gain"` or a vendor reverse-DNS id.
    pub unique_id: String,
    pub name: String,
    pub format_kind: FormatKind,
    /// Shared library to load; `None` for registry-built units.
    pub binary_path: Option<PathBuf>,
    pub port_layout: PortLayout,
    pub category: String,
    pub params: Vec<ParamInfo>,
}

impl PluginDescriptor {
    pub fn new(unique_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            name: name.into(),
            format_kind: FormatKind::Native,
            binary_path: None,
            port_layout: PortLayout::stereo_effect(),
            category: String::new(),
            params: Vec::new(),
        }
    }

    pub fn bridged(mut self) -> Self {
        self.format_kind = FormatKind::Bridged;
        self
    }

    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = Some(path.into());
        self
    }

    pub fn layout(mut self, layout: PortLayout) -> Self {
        self.port_layout = layout;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn param(mut self, param: ParamInfo) -> Self {
        self.params.push(param);
        self
    }
}
