//! IPC protocol between the host and the bridge server process.

use crate::descriptor::{ParamInfo, PluginDescriptor};
use ostinato_core::Event;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

const EVENT_STACK_CAPACITY: usize = 64;
const PARAM_STACK_CAPACITY: usize = 16;

pub type WireEventVec = SmallVec<[Event; EVENT_STACK_CAPACITY]>;
pub type WireParamVec = SmallVec<[ParamChange; PARAM_STACK_CAPACITY]>;

/// One sample-accurate parameter change inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamChange {
    pub param: u32,
    pub value: f32,
    /// Frame offset inside the block.
    pub offset: u32,
}

/// Transport state forwarded to hosted units each block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WireTransport {
    pub playing: bool,
    pub recording: bool,
    pub tempo: f64,
    pub position_samples: u64,
    pub position_beats: f64,
    pub time_sig_numerator: u32,
    pub time_sig_denominator: u32,
}

impl Default for WireTransport {
    fn default() -> Self {
        Self {
            playing: false,
            recording: false,
            tempo: 120.0,
            position_samples: 0,
            position_beats: 0.0,
            time_sig_numerator: 4,
            time_sig_denominator: 4,
        }
    }
}

/// Host to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HostMessage {
    Load {
        descriptor: PluginDescriptor,
        sample_rate: f64,
        block_size: usize,
    },
    Process {
        n_samples: usize,
        /// Interleaved stereo input frames (empty for instruments).
        input: Vec<f32>,
        events: WireEventVec,
        params: WireParamVec,
        transport: WireTransport,
    },
    SetParameter {
        param: u32,
        value: f32,
    },
    SaveState,
    RestoreState {
        data: Vec<u8>,
    },
    Reset,
    Shutdown,
}

/// Server to host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    Ready,
    Loaded {
        params: Vec<ParamInfo>,
        latency_samples: usize,
    },
    Processed {
        /// Interleaved stereo output frames.
        output: Vec<f32>,
    },
    State {
        data: Vec<u8>,
    },
    Ok,
    Error {
        message: String,
    },
}
