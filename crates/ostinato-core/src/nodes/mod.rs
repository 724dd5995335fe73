//! Built-in processing nodes.

mod fader;
mod modulator;
mod send;
mod source;
mod track;

pub use fader::{Fader, FaderConfig, FaderKind, SoloState};
pub use modulator::{MacroConfig, MacroProcessor, MAX_CV_OUTPUTS};
pub use send::{ChannelSend, SendConfig, SendKind};
pub use source::{ControlSource, NullSource, SineConfig, SineSource};
pub use track::TrackProcessor;

/// Parameter ids of the built-in nodes, namespaced per node type.
pub mod params {
    pub mod fader {
        pub use super::super::fader::{
            PARAM_GAIN, PARAM_LISTEN, PARAM_MONO, PARAM_MUTE, PARAM_PAN, PARAM_PHASE, PARAM_SOLO,
        };
    }
    pub mod send {
        pub use super::super::send::PARAM_AMOUNT;
    }
    pub mod modulator {
        pub use super::super::modulator::{PARAM_DEPTH_BASE, PARAM_MACRO};
    }
    pub mod track {
        pub use super::super::track::{PARAM_INPUT_GAIN, PARAM_MONO};
    }
    pub mod source {
        pub use super::super::source::{PARAM_AMP, PARAM_FREQ, PARAM_VALUE};
    }
}
