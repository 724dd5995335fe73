//! Transport: tempo map, sample clock, play state.

mod clock;
mod tempo_map;

pub use clock::{transport_pair, Transport, TransportHandle, TransportView};
pub use tempo_map::{TempoMap, TempoMapSnapshot, TimeSignature, BBT};
