//! Sample-accurate transport clock and its cross-thread handles.

use super::tempo_map::{TempoMap, TempoMapSnapshot, TimeSignature};
use crate::error::EngineError;
use crate::lockfree::{AtomicFlag, AtomicSamples};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Lock-free transport state shared between the edit side and the clock.
#[derive(Debug)]
pub(crate) struct TransportShared {
    pub(crate) playing: AtomicFlag,
    pub(crate) recording: AtomicFlag,
    pub(crate) playhead: AtomicSamples,
    pub(crate) seek_target: AtomicSamples,
    pub(crate) seek_pending: AtomicFlag,
    pub(crate) loop_enabled: AtomicFlag,
    pub(crate) loop_start: AtomicSamples,
    pub(crate) loop_end: AtomicSamples,
    pub(crate) tempo_map: ArcSwap<TempoMapSnapshot>,
}

impl TransportShared {
    fn new(sample_rate: f64) -> Self {
        Self {
            playing: AtomicFlag::new(false),
            recording: AtomicFlag::new(false),
            playhead: AtomicSamples::new(0),
            seek_target: AtomicSamples::new(0),
            seek_pending: AtomicFlag::new(false),
            loop_enabled: AtomicFlag::new(false),
            loop_start: AtomicSamples::new(0),
            loop_end: AtomicSamples::new(0),
            tempo_map: ArcSwap::new(TempoMap::new(120.0, sample_rate).snapshot()),
        }
    }
}

/// Read-only view of transport state for one block.
///
/// Built at the top of every block and handed to each node through
/// [`ProcessBlock`](crate::graph::ProcessBlock); nodes never mutate transport.
#[derive(Debug, Clone)]
pub struct TransportView {
    pub block_start: u64,
    pub n_samples: usize,
    pub playing: bool,
    pub recording: bool,
    /// Tempo in effect at the start of the block.
    pub tempo: f64,
    pub time_signature: TimeSignature,
    /// Musical position of `block_start` in quarter-note beats.
    pub beats_at_start: f64,
    pub sample_rate: f64,
    pub loop_range: Option<(u64, u64)>,
}

impl TransportView {
    /// A stopped, empty view, useful for tests and warm-up blocks.
    pub fn stopped(sample_rate: f64, n_samples: usize) -> Self {
        Self {
            block_start: 0,
            n_samples,
            playing: false,
            recording: false,
            tempo: 120.0,
            time_signature: TimeSignature::default(),
            beats_at_start: 0.0,
            sample_rate,
            loop_range: None,
        }
    }
}

/// Realtime side of the transport: advances the playhead block by block.
pub struct Transport {
    shared: Arc<TransportShared>,
    sample_rate: f64,
}

impl Transport {
    pub(crate) fn with_shared(shared: Arc<TransportShared>, sample_rate: f64) -> Self {
        Self {
            shared,
            sample_rate,
        }
    }

    /// Apply pending seeks and build the block view.
    pub fn begin_block(&mut self, n_samples: usize) -> TransportView {
        if self.shared.seek_pending.get() {
            self.shared.playhead.set(self.shared.seek_target.get());
            self.shared.seek_pending.set(false);
        }
        let block_start = self.shared.playhead.get();
        let map = self.shared.tempo_map.load();
        let beats_at_start = map.samples_to_beats(block_start);
        let loop_range = if self.shared.loop_enabled.get() {
            let start = self.shared.loop_start.get();
            let end = self.shared.loop_end.get();
            (end > start).then_some((start, end))
        } else {
            None
        };
        TransportView {
            block_start,
            n_samples,
            playing: self.shared.playing.get(),
            recording: self.shared.recording.get(),
            tempo: map.tempo_at(beats_at_start),
            time_signature: map.time_signature(),
            beats_at_start,
            sample_rate: self.sample_rate,
            loop_range,
        }
    }

    /// Advance by one block, wrapping inside the loop range when enabled.
    pub fn end_block(&mut self, view: &TransportView) {
        if !view.playing {
            return;
        }
        let mut pos = view.block_start + view.n_samples as u64;
        if let Some((start, end)) = view.loop_range {
            if pos >= end {
                let len = end - start;
                pos = start + (pos - end) % len;
            }
        }
        self.shared.playhead.set(pos);
    }

    pub fn playhead(&self) -> u64 {
        self.shared.playhead.get()
    }

    /// Direct transport control used by the offline exporter, which owns the
    /// scheduler exclusively while the engine is in the exporting state.
    pub fn force_locate(&mut self, sample: u64) {
        self.shared.playhead.set(sample);
        self.shared.seek_pending.set(false);
    }

    /// A seek requested by the edit side but not yet applied.
    pub fn pending_seek(&self) -> Option<u64> {
        self.shared
            .seek_pending
            .get()
            .then(|| self.shared.seek_target.get())
    }

    /// Re-arm a pending seek (exporters restore the one they displaced).
    pub fn set_pending_seek(&mut self, sample: u64) {
        self.shared.seek_target.set(sample);
        self.shared.seek_pending.set(true);
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.shared.playing.set(playing);
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.get()
    }
}

/// Edit-side transport control.
///
/// Cheap to clone; all methods are safe from any non-realtime thread.
#[derive(Clone)]
pub struct TransportHandle {
    shared: Arc<TransportShared>,
    tempo: Arc<Mutex<TempoMap>>,
    sample_rate: f64,
}

impl TransportHandle {
    pub(crate) fn new(shared: Arc<TransportShared>, sample_rate: f64) -> Self {
        Self {
            shared,
            tempo: Arc::new(Mutex::new(TempoMap::new(120.0, sample_rate))),
            sample_rate,
        }
    }

    pub fn play(&self) {
        self.shared.playing.set(true);
    }

    pub fn stop(&self) {
        self.shared.playing.set(false);
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.get()
    }

    pub fn set_recording(&self, recording: bool) {
        self.shared.recording.set(recording);
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recording.get()
    }

    /// Seek to an absolute sample position; applied at the next block.
    pub fn seek_samples(&self, sample: u64) {
        self.shared.seek_target.set(sample);
        self.shared.seek_pending.set(true);
    }

    pub fn seek_beats(&self, beats: f64) {
        let sample = self.tempo.lock().snapshot().beats_to_samples(beats.max(0.0));
        self.seek_samples(sample);
    }

    pub fn position_samples(&self) -> u64 {
        self.shared.playhead.get()
    }

    pub fn position_beats(&self) -> f64 {
        self.shared
            .tempo_map
            .load()
            .samples_to_beats(self.shared.playhead.get())
    }

    pub fn set_tempo(&self, bpm: f64) -> Result<(), EngineError> {
        if !(TempoMap::MIN_BPM..=TempoMap::MAX_BPM).contains(&bpm) {
            return Err(EngineError::InvalidTempo(bpm));
        }
        let mut map = self.tempo.lock();
        map.set_tempo(bpm);
        self.shared.tempo_map.store(map.snapshot());
        Ok(())
    }

    pub fn tempo(&self) -> f64 {
        self.tempo.lock().tempo()
    }

    pub fn add_tempo_point(&self, beat: f64, bpm: f64) -> Result<(), EngineError> {
        if !(TempoMap::MIN_BPM..=TempoMap::MAX_BPM).contains(&bpm) {
            return Err(EngineError::InvalidTempo(bpm));
        }
        let mut map = self.tempo.lock();
        map.add_tempo_point(beat, bpm);
        self.shared.tempo_map.store(map.snapshot());
        Ok(())
    }

    pub fn set_time_signature(&self, numerator: u32, denominator: u32) -> Result<(), EngineError> {
        if numerator == 0 || denominator == 0 || !denominator.is_power_of_two() {
            return Err(EngineError::InvalidTimeSignature {
                numerator,
                denominator,
            });
        }
        let mut map = self.tempo.lock();
        map.set_time_signature(numerator, denominator);
        self.shared.tempo_map.store(map.snapshot());
        Ok(())
    }

    pub fn set_loop(&self, start_sample: u64, end_sample: u64) -> Result<(), EngineError> {
        if end_sample <= start_sample {
            return Err(EngineError::InvalidLoopRange {
                start: start_sample,
                end: end_sample,
            });
        }
        self.shared.loop_start.set(start_sample);
        self.shared.loop_end.set(end_sample);
        self.shared.loop_enabled.set(true);
        Ok(())
    }

    pub fn clear_loop(&self) {
        self.shared.loop_enabled.set(false);
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn tempo_snapshot(&self) -> Arc<TempoMapSnapshot> {
        self.shared.tempo_map.load_full()
    }
}

/// Create a linked transport pair: the realtime clock and the edit handle.
pub fn transport_pair(sample_rate: f64) -> (Transport, TransportHandle) {
    let shared = Arc::new(TransportShared::new(sample_rate));
    (
        Transport::with_shared(Arc::clone(&shared), sample_rate),
        TransportHandle::new(shared, sample_rate),
    )
}
