//! Tempo and time-signature map with beats/seconds/samples conversion.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct TempoPoint {
    pub(crate) beat: f64,
    pub(crate) bpm: f64,
}

impl TempoPoint {
    fn new(beat: f64, bpm: f64) -> Self {
        Self { beat, bpm }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Quarter-note beats per bar.
    #[inline]
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 * 4.0 / self.denominator as f64
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

/// Bar/beat/tick position, 1-indexed for bar and beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BBT {
    pub bar: u32,
    pub beat: u32,
    pub ticks: u32,
}

impl BBT {
    pub const TICKS_PER_BEAT: u32 = 960;

    pub fn new(bar: u32, beat: u32, ticks: u32) -> Self {
        Self { bar, beat, ticks }
    }
}

/// Immutable tempo-map view shared with the audio thread via arc-swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoMapSnapshot {
    points: Vec<TempoPoint>,
    time_signature: TimeSignature,
    sample_rate: f64,
}

impl TempoMapSnapshot {
    #[inline]
    pub fn beats_to_seconds(&self, beats: f64) -> f64 {
        if self.points.len() == 1 {
            beats * 60.0 / self.points[0].bpm
        } else {
            self.beats_to_seconds_variable(beats)
        }
    }

    fn beats_to_seconds_variable(&self, target_beats: f64) -> f64 {
        let mut seconds = 0.0;
        let mut prev_beat = 0.0;
        for (i, point) in self.points.iter().enumerate() {
            if point.beat >= target_beats {
                let prev_tempo = if i > 0 { self.points[i - 1].bpm } else { point.bpm };
                return seconds + (target_beats - prev_beat) * 60.0 / prev_tempo;
            }
            if i > 0 {
                seconds += (point.beat - prev_beat) * 60.0 / self.points[i - 1].bpm;
            }
            prev_beat = point.beat;
        }
        let last = self.points.last().map(|p| p.bpm).unwrap_or(120.0);
        seconds + (target_beats - prev_beat) * 60.0 / last
    }

    #[inline]
    pub fn seconds_to_beats(&self, seconds: f64) -> f64 {
        if self.points.len() == 1 {
            seconds * self.points[0].bpm / 60.0
        } else {
            self.seconds_to_beats_variable(seconds)
        }
    }

    fn seconds_to_beats_variable(&self, target_seconds: f64) -> f64 {
        let mut elapsed = 0.0;
        let mut beats = 0.0;
        for i in 0..self.points.len() {
            let tempo = self.points[i].bpm;
            let next_beat = if i + 1 < self.points.len() {
                self.points[i + 1].beat
            } else {
                f64::MAX
            };
            let segment_beats = next_beat - self.points[i].beat;
            let segment_seconds = segment_beats * 60.0 / tempo;
            if elapsed + segment_seconds >= target_seconds {
                return beats + (target_seconds - elapsed) * tempo / 60.0;
            }
            elapsed += segment_seconds;
            beats = next_beat;
        }
        beats
    }

    #[inline]
    pub fn beats_to_samples(&self, beats: f64) -> u64 {
        (self.beats_to_seconds(beats) * self.sample_rate).round() as u64
    }

    #[inline]
    pub fn samples_to_beats(&self, samples: u64) -> f64 {
        self.seconds_to_beats(samples as f64 / self.sample_rate)
    }

    /// Tempo in effect at the given beat position.
    pub fn tempo_at(&self, beats: f64) -> f64 {
        let mut bpm = self.points[0].bpm;
        for point in &self.points {
            if point.beat > beats {
                break;
            }
            bpm = point.bpm;
        }
        bpm
    }

    pub fn beats_to_bbt(&self, beats: f64) -> BBT {
        let beats_per_bar = self.time_signature.beats_per_bar();
        let total_bars = (beats / beats_per_bar).floor();
        let beat_in_bar = beats - total_bars * beats_per_bar;
        let beat_whole = beat_in_bar.floor();
        BBT {
            bar: total_bars as u32 + 1,
            beat: beat_whole as u32 + 1,
            ticks: ((beat_in_bar - beat_whole) * BBT::TICKS_PER_BEAT as f64) as u32,
        }
    }

    pub fn bbt_to_beats(&self, bbt: BBT) -> f64 {
        let beats_per_bar = self.time_signature.beats_per_bar();
        (bbt.bar.saturating_sub(1)) as f64 * beats_per_bar
            + (bbt.beat.saturating_sub(1)) as f64
            + bbt.ticks as f64 / BBT::TICKS_PER_BEAT as f64
    }

    #[inline]
    pub fn tempo(&self) -> f64 {
        self.points[0].bpm
    }

    #[inline]
    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

/// Edit-side tempo map. Publishes immutable snapshots on every change.
#[derive(Debug, Clone)]
pub struct TempoMap {
    points: Vec<TempoPoint>,
    time_signature: TimeSignature,
    sample_rate: f64,
    snapshot: Arc<TempoMapSnapshot>,
}

impl TempoMap {
    pub const MIN_BPM: f64 = 1.0;
    pub const MAX_BPM: f64 = 999.0;

    pub fn new(initial_bpm: f64, sample_rate: f64) -> Self {
        let points = vec![TempoPoint::new(0.0, initial_bpm)];
        let time_signature = TimeSignature::default();
        let snapshot = Arc::new(TempoMapSnapshot {
            points: points.clone(),
            time_signature,
            sample_rate,
        });
        Self {
            points,
            time_signature,
            sample_rate,
            snapshot,
        }
    }

    pub fn snapshot(&self) -> Arc<TempoMapSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn set_tempo(&mut self, bpm: f64) {
        let bpm = bpm.clamp(Self::MIN_BPM, Self::MAX_BPM);
        self.points.clear();
        self.points.push(TempoPoint::new(0.0, bpm));
        self.rebuild();
    }

    pub fn tempo(&self) -> f64 {
        self.points[0].bpm
    }

    pub fn add_tempo_point(&mut self, beat: f64, bpm: f64) {
        let bpm = bpm.clamp(Self::MIN_BPM, Self::MAX_BPM);
        self.points.retain(|p| (p.beat - beat).abs() > 0.001);
        self.points.push(TempoPoint::new(beat, bpm));
        self.points
            .sort_by(|a, b| a.beat.partial_cmp(&b.beat).expect("beat is never NaN"));
        if self.points[0].beat > 0.0 {
            let first_bpm = self.points[0].bpm;
            self.points.insert(0, TempoPoint::new(0.0, first_bpm));
        }
        self.rebuild();
    }

    pub fn remove_tempo_point(&mut self, beat: f64) {
        if beat <= 0.001 {
            return;
        }
        self.points.retain(|p| (p.beat - beat).abs() > 0.001);
        self.rebuild();
    }

    pub fn set_time_signature(&mut self, numerator: u32, denominator: u32) {
        self.time_signature = TimeSignature::new(numerator, denominator);
        self.rebuild();
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.snapshot = Arc::new(TempoMapSnapshot {
            points: self.points.clone(),
            time_signature: self.time_signature,
            sample_rate: self.sample_rate,
        });
    }
}

impl Default for TempoMap {
    fn default() -> Self {
        Self::new(120.0, 44100.0)
    }
}
