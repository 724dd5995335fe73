//! DSP load and xrun accounting for the realtime pass.

use crate::lockfree::AtomicFloat;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;

/// Snapshot of scheduler load metrics.
#[derive(Debug, Clone, Default)]
pub struct DspLoadMetrics {
    /// Load of the most recent block, 0..1 (1.0 = full block budget).
    pub current: f32,
    pub peak: f32,
    pub average: f32,
    /// Blocks whose processing time exceeded the block duration.
    pub xruns: u64,
    pub blocks: u64,
}

/// Lock-free DSP load meter.
///
/// The realtime pass records once per block; any thread may read. An xrun is
/// counted and reported, never retried: the block is delivered late per
/// backend policy.
#[derive(Debug)]
pub struct DspLoadMeter {
    current: AtomicFloat,
    peak: AtomicFloat,
    average: AtomicFloat,
    xruns: AtomicU64,
    blocks: AtomicU64,
    sample_rate: f64,
}

impl DspLoadMeter {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            current: AtomicFloat::new(0.0),
            peak: AtomicFloat::new(0.0),
            average: AtomicFloat::new(0.0),
            xruns: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
            sample_rate,
        }
    }

    /// Record one block: `n_samples` processed in `elapsed`.
    pub fn record(&self, n_samples: usize, elapsed: Duration) {
        let budget = n_samples as f64 / self.sample_rate;
        let load = (elapsed.as_secs_f64() / budget) as f32;

        self.current.set(load);
        if load > self.peak.get() {
            self.peak.set(load);
        }

        // Exponential moving average over roughly the last hundred blocks
        let count = self.blocks.fetch_add(1, Ordering::Relaxed);
        let alpha = 1.0 / (count.min(100) + 1) as f32;
        let avg = self.average.get();
        self.average.set(avg * (1.0 - alpha) + load * alpha);

        if load > 1.0 {
            self.xruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn metrics(&self) -> DspLoadMetrics {
        DspLoadMetrics {
            current: self.current.get(),
            peak: self.peak.get(),
            average: self.average.get(),
            xruns: self.xruns.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
        }
    }

    pub fn xruns(&self) -> u64 {
        self.xruns.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.current.set(0.0);
        self.peak.set(0.0);
        self.average.set(0.0);
        self.xruns.store(0, Ordering::Relaxed);
        self.blocks.store(0, Ordering::Relaxed);
    }
}
