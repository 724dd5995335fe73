//! Test helpers and fixtures.
//!
//! All engines here run headless (null backend, no device I/O) so the suite
//! works on CI. Signal assertions go through the offline export path, which
//! renders deterministically regardless of machine load.

pub mod tolerances;

#[allow(unused_imports)]
pub use tolerances::*;

use ostinato::prelude::*;
use std::sync::atomic::AtomicBool;

pub const TEST_SAMPLE_RATE: u32 = 48_000;
pub const TEST_BLOCK_SIZE: u32 = 256;

/// A headless engine with the standard test configuration.
pub fn test_engine() -> OstinatoEngine {
    OstinatoEngine::builder()
        .sample_rate(TEST_SAMPLE_RATE)
        .block_size(TEST_BLOCK_SIZE)
        .headless()
        .build()
        .expect("failed to build test engine")
}

/// Render `n_samples` of the master bus to planar f32, via the exporter.
pub fn render_master(engine: &OstinatoEngine, n_samples: u64) -> (Vec<f32>, Vec<f32>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("render.wav");
    let options = ostinato::ExportOptions {
        bit_depth: ostinato::export::BitDepth::Float32,
        dither: ostinato::export::DitherType::None,
        ..Default::default()
    };
    engine
        .export(
            ExportRange::new(0, n_samples),
            &options,
            &path,
            &AtomicBool::new(false),
        )
        .expect("render failed");

    let mut reader = hound::WavReader::open(&path).expect("open render");
    let mut left = Vec::new();
    let mut right = Vec::new();
    for (i, sample) in reader.samples::<f32>().enumerate() {
        let sample = sample.expect("sample");
        if i % 2 == 0 {
            left.push(sample);
        } else {
            right.push(sample);
        }
    }
    (left, right)
}

/// Peak absolute value of a buffer.
pub fn peak(buffer: &[f32]) -> f32 {
    buffer.iter().fold(0.0f32, |m, &s| m.max(s.abs()))
}

/// Peak in dBFS.
pub fn peak_db(buffer: &[f32]) -> f32 {
    ostinato::amp_to_db(peak(buffer))
}

/// Wire a sine source into a strip's inputs and return the source node.
pub fn feed_sine(
    engine: &OstinatoEngine,
    strip: StripId,
    frequency: f32,
    amplitude: f32,
) -> NodeId {
    engine
        .with_strip(strip, |strip, graph| {
            let config = ostinato::core::encode_config(&ostinato::core::nodes::SineConfig {
                frequency,
                amplitude,
            });
            let sine = graph.add_node_with_kind(
                Box::new(SineSource::new(frequency, amplitude)),
                "core.sine",
                config,
            )?;
            let inputs = strip.audio_inputs(graph)?;
            for (ch, dst) in inputs.into_iter().enumerate() {
                let src = graph.audio_out(sine, ch)?;
                graph.connect(src, dst)?;
            }
            Ok(sine)
        })
        .expect("failed to wire sine source")
}
