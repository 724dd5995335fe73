//! Offline export: determinism, state machine, metadata, clip warning.

use ostinato::prelude::*;
use std::sync::atomic::AtomicBool;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::*;

fn tone_engine(amplitude: f32) -> OstinatoEngine {
    let engine = test_engine();
    let strip = engine.add_strip("tone").unwrap();
    feed_sine(&engine, strip, 1000.0, amplitude);
    engine
}

#[test]
fn test_export_twice_is_byte_identical() {
    let engine = tone_engine(0.5);
    let dir = tempfile::tempdir().unwrap();
    let options = ExportOptions::default();
    let range = ExportRange::new(0, 48_000);

    let path_a = dir.path().join("a.wav");
    let path_b = dir.path().join("b.wav");
    engine
        .export(range, &options, &path_a, &AtomicBool::new(false))
        .unwrap();
    engine
        .export(range, &options, &path_b, &AtomicBool::new(false))
        .unwrap();

    let bytes_a = std::fs::read(&path_a).unwrap();
    let bytes_b = std::fs::read(&path_b).unwrap();
    assert_eq!(bytes_a, bytes_b);
}

#[test]
fn test_export_requires_stopped() {
    let engine = tone_engine(0.5);
    engine.start().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.wav");
    let result = engine.export(
        ExportRange::new(0, 4_800),
        &ExportOptions::default(),
        &path,
        &AtomicBool::new(false),
    );
    assert!(matches!(result, Err(ostinato::Error::InvalidState { .. })));
    assert!(!path.exists());

    engine.stop().unwrap();
    engine
        .export(
            ExportRange::new(0, 4_800),
            &ExportOptions::default(),
            &path,
            &AtomicBool::new(false),
        )
        .unwrap();
    assert!(path.exists());
    // Engine is stopped again after export
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[test]
fn test_export_does_not_disturb_live_state() {
    let engine = tone_engine(0.5);
    engine.transport().seek_samples(9_999);

    let dir = tempfile::tempdir().unwrap();
    engine
        .export(
            ExportRange::new(0, 24_000),
            &ExportOptions::default(),
            &dir.path().join("side.wav"),
            &AtomicBool::new(false),
        )
        .unwrap();

    // The pending seek target survives; playback state is untouched.
    assert!(!engine.transport().is_playing());
    engine.start().unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    engine.stop().unwrap();
    assert!(engine.transport().position_samples() >= 9_999);
}

#[test]
fn test_clipping_surfaces_as_warning_not_error() {
    // 1.3x full scale is well past 0 dBFS
    let engine = tone_engine(1.0);
    engine
        .with_strip(0, |s, g| s.set_gain(g, 1.3).map_err(Into::into))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let report = engine
        .export(
            ExportRange::new(0, 48_000),
            &ExportOptions {
                bit_depth: ostinato::export::BitDepth::Float32,
                dither: ostinato::export::DitherType::None,
                ..Default::default()
            },
            &dir.path().join("hot.wav"),
            &AtomicBool::new(false),
        )
        .unwrap();

    assert!(report.scan.clipped);
    assert!(report.scan.sample_peak_dbfs > 0.0);
}

#[test]
fn test_metadata_passthrough() {
    let engine = tone_engine(0.4);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tagged.wav");
    let options = ExportOptions {
        metadata: ExportMetadata {
            title: "Nocturne".into(),
            artist: "anon".into(),
            genre: "electroacoustic".into(),
        },
        ..Default::default()
    };

    engine
        .export(
            ExportRange::new(0, 9_600),
            &options,
            &path,
            &AtomicBool::new(false),
        )
        .unwrap();

    let read_back = ostinato::export::format::wav::read_info_chunk(&path).unwrap();
    assert_eq!(read_back, options.metadata);
}

#[test]
fn test_cancelled_export_cleans_up() {
    let engine = tone_engine(0.5);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cancelled.wav");

    let result = engine.export(
        ExportRange::new(0, 480_000),
        &ExportOptions::default(),
        &path,
        &AtomicBool::new(true),
    );
    assert!(matches!(
        result,
        Err(ostinato::Error::Export(
            ostinato::export::ExportError::Cancelled
        ))
    ));
    assert!(!path.exists());
    // The failed export leaves the engine usable
    assert_eq!(engine.state(), EngineState::Stopped);
    engine.start().unwrap();
}

#[test]
fn test_flac_export() {
    let engine = tone_engine(0.5);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.flac");
    let options = ExportOptions {
        format: ostinato::export::AudioFormat::Flac,
        bit_depth: ostinato::export::BitDepth::Int16,
        ..Default::default()
    };

    engine
        .export(
            ExportRange::new(0, 24_000),
            &options,
            &path,
            &AtomicBool::new(false),
        )
        .unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[0..4], b"fLaC");
}

#[test]
fn test_resampled_export_length() {
    let engine = tone_engine(0.5);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("44k.wav");
    let options = ExportOptions {
        sample_rate: Some(44_100),
        bit_depth: ostinato::export::BitDepth::Float32,
        dither: ostinato::export::DitherType::None,
        ..Default::default()
    };

    let report = engine
        .export(
            ExportRange::new(0, 48_000),
            &options,
            &path,
            &AtomicBool::new(false),
        )
        .unwrap();
    assert_eq!(report.output_sample_rate, 44_100);

    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().sample_rate, 44_100);
    let frames = reader.duration();
    assert!((frames as i64 - 44_100).abs() < 200, "{frames} frames");
}
