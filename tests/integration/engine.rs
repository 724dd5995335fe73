//! Engine lifecycle and backend negotiation.

use ostinato::prelude::*;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::*;

#[test]
fn test_lifecycle_transitions() {
    let engine = test_engine();
    assert_eq!(engine.state(), EngineState::Ready);

    engine.start().unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    assert!(engine.is_running());

    // start() while running is a no-op
    engine.start().unwrap();
    assert_eq!(engine.state(), EngineState::Running);

    engine.stop().unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);

    engine.start().unwrap();
    engine.stop().unwrap();

    engine.shutdown();
    assert_eq!(engine.state(), EngineState::Released);
    // shutdown is idempotent
    engine.shutdown();
    assert_eq!(engine.state(), EngineState::Released);

    // released engines reject start
    assert!(engine.start().is_err());
}

#[test]
fn test_headless_backend_selected() {
    let engine = test_engine();
    assert_eq!(engine.backend_name(), "null");
    assert!(engine.backend_warning().is_none());
}

#[test]
fn test_unknown_backend_falls_back_with_warning() {
    let engine = OstinatoEngine::builder()
        .sample_rate(TEST_SAMPLE_RATE)
        .block_size(TEST_BLOCK_SIZE)
        .backend("jack-of-all-trades")
        .build()
        .unwrap();

    // Engine came up anyway, on the null backend, with a surfaced warning.
    assert_eq!(engine.backend_name(), "null");
    assert!(engine.backend_warning().is_some());
    engine.start().unwrap();
    engine.stop().unwrap();
}

#[test]
fn test_unsupported_rate_falls_back_with_warning() {
    let engine = OstinatoEngine::builder()
        .sample_rate(12_345)
        .block_size(TEST_BLOCK_SIZE)
        .build()
        .unwrap();
    assert!(engine.backend_warning().is_some());
    assert_eq!(engine.backend_name(), "null");
}

#[test]
fn test_null_backend_processes_blocks() {
    let engine = test_engine();
    let strip = engine.add_strip("tone").unwrap();
    feed_sine(&engine, strip, 440.0, 0.5);

    engine.transport().play();
    engine.start().unwrap();
    std::thread::sleep(std::time::Duration::from_millis(50));
    engine.stop().unwrap();

    let metrics = engine.metrics();
    assert!(metrics.blocks > 2, "only {} blocks ran", metrics.blocks);
    // Playhead advanced while running
    assert!(engine.transport().position_samples() > 0);
}

#[test]
fn test_transport_controls() {
    let engine = test_engine();
    let transport = engine.transport();

    assert!(!transport.is_playing());
    transport.play();
    assert!(transport.is_playing());
    transport.stop();
    assert!(!transport.is_playing());

    transport.set_tempo(140.0).unwrap();
    assert!((transport.tempo() - 140.0).abs() < 1e-9);
    assert!(transport.set_tempo(0.0).is_err());

    transport.set_loop(0, 48_000).unwrap();
    assert!(transport.set_loop(10, 10).is_err());
    transport.clear_loop();

    transport.seek_beats(4.0);
    transport.set_recording(true);
    assert!(transport.is_recording());
}

#[test]
fn test_offline_render_is_exempt_from_xrun_accounting() {
    let engine = test_engine();
    let strip = engine.add_strip("load").unwrap();
    feed_sine(&engine, strip, 1000.0, 0.5);

    // Offline rendering drives the same graph but has no deadline: the
    // live meter must record nothing for it.
    render_master(&engine, 48_000);
    let metrics = engine.metrics();
    assert_eq!(metrics.blocks, 0);
    assert_eq!(metrics.xruns, 0);
}
