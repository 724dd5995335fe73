//! Channel-strip signal-flow scenarios.

use ostinato::prelude::*;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::*;

/// A 0 dBFS sine through a 2-insert strip (unity-gain plugins) with the
/// fader at -6 dB lands at ~-6 dBFS on the master.
#[test]
fn test_two_insert_strip_minus_six_db() {
    let engine = test_engine();
    let strip = engine.add_strip("lead").unwrap();
    feed_sine(&engine, strip, 1000.0, 1.0);

    let gain = ostinato_plugin_gain_descriptor();
    engine.insert_plugin(strip, 0, &gain).unwrap();
    engine.insert_plugin(strip, 1, &gain).unwrap();

    engine
        .with_strip(strip, |s, g| {
            s.set_gain_db(g, -6.0)?;
            Ok(())
        })
        .unwrap();
    // Master fader defaults to unity and must not color the result.

    let (left, _right) = render_master(&engine, 48_000);
    assert!(
        (peak_db(&left) - (-6.0)).abs() < LEVEL_DB_EPSILON,
        "expected -6.00 dBFS, got {:.2} dBFS",
        peak_db(&left)
    );
}

/// Pre-fader send keeps feeding its destination even when the source
/// strip's direct output is muted.
#[test]
fn test_pre_fader_send_survives_mute() {
    let engine = test_engine();
    let a = engine.add_strip("a").unwrap();
    let b = engine.add_strip("b").unwrap();
    feed_sine(&engine, a, 1000.0, 0.8);

    // Route only b to the master for a clean measurement
    engine
        .with_strip(a, |strip, graph| {
            strip.set_mute(graph, true)?;
            Ok(())
        })
        .unwrap();

    let dest = engine
        .with_strip(b, |strip, graph| Ok(strip.audio_inputs(graph)?))
        .unwrap();
    engine
        .with_strip(a, |strip, graph| {
            let send = strip.add_send(graph, SendKind::Audio, true, &dest)?;
            strip.set_send_amount(graph, send, 0.5)?;
            Ok(())
        })
        .unwrap();

    let (left, _right) = render_master(&engine, 48_000);

    // a's direct out is muted, but b still received the pre-fader signal at
    // half amplitude: 0.8 * 0.5, with every fader stage at unity.
    let expected = 0.8 * 0.5;
    let measured = peak(&left);
    assert!(
        (measured - expected).abs() < 0.02,
        "expected ~{expected:.3}, got {measured:.3}"
    );
}

/// Disabling then re-enabling a send reproduces the prior routing without
/// recreating connections.
#[test]
fn test_send_disable_reenable_reproduces_routing() {
    let engine = test_engine();
    let a = engine.add_strip("a").unwrap();
    let b = engine.add_strip("b").unwrap();
    feed_sine(&engine, a, 500.0, 0.5);

    let dest = engine
        .with_strip(b, |strip, graph| Ok(strip.audio_inputs(graph)?))
        .unwrap();
    engine
        .with_strip(a, |strip, graph| {
            strip.add_send(graph, SendKind::Audio, true, &dest)?;
            Ok(())
        })
        .unwrap();

    let conns_with_send = engine.graph(|g| g.connections().count());
    let (reference, _) = render_master(&engine, 24_000);

    engine
        .with_strip(a, |strip, graph| {
            strip.enable_send(graph, 0, false).map_err(Into::into)
        })
        .unwrap();
    // Disabled, not removed: the data model keeps every connection
    assert_eq!(engine.graph(|g| g.connections().count()), conns_with_send);

    engine
        .with_strip(a, |strip, graph| {
            strip.enable_send(graph, 0, true).map_err(Into::into)
        })
        .unwrap();
    let (restored, _) = render_master(&engine, 24_000);
    assert_eq!(reference, restored);
}

/// Mute wins over solo for output silence.
#[test]
fn test_mute_priority_over_solo() {
    let engine = test_engine();
    let strip = engine.add_strip("soloed-and-muted").unwrap();
    feed_sine(&engine, strip, 440.0, 0.8);

    engine
        .with_strip(strip, |s, g| {
            s.set_solo(g, true)?;
            s.set_mute(g, true)?;
            Ok(())
        })
        .unwrap();

    let (left, right) = render_master(&engine, 24_000);
    assert!(peak(&left) < SILENCE_THRESHOLD, "peak {}", peak(&left));
    assert!(peak(&right) < SILENCE_THRESHOLD);
}

/// Soloing one strip gates the others.
#[test]
fn test_solo_gates_other_strips() {
    let engine = test_engine();
    let kept = engine.add_strip("kept").unwrap();
    let gated = engine.add_strip("gated").unwrap();
    feed_sine(&engine, kept, 400.0, 0.5);
    feed_sine(&engine, gated, 3000.0, 0.5);

    engine
        .with_strip(kept, |s, g| s.set_solo(g, true).map_err(Into::into))
        .unwrap();

    let (left, _) = render_master(&engine, 48_000);
    // Only the soloed strip's 400 Hz content remains; a gated 3 kHz partial
    // would push the peak above the soloed strip's ceiling.
    let expected_max = 0.5 + 0.02;
    assert!(peak(&left) <= expected_max, "peak {}", peak(&left));
    assert!(peak(&left) > 0.3);
}

/// Insert bypass means pass-through, not silence: removing a unity-gain
/// insert changes nothing.
#[test]
fn test_insert_removal_is_transparent_for_unity_chain() {
    let engine = test_engine();
    let strip = engine.add_strip("chain").unwrap();
    feed_sine(&engine, strip, 800.0, 0.6);

    let gain = ostinato_plugin_gain_descriptor();
    let inserted = engine.insert_plugin(strip, 0, &gain).unwrap();
    let (with_insert, _) = render_master(&engine, 24_000);

    engine
        .with_strip(strip, |s, g| s.remove_insert(g, 0).map_err(Into::into))
        .unwrap();
    engine.graph(|g| assert!(g.node(inserted).is_none()));
    let (without_insert, _) = render_master(&engine, 24_000);

    assert_eq!(with_insert, without_insert);
}

/// Moving an insert relinks the chain without ever producing a gap.
#[test]
fn test_move_insert_keeps_chain_closed() {
    let engine = test_engine();
    let strip = engine.add_strip("chain").unwrap();
    feed_sine(&engine, strip, 800.0, 0.6);

    let gain = ostinato_plugin_gain_descriptor();
    engine.insert_plugin(strip, 0, &gain).unwrap();
    engine.insert_plugin(strip, 1, &gain).unwrap();

    engine
        .with_strip(strip, |s, g| s.move_insert(g, 0, 1).map_err(Into::into))
        .unwrap();

    // Unity inserts in either order: signal unchanged
    let (left, _) = render_master(&engine, 24_000);
    assert!((peak(&left) - 0.6).abs() < 0.02);
}

fn ostinato_plugin_gain_descriptor() -> PluginDescriptor {
    ostinato::plugin::builtin_descriptors()
        .into_iter()
        .find(|d| d.unique_id == ostinato::plugin::units::GAIN_ID)
        .expect("gain unit in catalog")
}
