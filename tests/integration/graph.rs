//! Routing rules at the engine boundary: validation, ordering, feedback,
//! snapshot round-trips.

use ostinato::prelude::*;
use ostinato::{ConnectOptions, EngineOp, Error, GraphError};

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::*;

#[test]
fn test_cycle_rejected_via_apply() {
    let engine = test_engine();
    let a = engine.add_strip("a").unwrap();
    let b = engine.add_strip("b").unwrap();

    // a sends to b
    let dest = engine
        .with_strip(b, |strip, graph| Ok(strip.audio_inputs(graph)?))
        .unwrap();
    engine
        .with_strip(a, |strip, graph| {
            strip
                .add_send(graph, SendKind::Audio, false, &dest)
                .map_err(Into::into)
        })
        .unwrap();

    // b sending back to a must be rejected and leave the graph unchanged
    let a_inputs = engine
        .with_strip(a, |strip, graph| Ok(strip.audio_inputs(graph)?))
        .unwrap();
    let before = engine.graph(|g| g.connections().count());
    let result = engine.with_strip(b, |strip, graph| {
        strip
            .add_send(graph, SendKind::Audio, false, &a_inputs)
            .map_err(Into::into)
    });
    assert!(matches!(
        result,
        Err(Error::Engine(ostinato::core::EngineError::Graph(
            GraphError::Cycle { .. }
        )))
    ));
    assert_eq!(engine.graph(|g| g.connections().count()), before);
}

#[test]
fn test_feedback_send_accepted() {
    let engine = test_engine();
    let a = engine.add_strip("a").unwrap();
    let b = engine.add_strip("b").unwrap();

    let dest = engine
        .with_strip(b, |strip, graph| Ok(strip.audio_inputs(graph)?))
        .unwrap();
    engine
        .with_strip(a, |strip, graph| {
            strip
                .add_send(graph, SendKind::Audio, false, &dest)
                .map_err(Into::into)
        })
        .unwrap();

    // The reverse path is legal as an explicit feedback edge (one block
    // behind), wired port-to-port.
    let b_fader_out = engine
        .with_strip(b, |strip, graph| Ok(strip.post_fader_outputs(graph)?))
        .unwrap();
    let a_inputs = engine
        .with_strip(a, |strip, graph| Ok(strip.audio_inputs(graph)?))
        .unwrap();
    engine
        .apply(EngineOp::Connect {
            src: b_fader_out[0],
            dst: a_inputs[0],
            options: ConnectOptions::feedback(),
        })
        .unwrap();
}

#[test]
fn test_topological_order_complete_and_ordered() {
    let engine = test_engine();
    for i in 0..4 {
        engine.add_strip(format!("strip {i}")).unwrap();
    }

    engine.graph(|g| {
        let order = g.topological_order();
        let nodes: Vec<NodeId> = g.node_ids().collect();
        assert_eq!(order.len(), nodes.len());
        for id in &nodes {
            assert_eq!(order.iter().filter(|&&n| n == *id).count(), 1);
        }

        // Every enabled non-feedback edge runs source before destination
        let pos =
            |id: NodeId| order.iter().position(|&n| n == id).expect("in order");
        let connections: Vec<_> = g.connections().cloned().collect();
        for conn in connections.iter().filter(|c| !c.feedback) {
            let src = g.port(conn.source).unwrap().node;
            let dst = g.port(conn.dest).unwrap().node;
            assert!(
                pos(src) < pos(dst),
                "{src:?} must evaluate before {dst:?}"
            );
        }
    });
}

#[test]
fn test_order_is_reproducible() {
    let build = || {
        let engine = test_engine();
        for i in 0..3 {
            engine.add_strip(format!("s{i}")).unwrap();
        }
        engine.graph(|g| {
            g.topological_order()
                .iter()
                .map(|n| n.raw())
                .collect::<Vec<_>>()
        })
    };
    assert_eq!(build(), build());
}

#[test]
fn test_remove_node_drops_connections_atomically() {
    let engine = test_engine();
    let strip = engine.add_strip("doomed").unwrap();
    let fader = engine
        .with_strip(strip, |strip, _| Ok(strip.fader_node()))
        .unwrap();

    engine.apply(EngineOp::RemoveNode(fader)).unwrap();
    engine.graph(|g| {
        assert!(g.node(fader).is_none());
        for conn in g.connections() {
            assert_ne!(g.port(conn.source).map(|p| p.node), Some(fader));
            assert_ne!(g.port(conn.dest).map(|p| p.node), Some(fader));
        }
    });
}

#[test]
fn test_snapshot_restore_roundtrip() {
    let engine = test_engine();
    let strip = engine.add_strip("kept").unwrap();
    feed_sine(&engine, strip, 440.0, 0.5);
    engine
        .with_strip(strip, |s, g| s.set_gain_db(g, -6.0).map_err(Into::into))
        .unwrap();

    let nodes_before = engine.graph(|g| g.node_count());
    let conns_before = engine.graph(|g| g.connections().count());
    let state = engine.snapshot();

    // Wreck the session, then restore
    engine.remove_strip(strip).unwrap();
    engine.restore(&state).unwrap();

    assert_eq!(engine.graph(|g| g.node_count()), nodes_before);
    assert_eq!(engine.graph(|g| g.connections().count()), conns_before);
    assert_eq!(engine.strip_count(), 1);

    // The restored graph still renders (master is wired)
    let (left, _) = render_master(&engine, 4_800);
    assert!(peak(&left) > 0.01);
}

#[test]
fn test_snapshot_restore_preserves_parameters() {
    let engine = test_engine();
    let strip = engine.add_strip("levels").unwrap();
    engine
        .with_strip(strip, |s, g| {
            s.set_gain(g, 0.25)?;
            s.set_pan(g, -0.5)?;
            Ok(())
        })
        .unwrap();

    let state = engine.snapshot();
    engine.restore(&state).unwrap();

    let (gain, pan) = engine
        .with_strip(0, |s, g| {
            let fader = s.fader_node();
            Ok((
                g.parameter(fader, ostinato::core::nodes::params::fader::PARAM_GAIN),
                g.parameter(fader, ostinato::core::nodes::params::fader::PARAM_PAN),
            ))
        })
        .unwrap();
    assert_eq!(gain, Some(0.25));
    assert_eq!(pan, Some(-0.5));
}

#[test]
fn test_restore_rejected_while_running() {
    let engine = test_engine();
    let state = engine.snapshot();
    engine.start().unwrap();
    assert!(matches!(
        engine.restore(&state),
        Err(Error::InvalidState { .. })
    ));
    engine.stop().unwrap();
    engine.restore(&state).unwrap();
}
