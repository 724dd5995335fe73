//! Bridged host integration: spawns the real `ostinato-bridge` server
//! process and exercises the crash-isolation contract end to end.

use ostinato_core::commands::{CommandBatch, EngineCommand, ParamEventBlock, PortLocation};
use ostinato_core::graph::GraphExecutor;
use ostinato_core::{Connection, ConnectionId, NodeId, PortId, PortKind, TransportView};
use ostinato_plugin::{
    builtin_descriptors, BridgedHost, BridgedHostConfig, HostError, PluginDescriptor,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const SAMPLE_RATE: f64 = 48_000.0;
const BLOCK: usize = 4096; // large blocks give the IPC pipeline a generous per-block deadline

fn server_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ostinato-bridge"))
}

fn host() -> BridgedHost {
    BridgedHost::new(BridgedHostConfig {
        server_binary: server_binary(),
        ..BridgedHostConfig::default()
    })
}

fn descriptor(unique_id: &str) -> PluginDescriptor {
    builtin_descriptors()
        .into_iter()
        .find(|d| d.unique_id == unique_id)
        .expect("builtin descriptor")
        .bridged()
}

/// Executor with a constant source feeding the bridged node.
fn executor_with(node: Box<dyn ostinato_core::ProcessingNode>) -> (GraphExecutor, NodeId) {
    struct Dc(f32);
    impl ostinato_core::ProcessingNode for Dc {
        fn name(&self) -> &str {
            "dc"
        }
        fn ports(&self) -> ostinato_core::NodePorts {
            ostinato_core::NodePorts::stereo_source()
        }
        fn process(&mut self, block: &mut ostinato_core::ProcessBlock<'_>) {
            let v = self.0;
            block.audio_out(0).fill(v);
            block.audio_out(1).fill(v);
        }
    }

    let mut executor = GraphExecutor::new(SAMPLE_RATE, BLOCK);
    let source = NodeId::from_raw(0);
    let target = NodeId::from_raw(1);
    let mut batch = CommandBatch::default();
    batch.commands.push(EngineCommand::AddNode {
        id: source,
        node: Box::new(Dc(0.5)),
    });
    batch.commands.push(EngineCommand::AddNode { id: target, node });
    for ch in 0..2 {
        batch.commands.push(EngineCommand::Connect {
            connection: Connection {
                id: ConnectionId::from_raw(ch as u64),
                source: PortId::from_raw(ch as u64),
                dest: PortId::from_raw(10 + ch as u64),
                enabled: true,
                multiplier: 1.0,
                feedback: false,
            },
            src: PortLocation {
                node: source,
                index: ch,
                kind: PortKind::Audio,
            },
            dst: PortLocation {
                node: target,
                index: ch,
                kind: PortKind::Audio,
            },
        });
    }
    executor.apply_batch(batch);
    (executor, target)
}

fn run_block(executor: &mut GraphExecutor) {
    executor.evaluate(
        &TransportView::stopped(SAMPLE_RATE, BLOCK),
        &ParamEventBlock::default(),
    );
}

#[test]
fn test_bridged_gain_processes_audio() {
    let instance = host()
        .instantiate(&descriptor("ostinato.gain"), SAMPLE_RATE, BLOCK)
        .expect("instantiate bridged gain");
    instance.handle.set_parameter(0, 0.5);
    // Give the parameter poke a moment to cross the IPC boundary
    std::thread::sleep(Duration::from_millis(50));

    let (mut executor, target) = executor_with(instance.node);

    // The first block may time out while the pipeline warms up; the signal
    // must settle to input * gain within a few blocks.
    let mut settled = false;
    for _ in 0..20 {
        run_block(&mut executor);
        let out = executor.node_audio_out(target, 0, BLOCK).unwrap();
        if (out[BLOCK / 2] - 0.25).abs() < 1e-5 {
            settled = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(settled, "bridged gain never produced 0.5 * 0.5");
    instance.handle.destroy();
}

#[test]
fn test_missing_unit_is_recoverable() {
    let mut desc = PluginDescriptor::new("acme.nonexistent", "Ghost").bridged();
    desc.binary_path = None;
    let err = host()
        .instantiate(&desc, SAMPLE_RATE, BLOCK)
        .expect_err("unknown unit must fail");
    assert!(matches!(err, HostError::LoadFailed { .. } | HostError::Timeout { .. }));
}

#[test]
fn test_state_roundtrip_over_ipc() {
    let instance = host()
        .instantiate(&descriptor("ostinato.gain"), SAMPLE_RATE, BLOCK)
        .expect("instantiate");

    instance.handle.set_parameter(0, 0.8);
    std::thread::sleep(Duration::from_millis(50));
    let state = instance.handle.save_state().expect("save");

    instance.handle.set_parameter(0, 0.1);
    std::thread::sleep(Duration::from_millis(50));
    instance.handle.restore_state(&state).expect("restore");

    let state2 = instance.handle.save_state().expect("save again");
    assert_eq!(state, state2);
    instance.handle.destroy();
}

/// The core failure-isolation contract: a unit that stalls past its deadline
/// degrades to silence and the next block still completes on time.
#[test]
fn test_stalled_unit_latches_to_silence_without_stalling_scheduler() {
    let instance = host()
        .instantiate(&descriptor("ostinato.diag.stall"), SAMPLE_RATE, BLOCK)
        .expect("instantiate stall unit");
    let handle = instance.handle.clone();
    let (mut executor, target) = executor_with(instance.node);

    // Block N: the unit stalls, the node waits out one block's grace and
    // latches. The call must return within a small multiple of the block
    // duration, not the unit's multi-second stall.
    let started = Instant::now();
    run_block(&mut executor);
    let elapsed = started.elapsed();
    assert!(
        elapsed < Duration::from_millis(500),
        "process stalled the scheduler for {elapsed:?}"
    );
    assert!(handle.is_failed());

    // Block N+1: silence, and fast.
    let started = Instant::now();
    run_block(&mut executor);
    assert!(started.elapsed() < Duration::from_millis(50));
    let out = executor.node_audio_out(target, 0, BLOCK).unwrap();
    assert!(out.iter().all(|&s| s == 0.0));

    handle.destroy();
}

/// A unit that panics in the server process must not take the engine with
/// it: the reply is an error, the node latches, the host process survives.
#[test]
fn test_server_panic_latches_node() {
    let instance = host()
        .instantiate(&descriptor("ostinato.diag.panic"), SAMPLE_RATE, BLOCK)
        .expect("instantiate panic unit");
    let handle = instance.handle.clone();
    let (mut executor, target) = executor_with(instance.node);

    for _ in 0..10 {
        run_block(&mut executor);
        if handle.is_failed() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(handle.is_failed());

    run_block(&mut executor);
    let out = executor.node_audio_out(target, 0, BLOCK).unwrap();
    assert!(out.iter().all(|&s| s == 0.0));
    handle.destroy();
}
