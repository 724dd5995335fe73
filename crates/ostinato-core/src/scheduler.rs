//! Per-block engine scheduler.

use crate::commands::{CommandReceiver, ParamEvent, ParamEventBlock, ParamReceiver};
use crate::graph::GraphExecutor;
use crate::metering::DspLoadMeter;
use crate::transport::{Transport, TransportView};
use std::sync::Arc;
use std::time::Instant;

/// Engine lifecycle states.
///
/// `Exporting` is a sub-state of `Stopped`: the exporter owns the scheduler
/// exclusively, so live playback and export can never touch the same graph
/// concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Ready,
    Running,
    Stopped,
    Exporting,
    Released,
}

impl EngineState {
    pub fn name(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Ready => "ready",
            EngineState::Running => "running",
            EngineState::Stopped => "stopped",
            EngineState::Exporting => "exporting",
            EngineState::Released => "released",
        }
    }
}

/// Drives one evaluation pass per audio block.
///
/// Per block: (1) drain pending structural command batches, (2) advance the
/// transport and collect the block's parameter events, (3) evaluate nodes in
/// topological order, (4) read the master bus into the hardware buffer.
///
/// Owned behind a mutex; the audio callback takes it with `try_lock` only,
/// and the lifecycle state machine guarantees the lock is uncontended while
/// running.
pub struct EngineScheduler {
    executor: GraphExecutor,
    transport: Transport,
    commands: CommandReceiver,
    params: ParamReceiver,
    pending: Vec<ParamEvent>,
    events: ParamEventBlock,
    meter: Arc<DspLoadMeter>,
    sample_rate: f64,
    block_size: usize,
}

impl EngineScheduler {
    pub fn new(
        sample_rate: f64,
        block_size: usize,
        commands: CommandReceiver,
        params: ParamReceiver,
        transport: Transport,
        meter: Arc<DspLoadMeter>,
    ) -> Self {
        Self {
            executor: GraphExecutor::new(sample_rate, block_size),
            transport,
            commands,
            params,
            pending: Vec::with_capacity(crate::commands::DEFAULT_PARAM_CAPACITY),
            events: ParamEventBlock::with_capacity(crate::commands::DEFAULT_PARAM_CAPACITY),
            meter,
            sample_rate,
            block_size,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn meter(&self) -> &Arc<DspLoadMeter> {
        &self.meter
    }

    pub fn executor(&self) -> &GraphExecutor {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut GraphExecutor {
        &mut self.executor
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// Re-prepare every node for the configured rate and block size.
    pub fn prepare(&mut self) {
        self.executor.prepare(self.sample_rate, self.block_size);
    }

    /// Drain structural edits and parameter events, then evaluate one block.
    fn run_block(&mut self, n: usize) -> TransportView {
        while let Some(batch) = self.commands.try_recv() {
            self.executor.apply_batch(batch);
        }

        while let Some(event) = self.params.try_recv() {
            if self.pending.len() < self.pending.capacity() {
                self.pending.push(event);
            }
        }

        let view = self.transport.begin_block(n);
        let block_end = view.block_start + n as u64;

        self.events.clear();
        let events = &mut self.events;
        self.pending.retain(|event| {
            if event.time < block_end {
                events.push(*event);
                false
            } else {
                true
            }
        });
        self.events.finish();

        self.executor.evaluate(&view, &self.events);
        view
    }

    /// Live path: evaluate and write interleaved frames into the hardware
    /// buffer, recording DSP load and xruns.
    pub fn process_block(&mut self, output: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let n = (output.len() / channels).min(self.block_size);

        let started = Instant::now();
        let view = self.run_block(n);
        self.meter.record(n, started.elapsed());

        output.fill(0.0);
        for ch in 0..channels.min(2) {
            if let Some(master) = self.executor.master_audio(ch, n) {
                for (frame, &sample) in master.iter().enumerate() {
                    output[frame * channels + ch] = sample;
                }
            }
        }

        self.transport.end_block(&view);
    }

    /// Offline path: evaluate one block into planar stereo buffers.
    ///
    /// Identical graph pass as [`process_block`](Self::process_block), but
    /// not subject to xrun accounting: offline rendering has no deadline.
    pub fn render_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        let n = left.len().min(right.len()).min(self.block_size);
        let view = self.run_block(n);

        left[..n].fill(0.0);
        right[..n].fill(0.0);
        if let Some(master) = self.executor.master_audio(0, n) {
            left[..n].copy_from_slice(master);
        }
        if let Some(master) = self.executor.master_audio(1, n) {
            right[..n].copy_from_slice(master);
        }

        self.transport.end_block(&view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{command_channel, param_channel};
    use crate::graph::RoutingGraph;
    use crate::nodes::{Fader, FaderKind, SineSource, SoloState};
    use crate::snapshot::encode_config;
    use crate::transport::transport_pair;

    fn setup() -> (EngineScheduler, RoutingGraph, crate::transport::TransportHandle) {
        let (ctx, crx) = command_channel(256);
        let (ptx, prx) = param_channel(1024);
        let (clock, handle) = transport_pair(48000.0);
        let meter = Arc::new(DspLoadMeter::new(48000.0));
        let scheduler = EngineScheduler::new(48000.0, 256, crx, prx, clock, meter);
        let graph = RoutingGraph::new(ctx, ptx);
        (scheduler, graph, handle)
    }

    #[test]
    fn test_commands_applied_at_block_boundary() {
        let (mut scheduler, mut graph, _transport) = setup();
        let sine = graph
            .add_node(Box::new(SineSource::new(440.0, 1.0)))
            .unwrap();
        graph.set_master(Some(sine)).unwrap();

        assert_eq!(scheduler.executor().node_count(), 0);
        let mut out = vec![0.0f32; 512];
        scheduler.process_block(&mut out, 2);
        assert_eq!(scheduler.executor().node_count(), 1);
        // Master audio reached the hardware buffer
        assert!(out.iter().any(|&s| s.abs() > 0.1));
    }

    #[test]
    fn test_master_silence_when_unset() {
        let (mut scheduler, mut graph, _transport) = setup();
        graph
            .add_node(Box::new(SineSource::new(440.0, 1.0)))
            .unwrap();

        let mut out = vec![1.0f32; 512];
        scheduler.process_block(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_future_param_event_stays_pending() {
        let (mut scheduler, mut graph, transport) = setup();
        let solo = std::sync::Arc::new(SoloState::default());
        let fader = Fader::new(FaderKind::Master, solo);
        let config = encode_config(&fader.config());
        let sine = graph
            .add_node(Box::new(SineSource::new(440.0, 1.0)))
            .unwrap();
        let master = graph
            .add_node_with_kind(Box::new(fader), "core.fader", config)
            .unwrap();
        graph
            .connect(
                graph.audio_out(sine, 0).unwrap(),
                graph.audio_in(master, 0).unwrap(),
            )
            .unwrap();
        graph.set_master(Some(master)).unwrap();

        transport.play();
        // Mute far in the future; nothing should change this block.
        graph
            .schedule_parameter(master, crate::nodes::params::fader::PARAM_MUTE, 1.0, 48000 * 60)
            .unwrap();

        let mut out = vec![0.0f32; 512];
        scheduler.process_block(&mut out, 2);
        assert!(out.iter().any(|&s| s.abs() > 0.01));
        assert_eq!(scheduler.pending.len(), 1);
    }

    #[test]
    fn test_render_block_is_deterministic() {
        let (mut scheduler, mut graph, transport) = setup();
        let sine = graph
            .add_node(Box::new(SineSource::new(1000.0, 0.8)))
            .unwrap();
        graph.set_master(Some(sine)).unwrap();
        transport.play();

        let run = |scheduler: &mut EngineScheduler| {
            scheduler.transport_mut().force_locate(0);
            let mut l = vec![0.0f32; 256];
            let mut r = vec![0.0f32; 256];
            scheduler.render_block(&mut l, &mut r);
            (l, r)
        };

        let a = run(&mut scheduler);
        let b = run(&mut scheduler);
        assert_eq!(a, b);
    }

    #[test]
    fn test_xrun_counting_via_meter() {
        let (scheduler, _graph, _transport) = setup();
        // The meter is shared; an overrun recorded by the scheduler's meter
        // shows up for any reader.
        scheduler
            .meter()
            .record(256, std::time::Duration::from_millis(50));
        assert_eq!(scheduler.meter().xruns(), 1);
    }
}
