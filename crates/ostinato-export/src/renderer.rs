//! Offline renderer: drives the engine scheduler over a transport range.
//!
//! The same graph and topological order as live playback, stepped by an
//! explicit loop instead of a hardware callback. No deadline, no xrun
//! accounting; the loop runs as fast (or slow) as the machine allows and the
//! result is deterministic for a given graph state.

use crate::dsp::{resample_stereo, scan_loudness, Ditherer, LoudnessScan};
use crate::error::{ExportError, Result};
use crate::format;
use crate::options::{DitherType, ExportOptions};
use ostinato_core::EngineScheduler;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Sample range to render.
#[derive(Debug, Clone, Copy)]
pub struct ExportRange {
    pub start_sample: u64,
    pub end_sample: u64,
}

impl ExportRange {
    pub fn new(start_sample: u64, end_sample: u64) -> Self {
        Self {
            start_sample,
            end_sample,
        }
    }

    pub fn len(&self) -> u64 {
        self.end_sample.saturating_sub(self.start_sample)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Progress callback, called with 0.0..=1.0 between blocks.
pub type ProgressFn = Box<dyn Fn(f32) + Send>;

/// Outcome of a completed render.
#[derive(Debug, Clone)]
pub struct RenderReport {
    pub path: PathBuf,
    pub rendered_samples: u64,
    pub output_sample_rate: u32,
    pub scan: LoudnessScan,
}

/// Render the scheduler's graph over `range` into memory.
///
/// The caller (the engine facade) guarantees exclusive ownership of the
/// scheduler: export requires the stopped state and moves the engine into
/// its exporting sub-state first. Transport position and play state are
/// restored afterwards.
pub fn render_range(
    scheduler: &mut EngineScheduler,
    range: ExportRange,
    preroll_blocks: usize,
    progress: Option<&ProgressFn>,
    cancel: &AtomicBool,
) -> Result<(Vec<f32>, Vec<f32>)> {
    if range.is_empty() {
        return Err(ExportError::InvalidRange {
            start: range.start_sample,
            end: range.end_sample,
        });
    }

    let block = scheduler.block_size();
    let total = range.len() as usize;
    let mut left = Vec::with_capacity(total + block);
    let mut right = Vec::with_capacity(total + block);
    let mut chunk_l = vec![0.0f32; block];
    let mut chunk_r = vec![0.0f32; block];

    let saved_position = scheduler.transport_mut().playhead();
    let saved_playing = scheduler.transport_mut().is_playing();
    let saved_seek = scheduler.transport_mut().pending_seek();

    // Pre-roll settles parameter smoothers and effect tails so repeated
    // renders of the same graph state are byte-identical. Output is
    // discarded; the range itself always starts exactly at start_sample.
    let preroll_samples = (preroll_blocks * block) as u64;
    let preroll_start = range.start_sample.saturating_sub(preroll_samples);
    scheduler.transport_mut().force_locate(preroll_start);
    scheduler.transport_mut().set_playing(true);
    for _ in 0..preroll_blocks {
        scheduler.render_block(&mut chunk_l, &mut chunk_r);
    }
    scheduler.transport_mut().force_locate(range.start_sample);

    let mut position = range.start_sample;
    while position < range.end_sample {
        if cancel.load(Ordering::Acquire) {
            restore_transport(scheduler, saved_position, saved_playing, saved_seek);
            return Err(ExportError::Cancelled);
        }
        let n = ((range.end_sample - position) as usize).min(block);
        scheduler.render_block(&mut chunk_l[..n], &mut chunk_r[..n]);
        left.extend_from_slice(&chunk_l[..n]);
        right.extend_from_slice(&chunk_r[..n]);
        position += n as u64;

        if let Some(progress) = progress {
            progress(left.len() as f32 / total as f32);
        }
    }

    restore_transport(scheduler, saved_position, saved_playing, saved_seek);
    Ok((left, right))
}

fn restore_transport(
    scheduler: &mut EngineScheduler,
    position: u64,
    playing: bool,
    pending_seek: Option<u64>,
) {
    scheduler.transport_mut().set_playing(playing);
    scheduler.transport_mut().force_locate(position);
    if let Some(target) = pending_seek {
        scheduler.transport_mut().set_pending_seek(target);
    }
}

/// Render a range and write it to `path` per the options.
///
/// Cancellation is cooperative (checked between blocks) and any partial
/// output file is removed. Peaks over 0 dBFS surface as a warning in the
/// report, never as an error.
pub fn render_to_file(
    scheduler: &mut EngineScheduler,
    range: ExportRange,
    options: &ExportOptions,
    path: &Path,
    progress: Option<ProgressFn>,
    cancel: &AtomicBool,
) -> Result<RenderReport> {
    let engine_rate = scheduler.sample_rate() as u32;
    let (mut left, mut right) = render_range(
        scheduler,
        range,
        options.preroll_blocks,
        progress.as_ref(),
        cancel,
    )?;
    let rendered_samples = left.len() as u64;

    let output_rate = options.output_sample_rate(engine_rate);
    if options.needs_resampling(engine_rate) {
        let (l, r) = resample_stereo(
            &left,
            &right,
            engine_rate,
            output_rate,
            options.resample_quality,
        )?;
        left = l;
        right = r;
    }

    let scan = scan_loudness(&left, &right, output_rate);
    if scan.clipped {
        log::warn!(
            "export peaks above 0 dBFS (sample peak {:.2} dBFS, true peak {:.2} dBTP)",
            scan.sample_peak_dbfs,
            scan.true_peak_dbtp
        );
    }

    if options.dither != DitherType::None && options.bit_depth.bits() < 32 {
        Ditherer::new(options.dither).apply(&mut left, &mut right, options.bit_depth.bits());
    }

    if let Err(e) = format::write_file(path, &left, &right, output_rate, options) {
        // Never leave a half-written file behind
        let _ = std::fs::remove_file(path);
        return Err(e);
    }

    log::info!(
        "exported {} samples to {} ({:.1} LUFS)",
        rendered_samples,
        path.display(),
        scan.integrated_lufs
    );
    Ok(RenderReport {
        path: path.to_path_buf(),
        rendered_samples,
        output_sample_rate: output_rate,
        scan,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostinato_core::{
        command_channel, param_channel, transport_pair, DspLoadMeter, RoutingGraph, SineSource,
    };
    use std::sync::Arc;

    fn scheduler_with_sine() -> EngineScheduler {
        let (ctx, crx) = command_channel(64);
        let (ptx, prx) = param_channel(64);
        let (clock, _handle) = transport_pair(48000.0);
        let meter = Arc::new(DspLoadMeter::new(48000.0));
        let mut scheduler = EngineScheduler::new(48000.0, 256, crx, prx, clock, meter);

        let mut graph = RoutingGraph::new(ctx, ptx);
        let sine = graph
            .add_node(Box::new(SineSource::new(440.0, 0.5)))
            .unwrap();
        graph.set_master(Some(sine)).unwrap();
        // Apply the queued commands
        let mut l = vec![0.0; 256];
        let mut r = vec![0.0; 256];
        scheduler.render_block(&mut l, &mut r);
        scheduler
    }

    #[test]
    fn test_range_length_is_exact() {
        let mut scheduler = scheduler_with_sine();
        let cancel = AtomicBool::new(false);
        let (l, r) = render_range(
            &mut scheduler,
            ExportRange::new(1000, 5000),
            2,
            None,
            &cancel,
        )
        .unwrap();
        assert_eq!(l.len(), 4000);
        assert_eq!(r.len(), 4000);
    }

    #[test]
    fn test_empty_range_rejected() {
        let mut scheduler = scheduler_with_sine();
        let cancel = AtomicBool::new(false);
        assert!(matches!(
            render_range(&mut scheduler, ExportRange::new(5, 5), 0, None, &cancel),
            Err(ExportError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_repeated_render_is_identical() {
        let mut scheduler = scheduler_with_sine();
        let cancel = AtomicBool::new(false);
        let range = ExportRange::new(0, 48_000);
        let a = render_range(&mut scheduler, range, 8, None, &cancel).unwrap();
        let b = render_range(&mut scheduler, range, 8, None, &cancel).unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }

    #[test]
    fn test_transport_restored_after_render() {
        let mut scheduler = scheduler_with_sine();
        scheduler.transport_mut().force_locate(12345);
        let cancel = AtomicBool::new(false);
        render_range(
            &mut scheduler,
            ExportRange::new(0, 4800),
            0,
            None,
            &cancel,
        )
        .unwrap();
        assert_eq!(scheduler.transport_mut().playhead(), 12345);
        assert!(!scheduler.transport_mut().is_playing());
    }

    #[test]
    fn test_cancel_stops_render() {
        let mut scheduler = scheduler_with_sine();
        let cancel = AtomicBool::new(true);
        assert!(matches!(
            render_range(
                &mut scheduler,
                ExportRange::new(0, 48_000),
                0,
                None,
                &cancel
            ),
            Err(ExportError::Cancelled)
        ));
    }

    #[cfg(feature = "wav")]
    #[test]
    fn test_render_to_file_cleanup_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut scheduler = scheduler_with_sine();
        let cancel = AtomicBool::new(true);
        let result = render_to_file(
            &mut scheduler,
            ExportRange::new(0, 48_000),
            &ExportOptions::default(),
            &path,
            None,
            &cancel,
        );
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[cfg(feature = "wav")]
    #[test]
    fn test_render_to_file_reports_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let mut scheduler = scheduler_with_sine();
        let cancel = AtomicBool::new(false);
        let report = render_to_file(
            &mut scheduler,
            ExportRange::new(0, 48_000),
            &ExportOptions::default(),
            &path,
            None,
            &cancel,
        )
        .unwrap();

        assert!(path.exists());
        assert_eq!(report.rendered_samples, 48_000);
        assert!(!report.scan.clipped);
        // -6 dBFS sine
        assert!((report.scan.sample_peak_dbfs - (-6.02)).abs() < 0.2);
    }
}
