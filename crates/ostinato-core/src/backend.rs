//! Platform audio backend abstraction.
//!
//! The engine negotiates against the capability query and drives the
//! scheduler through whichever backend accepted the config. The null backend
//! paces a thread at block rate for headless and test use; the CPAL backend
//! (feature `cpal`) talks to real devices.

use crate::error::BackendError;
use crate::scheduler::EngineScheduler;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const NULL_BACKEND_NAME: &str = "null";

/// Requested backend configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend name; `None` picks the first available.
    pub name: Option<String>,
    pub sample_rate: u32,
    pub block_size: u32,
    pub channels: u16,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: None,
            sample_rate: 44_100,
            block_size: 512,
            channels: 2,
        }
    }
}

/// What the platform layer offers. Device enumeration itself lives outside
/// the core; this is the negotiated boundary.
#[derive(Debug, Clone, Default)]
pub struct BackendCapabilities {
    pub backends: Vec<String>,
    pub sample_rates: Vec<u32>,
    pub buffer_sizes: Vec<u32>,
}

/// Query what this build can offer.
pub fn capabilities() -> BackendCapabilities {
    let mut backends = Vec::new();
    #[cfg(feature = "cpal")]
    backends.push("cpal".to_string());
    backends.push(NULL_BACKEND_NAME.to_string());

    BackendCapabilities {
        backends,
        sample_rates: vec![44_100, 48_000, 88_200, 96_000, 176_400, 192_000],
        buffer_sizes: vec![32, 64, 128, 256, 512, 1024, 2048, 4096],
    }
}

/// A running (or startable) audio backend.
pub trait AudioBackend: Send {
    fn name(&self) -> &str;

    /// The rate the backend actually runs at.
    fn sample_rate(&self) -> f64;

    fn channels(&self) -> usize;

    /// Start pulling blocks from the scheduler.
    fn start(&mut self, scheduler: Arc<Mutex<EngineScheduler>>) -> Result<(), BackendError>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Select and construct a backend for the config.
///
/// Fails with [`BackendError`] when nothing accepts the config; callers fall
/// back to [`NullBackend`] and surface the error as a warning rather than
/// aborting.
pub fn negotiate(config: &BackendConfig) -> Result<Box<dyn AudioBackend>, BackendError> {
    let caps = capabilities();
    if !caps.sample_rates.contains(&config.sample_rate) {
        return Err(BackendError::UnsupportedSampleRate(config.sample_rate));
    }
    if !caps.buffer_sizes.contains(&config.block_size) {
        return Err(BackendError::UnsupportedBufferSize(config.block_size));
    }

    match config.name.as_deref() {
        Some(NULL_BACKEND_NAME) => Ok(Box::new(NullBackend::new(config))),
        #[cfg(feature = "cpal")]
        Some("cpal") | None => Ok(Box::new(cpal_backend::CpalBackend::new(config)?)),
        #[cfg(not(feature = "cpal"))]
        None => Err(BackendError::NoBackend),
        Some(other) => Err(BackendError::UnknownBackend(other.to_string())),
    }
}

/// Clock-paced backend with no device: drives the scheduler at block rate
/// from a plain thread. Used for headless operation, tests, and as the
/// fallback when no real backend accepts the config.
pub struct NullBackend {
    sample_rate: f64,
    block_size: usize,
    channels: usize,
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl NullBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            sample_rate: config.sample_rate as f64,
            block_size: config.block_size as usize,
            channels: config.channels as usize,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &str {
        NULL_BACKEND_NAME
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn start(&mut self, scheduler: Arc<Mutex<EngineScheduler>>) -> Result<(), BackendError> {
        if self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.running.store(true, Ordering::Release);

        let running = Arc::clone(&self.running);
        let channels = self.channels.max(1);
        let block_size = self.block_size;
        let block_duration =
            std::time::Duration::from_secs_f64(block_size as f64 / self.sample_rate);

        let handle = std::thread::Builder::new()
            .name("ostinato-null-backend".to_string())
            .spawn(move || {
                let mut buffer = vec![0.0f32; block_size * channels];
                while running.load(Ordering::Acquire) {
                    let next_deadline = std::time::Instant::now() + block_duration;
                    if let Some(mut guard) = scheduler.try_lock() {
                        guard.process_block(&mut buffer, channels);
                    }
                    let now = std::time::Instant::now();
                    if next_deadline > now {
                        std::thread::sleep(next_deadline - now);
                    }
                }
            })
            .map_err(|_| BackendError::NoBackend)?;
        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for NullBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "cpal")]
mod cpal_backend {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    /// Wrapper to hold `cpal::Stream` in a `Send` context.
    ///
    /// # Safety
    /// `cpal::Stream` is `!Send` due to platform internals. The stream is
    /// only created and dropped while its backend is exclusively borrowed by
    /// the engine's backend mutex.
    struct StreamHandle(#[allow(dead_code)] cpal::Stream);

    unsafe impl Send for StreamHandle {}

    pub struct CpalBackend {
        sample_rate: f64,
        channels: usize,
        running: bool,
        stream: Option<StreamHandle>,
    }

    impl CpalBackend {
        pub fn new(_config: &BackendConfig) -> Result<Self, BackendError> {
            let device = default_device()?;
            let config = device.default_output_config()?;
            Ok(Self {
                sample_rate: config.sample_rate().0 as f64,
                channels: config.channels() as usize,
                running: false,
                stream: None,
            })
        }
    }

    fn default_device() -> Result<cpal::Device, BackendError> {
        cpal::default_host()
            .default_output_device()
            .ok_or(BackendError::NoBackend)
    }

    impl AudioBackend for CpalBackend {
        fn name(&self) -> &str {
            "cpal"
        }

        fn sample_rate(&self) -> f64 {
            self.sample_rate
        }

        fn channels(&self) -> usize {
            self.channels
        }

        fn start(&mut self, scheduler: Arc<Mutex<EngineScheduler>>) -> Result<(), BackendError> {
            if self.running {
                return Ok(());
            }
            let device = default_device()?;
            let config = device.default_output_config()?;
            let channels = config.channels() as usize;

            let stream = device.build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // try_lock keeps the callback wait-free; the state machine
                    // only contends this lock outside the running state.
                    match scheduler.try_lock() {
                        Some(mut guard) => guard.process_block(data, channels),
                        None => data.fill(0.0),
                    }
                },
                |_err| {},
                None,
            )?;
            stream.play()?;
            self.stream = Some(StreamHandle(stream));
            self.running = true;
            Ok(())
        }

        fn stop(&mut self) {
            self.stream = None;
            self.running = false;
        }

        fn is_running(&self) -> bool {
            self.running
        }
    }
}

#[cfg(feature = "cpal")]
pub use cpal_backend::CpalBackend;
