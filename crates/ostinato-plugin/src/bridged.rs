//! Out-of-process host: one server process per instance, lock-free queues
//! between the audio thread and the IPC thread, bounded deadline per block.
//!
//! Audio thread -> ArrayQueue -> bridge thread -> socket -> server process.
//!
//! A process call that misses its deadline, or a server crash, latches the
//! node to silence for the rest of the session (or until reload). The
//! scheduler is never stalled past the one-block grace period.

use crate::descriptor::{FormatKind, ParamInfo, PluginDescriptor};
use crate::error::{HostError, LoadStage, Result};
use crate::host::{InstanceHandle, PluginInstance};
use crate::ipc::MessageTransport;
use crate::native::{node_ports, param_index, parameter_specs};
use crate::protocol::{
    HostMessage, ParamChange, ServerMessage, WireEventVec, WireParamVec, WireTransport,
};
use crossbeam::queue::ArrayQueue;
use ostinato_core::{
    AtomicFlag, AtomicFloat, NodePorts, ParameterSpec, ProcessBlock, ProcessingNode,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Child;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const QUEUE_SIZE: usize = 8;
const FRAME_POOL_SIZE: usize = 4;

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Bridged host configuration.
#[derive(Debug, Clone)]
pub struct BridgedHostConfig {
    /// Path of the `ostinato-bridge` server binary.
    pub server_binary: PathBuf,
    /// Per-block deadline for `process` over IPC.
    pub process_timeout: Duration,
    /// Deadline for control operations (load, state, shutdown).
    pub control_timeout: Duration,
}

impl Default for BridgedHostConfig {
    fn default() -> Self {
        let server_binary = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join("ostinato-bridge")))
            .unwrap_or_else(|| PathBuf::from("ostinato-bridge"));
        Self {
            server_binary,
            process_timeout: Duration::from_millis(100),
            control_timeout: Duration::from_secs(5),
        }
    }
}

struct ProcessRequest {
    /// Interleaved stereo input, `n_samples * 2` valid frames.
    frame: Vec<f32>,
    n_samples: usize,
    events: WireEventVec,
    params: WireParamVec,
    transport: WireTransport,
}

struct ProcessReply {
    /// Interleaved stereo output on success; recycled either way.
    frame: Vec<f32>,
    ok: bool,
}

enum ControlRequest {
    SaveState(crossbeam_channel::Sender<Result<Vec<u8>>>),
    RestoreState(Vec<u8>, crossbeam_channel::Sender<Result<()>>),
    SetParameter(u32, f32),
    Reset(crossbeam_channel::Sender<Result<()>>),
    Shutdown,
}

struct BridgedShared {
    failed: AtomicFlag,
    alive: AtomicBool,
    /// Mirror of parameter values for handle queries.
    params: Vec<AtomicFloat>,
}

/// The out-of-process host.
pub struct BridgedHost {
    config: BridgedHostConfig,
}

impl BridgedHost {
    pub fn new(config: BridgedHostConfig) -> Self {
        Self { config }
    }

    /// Spawn a server process, load the unit into it and wire the queues.
    pub fn instantiate(
        &self,
        descriptor: &PluginDescriptor,
        sample_rate: f64,
        block_size: usize,
    ) -> Result<PluginInstance> {
        debug_assert_eq!(descriptor.format_kind, FormatKind::Bridged);

        let socket = std::env::temp_dir().join(format!(
            "ostinato-bridge-{}-{}.sock",
            std::process::id(),
            INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let child = std::process::Command::new(&self.config.server_binary)
            .arg("--socket")
            .arg(&socket)
            .spawn()
            .map_err(|e| HostError::LoadFailed {
                path: self.config.server_binary.clone(),
                stage: LoadStage::Spawning,
                reason: e.to_string(),
            })?;
        let child = Arc::new(Mutex::new(Some(child)));

        let requests = Arc::new(ArrayQueue::<ProcessRequest>::new(QUEUE_SIZE));
        let replies = Arc::new(ArrayQueue::<ProcessReply>::new(QUEUE_SIZE));
        let pool = Arc::new(ArrayQueue::<Vec<f32>>::new(FRAME_POOL_SIZE));
        for _ in 0..FRAME_POOL_SIZE {
            let _ = pool.push(vec![0.0f32; block_size * 2]);
        }

        let shared = Arc::new(BridgedShared {
            failed: AtomicFlag::new(false),
            alive: AtomicBool::new(true),
            params: descriptor
                .params
                .iter()
                .map(|p| AtomicFloat::new(p.default))
                .collect(),
        });

        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (load_tx, load_rx) = crossbeam_channel::bounded(1);

        let worker = BridgeWorker {
            socket: socket.clone(),
            descriptor: descriptor.clone(),
            sample_rate,
            block_size,
            requests: Arc::clone(&requests),
            replies: Arc::clone(&replies),
            control: control_rx,
            shared: Arc::clone(&shared),
            process_timeout: self.config.process_timeout,
            control_timeout: self.config.control_timeout,
        };
        let thread = std::thread::Builder::new()
            .name("ostinato-bridge-io".to_string())
            .spawn(move || worker.run(load_tx))
            .map_err(|e| HostError::Ipc(e.to_string()))?;

        let loaded: Result<Vec<ParamInfo>> = load_rx
            .recv_timeout(self.config.control_timeout)
            .map_err(|_| HostError::Timeout {
                operation: "load".into(),
                duration_ms: self.config.control_timeout.as_millis() as u64,
            })
            .and_then(|r| r);
        let server_params = match loaded {
            Ok(params) => params,
            Err(err) => {
                kill_child(&child);
                return Err(err);
            }
        };

        // The server's parameter list wins over the catalog's when present.
        let mut descriptor = descriptor.clone();
        if !server_params.is_empty() {
            descriptor.params = server_params;
        }

        // The realtime deadline is one block's grace at most; the worker keeps
        // the longer IPC timeout so a merely-slow server does not also tear
        // down the connection.
        let block_duration = Duration::from_secs_f64(block_size as f64 / sample_rate);
        let node = BridgedPluginNode {
            descriptor: descriptor.clone(),
            specs: parameter_specs(&descriptor),
            shared: Arc::clone(&shared),
            requests: Arc::clone(&requests),
            replies: Arc::clone(&replies),
            pool: Arc::clone(&pool),
            timeout: self.config.process_timeout.min(block_duration),
        };
        let handle = BridgedHandle {
            descriptor,
            shared,
            control: control_tx,
            control_timeout: self.config.control_timeout,
            replies,
            pool,
            child,
            thread: Mutex::new(Some(thread)),
            socket,
        };
        Ok(PluginInstance {
            node: Box::new(node),
            handle: Arc::new(handle),
        })
    }
}

fn kill_child(child: &Arc<Mutex<Option<Child>>>) {
    if let Some(mut child) = child.lock().take() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// IPC service thread: drains the RT queues and the control channel into the
/// socket, one in-flight operation at a time.
struct BridgeWorker {
    socket: PathBuf,
    descriptor: PluginDescriptor,
    sample_rate: f64,
    block_size: usize,
    requests: Arc<ArrayQueue<ProcessRequest>>,
    replies: Arc<ArrayQueue<ProcessReply>>,
    control: crossbeam_channel::Receiver<ControlRequest>,
    shared: Arc<BridgedShared>,
    process_timeout: Duration,
    control_timeout: Duration,
}

impl BridgeWorker {
    fn run(self, load_tx: crossbeam_channel::Sender<Result<Vec<ParamInfo>>>) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                let _ = load_tx.send(Err(HostError::Ipc(e.to_string())));
                return;
            }
        };
        runtime.block_on(self.main(load_tx));
    }

    async fn main(self, load_tx: crossbeam_channel::Sender<Result<Vec<ParamInfo>>>) {
        let mut transport = match self.connect_and_load().await {
            Ok((transport, params)) => {
                let _ = load_tx.send(Ok(params));
                transport
            }
            Err(err) => {
                let _ = load_tx.send(Err(err));
                return;
            }
        };

        loop {
            if let Some(request) = self.requests.pop() {
                if !self.handle_process(&mut transport, request).await {
                    break;
                }
            } else {
                match self.control.try_recv() {
                    Ok(ControlRequest::Shutdown) => {
                        let _ = transport.send_host_message(&HostMessage::Shutdown).await;
                        break;
                    }
                    Ok(request) => {
                        if !self.handle_control(&mut transport, request).await {
                            break;
                        }
                    }
                    Err(crossbeam_channel::TryRecvError::Empty) => {
                        tokio::time::sleep(Duration::from_micros(100)).await;
                    }
                    Err(crossbeam_channel::TryRecvError::Disconnected) => break,
                }
            }
        }
        self.shared.alive.store(false, Ordering::Release);
    }

    async fn connect_and_load(&self) -> Result<(MessageTransport, Vec<ParamInfo>)> {
        let deadline = Instant::now() + self.control_timeout;
        let mut transport = loop {
            match MessageTransport::connect(&self.socket).await {
                Ok(transport) => break transport,
                Err(_) if Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => return Err(e),
            }
        };

        match self.recv(&mut transport, self.control_timeout).await? {
            ServerMessage::Ready => {}
            other => return Err(unexpected(other)),
        }

        transport
            .send_host_message(&HostMessage::Load {
                descriptor: self.descriptor.clone(),
                sample_rate: self.sample_rate,
                block_size: self.block_size,
            })
            .await?;
        match self.recv(&mut transport, self.control_timeout).await? {
            ServerMessage::Loaded { params, .. } => Ok((transport, params)),
            ServerMessage::Error { message } => Err(HostError::LoadFailed {
                path: self.descriptor.binary_path.clone().unwrap_or_default(),
                stage: LoadStage::Instantiation,
                reason: message,
            }),
            other => Err(unexpected(other)),
        }
    }

    async fn recv(
        &self,
        transport: &mut MessageTransport,
        timeout: Duration,
    ) -> Result<ServerMessage> {
        match tokio::time::timeout(timeout, transport.recv_server_message()).await {
            Ok(result) => result,
            Err(_) => Err(HostError::Timeout {
                operation: "ipc receive".into(),
                duration_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Returns false when the connection is beyond recovery.
    async fn handle_process(
        &self,
        transport: &mut MessageTransport,
        request: ProcessRequest,
    ) -> bool {
        let n = request.n_samples;
        let message = HostMessage::Process {
            n_samples: n,
            input: request.frame[..n * 2].to_vec(),
            events: request.events,
            params: request.params,
            transport: request.transport,
        };
        let mut frame = request.frame;

        if transport.send_host_message(&message).await.is_err() {
            self.shared.failed.set(true);
            let _ = self.replies.push(ProcessReply { frame, ok: false });
            return false;
        }

        match self.recv(transport, self.process_timeout).await {
            Ok(ServerMessage::Processed { output }) => {
                let len = output.len().min(frame.len());
                frame[..len].copy_from_slice(&output[..len]);
                let _ = self.replies.push(ProcessReply { frame, ok: true });
                true
            }
            Ok(ServerMessage::Error { message }) => {
                tracing::warn!(unit = %self.descriptor.unique_id, %message, "process failed in server");
                self.shared.failed.set(true);
                let _ = self.replies.push(ProcessReply { frame, ok: false });
                true
            }
            Ok(other) => {
                self.shared.failed.set(true);
                let _ = self.replies.push(ProcessReply { frame, ok: false });
                tracing::warn!(?other, "unexpected reply to process");
                true
            }
            Err(_) => {
                // Deadline missed or connection dead: the RT side has already
                // latched (or will); the server is no longer trustworthy.
                self.shared.failed.set(true);
                let _ = self.replies.push(ProcessReply { frame, ok: false });
                false
            }
        }
    }

    async fn handle_control(
        &self,
        transport: &mut MessageTransport,
        request: ControlRequest,
    ) -> bool {
        match request {
            ControlRequest::SaveState(reply) => {
                if transport
                    .send_host_message(&HostMessage::SaveState)
                    .await
                    .is_err()
                {
                    let _ = reply.send(Err(HostError::ProcessCrashed));
                    return false;
                }
                match self.recv(transport, self.control_timeout).await {
                    Ok(ServerMessage::State { data }) => {
                        let _ = reply.send(Ok(data));
                        true
                    }
                    Ok(ServerMessage::Error { message }) => {
                        let _ = reply.send(Err(HostError::StateSave(message)));
                        true
                    }
                    Ok(other) => {
                        let _ = reply.send(Err(unexpected(other)));
                        true
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                        false
                    }
                }
            }
            ControlRequest::RestoreState(data, reply) => {
                if transport
                    .send_host_message(&HostMessage::RestoreState { data })
                    .await
                    .is_err()
                {
                    let _ = reply.send(Err(HostError::ProcessCrashed));
                    return false;
                }
                match self.recv(transport, self.control_timeout).await {
                    Ok(ServerMessage::Ok) => {
                        let _ = reply.send(Ok(()));
                        true
                    }
                    Ok(ServerMessage::Error { message }) => {
                        let _ = reply.send(Err(HostError::StateRestore(message)));
                        true
                    }
                    Ok(other) => {
                        let _ = reply.send(Err(unexpected(other)));
                        true
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                        false
                    }
                }
            }
            ControlRequest::SetParameter(param, value) => {
                if transport
                    .send_host_message(&HostMessage::SetParameter { param, value })
                    .await
                    .is_err()
                {
                    return false;
                }
                matches!(
                    self.recv(transport, self.control_timeout).await,
                    Ok(ServerMessage::Ok)
                )
            }
            ControlRequest::Reset(reply) => {
                if transport.send_host_message(&HostMessage::Reset).await.is_err() {
                    let _ = reply.send(Err(HostError::ProcessCrashed));
                    return false;
                }
                match self.recv(transport, self.control_timeout).await {
                    Ok(ServerMessage::Ok) => {
                        let _ = reply.send(Ok(()));
                        true
                    }
                    Ok(_) | Err(_) => {
                        let _ = reply.send(Err(HostError::ProcessCrashed));
                        false
                    }
                }
            }
            ControlRequest::Shutdown => unreachable!("handled by caller"),
        }
    }
}

fn unexpected(message: ServerMessage) -> HostError {
    HostError::Protocol(format!("unexpected server message: {message:?}"))
}

/// Graph-side node proxying `process` to the server.
pub struct BridgedPluginNode {
    descriptor: PluginDescriptor,
    specs: Vec<ParameterSpec>,
    shared: Arc<BridgedShared>,
    requests: Arc<ArrayQueue<ProcessRequest>>,
    replies: Arc<ArrayQueue<ProcessReply>>,
    pool: Arc<ArrayQueue<Vec<f32>>>,
    timeout: Duration,
}

impl ProcessingNode for BridgedPluginNode {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn ports(&self) -> NodePorts {
        node_ports(&self.descriptor)
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &self.specs
    }

    fn process(&mut self, block: &mut ProcessBlock<'_>) {
        if self.shared.failed.get() || !self.shared.alive.load(Ordering::Acquire) {
            return;
        }
        let Some(mut frame) = self.pool.pop() else {
            // All frames in flight: the bridge is behind. Skip the block
            // rather than wait.
            return;
        };

        let n = block.n_samples();
        let in_l = block.audio_in_ref(0);
        let in_r = block.audio_in_ref(1);
        for i in 0..n.min(frame.len() / 2) {
            frame[i * 2] = in_l.get(i).copied().unwrap_or(0.0);
            frame[i * 2 + 1] = in_r.get(i).copied().unwrap_or(0.0);
        }

        let mut events = WireEventVec::new();
        let event_index = self.descriptor.port_layout.audio_inputs.min(2);
        if let Some(buffer) = block.events_in_ref(event_index) {
            events.extend(buffer.iter().copied());
        }

        let mut params = WireParamVec::new();
        for idx in 0..block.param_events().len() {
            let event = block.param_events()[idx];
            if let Some(index) = param_index(&self.descriptor, event.param) {
                // The mirror was sized from the catalog entry; the server's
                // list may be longer.
                if let Some(slot) = self.shared.params.get(index) {
                    slot.set(event.value);
                }
                params.push(ParamChange {
                    param: event.param,
                    value: event.value,
                    offset: block.event_offset(&event) as u32,
                });
            }
        }

        let t = block.transport();
        let request = ProcessRequest {
            frame,
            n_samples: n,
            events,
            params,
            transport: WireTransport {
                playing: t.playing,
                recording: t.recording,
                tempo: t.tempo,
                position_samples: t.block_start,
                position_beats: t.beats_at_start,
                time_sig_numerator: t.time_signature.numerator,
                time_sig_denominator: t.time_signature.denominator,
            },
        };
        if let Err(rejected) = self.requests.push(request) {
            let _ = self.pool.push(rejected.frame);
            return;
        }

        // Bounded wait: one block's grace, then latch to silence for good.
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(reply) = self.replies.pop() {
                if reply.ok {
                    let (out_l, out_r) = block.audio_out_pair(0, 1);
                    for i in 0..n.min(reply.frame.len() / 2) {
                        if let Some(s) = out_l.get_mut(i) {
                            *s = reply.frame[i * 2];
                        }
                        if let Some(s) = out_r.get_mut(i) {
                            *s = reply.frame[i * 2 + 1];
                        }
                    }
                } else {
                    self.shared.failed.set(true);
                }
                let _ = self.pool.push(reply.frame);
                return;
            }
            if Instant::now() >= deadline {
                self.shared.failed.set(true);
                return;
            }
            std::hint::spin_loop();
        }
    }
}

/// Control-side handle for a bridged instance.
pub struct BridgedHandle {
    descriptor: PluginDescriptor,
    shared: Arc<BridgedShared>,
    control: crossbeam_channel::Sender<ControlRequest>,
    control_timeout: Duration,
    replies: Arc<ArrayQueue<ProcessReply>>,
    pool: Arc<ArrayQueue<Vec<f32>>>,
    child: Arc<Mutex<Option<Child>>>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    socket: PathBuf,
}

impl BridgedHandle {
    fn request<T>(
        &self,
        build: impl FnOnce(crossbeam_channel::Sender<Result<T>>) -> ControlRequest,
    ) -> Result<T> {
        if !self.shared.alive.load(Ordering::Acquire) {
            return Err(HostError::ProcessCrashed);
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.control
            .send(build(tx))
            .map_err(|_| HostError::ProcessCrashed)?;
        rx.recv_timeout(self.control_timeout)
            .map_err(|_| HostError::Timeout {
                operation: "control request".into(),
                duration_ms: self.control_timeout.as_millis() as u64,
            })?
    }
}

impl InstanceHandle for BridgedHandle {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn save_state(&self) -> Result<Vec<u8>> {
        self.request(ControlRequest::SaveState)
    }

    fn restore_state(&self, data: &[u8]) -> Result<()> {
        self.request(|tx| ControlRequest::RestoreState(data.to_vec(), tx))
    }

    fn set_parameter(&self, param: u32, value: f32) {
        if let Some(slot) = param_index(&self.descriptor, param)
            .and_then(|i| self.shared.params.get(i))
        {
            slot.set(value);
        }
        let _ = self.control.send(ControlRequest::SetParameter(param, value));
    }

    fn parameter(&self, param: u32) -> Option<f32> {
        param_index(&self.descriptor, param)
            .and_then(|i| self.shared.params.get(i))
            .map(|slot| slot.get())
    }

    fn is_failed(&self) -> bool {
        self.shared.failed.get()
    }

    /// Drain stale replies back into the frame pool and clear the latch.
    /// Only possible while the server process is still alive; a crashed
    /// server needs a fresh instantiate.
    fn reload(&self) -> Result<()> {
        if !self.shared.alive.load(Ordering::Acquire) {
            return Err(HostError::ProcessCrashed);
        }
        while let Some(reply) = self.replies.pop() {
            let _ = self.pool.push(reply.frame);
        }
        self.request(ControlRequest::Reset)?;
        self.shared.failed.set(false);
        Ok(())
    }

    fn destroy(&self) {
        let _ = self.control.send(ControlRequest::Shutdown);
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
        kill_child(&self.child);
        let _ = std::fs::remove_file(&self.socket);
    }
}

impl Drop for BridgedHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}
