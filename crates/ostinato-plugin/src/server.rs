//! Bridge server: hosts one unit per process, isolated from the engine.

use crate::error::{HostError, Result};
use crate::host::{NativeUnit, NativeUnitRegistry, UnitIo};
use crate::ipc::{MessageTransport, TransportListener};
use crate::native::build_unit;
use crate::protocol::{HostMessage, ServerMessage};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

/// One loaded unit plus its scratch buffers.
struct Hosted {
    unit: Box<dyn NativeUnit>,
    params: Vec<f32>,
    param_ids: Vec<u32>,
    in_l: Vec<f32>,
    in_r: Vec<f32>,
    out_l: Vec<f32>,
    out_r: Vec<f32>,
}

/// Serve a single client connection until shutdown.
///
/// A panic inside the hosted unit is caught and reported as an error reply;
/// either way the fault never leaves this process.
pub async fn serve(socket: &Path) -> Result<()> {
    let listener = TransportListener::bind(socket).await?;
    tracing::info!(socket = %socket.display(), "bridge server listening");

    let mut transport = listener.accept().await?;
    transport.send_server_message(&ServerMessage::Ready).await?;

    let registry = NativeUnitRegistry::with_builtins();
    let mut hosted: Option<Hosted> = None;

    loop {
        let message = match transport.recv_host_message().await {
            Ok(message) => message,
            Err(HostError::Io(_)) => {
                tracing::info!("host went away, shutting down");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match message {
            HostMessage::Load {
                descriptor,
                sample_rate,
                block_size,
            } => {
                let reply = match build_unit(&registry, &descriptor) {
                    Ok(mut unit) => {
                        let prepared = catch_unwind(AssertUnwindSafe(|| {
                            unit.prepare(sample_rate, block_size);
                            unit
                        }));
                        match prepared {
                            Ok(unit) => {
                                hosted = Some(Hosted {
                                    unit,
                                    params: descriptor.params.iter().map(|p| p.default).collect(),
                                    param_ids: descriptor.params.iter().map(|p| p.id).collect(),
                                    in_l: vec![0.0; block_size],
                                    in_r: vec![0.0; block_size],
                                    out_l: vec![0.0; block_size],
                                    out_r: vec![0.0; block_size],
                                });
                                tracing::info!(unit = %descriptor.unique_id, "unit loaded");
                                ServerMessage::Loaded {
                                    params: descriptor.params.clone(),
                                    latency_samples: 0,
                                }
                            }
                            Err(_) => ServerMessage::Error {
                                message: "unit panicked during prepare".into(),
                            },
                        }
                    }
                    Err(e) => ServerMessage::Error {
                        message: e.to_string(),
                    },
                };
                transport.send_server_message(&reply).await?;
            }

            HostMessage::Process {
                n_samples,
                input,
                events,
                params,
                transport: _transport_info,
            } => {
                let reply = match hosted.as_mut() {
                    Some(hosted) => process_one(hosted, n_samples, &input, &events, &params),
                    None => ServerMessage::Error {
                        message: "no unit loaded".into(),
                    },
                };
                transport.send_server_message(&reply).await?;
            }

            HostMessage::SetParameter { param, value } => {
                if let Some(hosted) = hosted.as_mut() {
                    if let Some(index) = hosted.param_ids.iter().position(|&id| id == param) {
                        hosted.params[index] = value;
                    }
                }
                transport.send_server_message(&ServerMessage::Ok).await?;
            }

            HostMessage::SaveState => {
                let reply = match hosted.as_ref() {
                    Some(hosted) => match bincode::serialize(&hosted.params) {
                        Ok(data) => ServerMessage::State { data },
                        Err(e) => ServerMessage::Error {
                            message: e.to_string(),
                        },
                    },
                    None => ServerMessage::Error {
                        message: "no unit loaded".into(),
                    },
                };
                transport.send_server_message(&reply).await?;
            }

            HostMessage::RestoreState { data } => {
                let reply = match hosted.as_mut() {
                    Some(hosted) => match bincode::deserialize::<Vec<f32>>(&data) {
                        Ok(values) if values.len() == hosted.params.len() => {
                            hosted.params = values;
                            ServerMessage::Ok
                        }
                        Ok(values) => ServerMessage::Error {
                            message: format!(
                                "expected {} parameters, got {}",
                                hosted.params.len(),
                                values.len()
                            ),
                        },
                        Err(e) => ServerMessage::Error {
                            message: e.to_string(),
                        },
                    },
                    None => ServerMessage::Error {
                        message: "no unit loaded".into(),
                    },
                };
                transport.send_server_message(&reply).await?;
            }

            HostMessage::Reset => {
                if let Some(hosted) = hosted.as_mut() {
                    let _ = catch_unwind(AssertUnwindSafe(|| hosted.unit.reset()));
                }
                transport.send_server_message(&ServerMessage::Ok).await?;
            }

            HostMessage::Shutdown => {
                tracing::info!("shutdown requested");
                return Ok(());
            }
        }
    }
}

fn process_one(
    hosted: &mut Hosted,
    n_samples: usize,
    input: &[f32],
    events: &[ostinato_core::Event],
    params: &[crate::protocol::ParamChange],
) -> ServerMessage {
    let n = n_samples.min(hosted.out_l.len());
    for i in 0..n {
        hosted.in_l[i] = input.get(i * 2).copied().unwrap_or(0.0);
        hosted.in_r[i] = input.get(i * 2 + 1).copied().unwrap_or(0.0);
    }
    for change in params {
        if let Some(index) = hosted.param_ids.iter().position(|&id| id == change.param) {
            hosted.params[index] = change.value;
        }
    }
    hosted.out_l[..n].fill(0.0);
    hosted.out_r[..n].fill(0.0);

    let Hosted {
        unit,
        params: param_values,
        in_l,
        in_r,
        out_l,
        out_r,
        ..
    } = hosted;
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut io = UnitIo {
            in_l: &in_l[..n],
            in_r: &in_r[..n],
            out_l: &mut out_l[..n],
            out_r: &mut out_r[..n],
            events,
            params: param_values,
            changes: params,
            n_samples: n,
        };
        unit.process(&mut io);
    }));

    match result {
        Ok(()) => {
            let mut output = vec![0.0f32; n * 2];
            for i in 0..n {
                output[i * 2] = hosted.out_l[i];
                output[i * 2 + 1] = hosted.out_r[i];
            }
            ServerMessage::Processed { output }
        }
        Err(_) => {
            tracing::error!("hosted unit panicked during process");
            ServerMessage::Error {
                message: "unit panicked during process".into(),
            }
        }
    }
}
