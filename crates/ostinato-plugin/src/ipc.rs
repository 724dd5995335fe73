//! IPC transport: length-prefixed bincode frames over a Unix socket
//! (named pipe on Windows).

use crate::error::Result;
use crate::protocol::{HostMessage, ServerMessage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

#[cfg(windows)]
use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};

/// One side of the message channel.
pub enum MessageTransport {
    #[cfg(unix)]
    Unix(UnixStream),
    #[cfg(windows)]
    WindowsClient(tokio::net::windows::named_pipe::NamedPipeClient),
    #[cfg(windows)]
    WindowsServer(NamedPipeServer),
}

impl MessageTransport {
    #[cfg(unix)]
    pub async fn connect(path: &std::path::Path) -> Result<Self> {
        Ok(Self::Unix(UnixStream::connect(path).await?))
    }

    #[cfg(windows)]
    pub async fn connect(path: &std::path::Path) -> Result<Self> {
        Ok(Self::WindowsClient(ClientOptions::new().open(path)?))
    }

    async fn send_frame<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let data = bincode::serialize(value)?;
        let len = data.len() as u32;
        match self {
            #[cfg(unix)]
            Self::Unix(stream) => {
                stream.write_u32(len).await?;
                stream.write_all(&data).await?;
            }
            #[cfg(windows)]
            Self::WindowsClient(pipe) => {
                pipe.write_u32(len).await?;
                pipe.write_all(&data).await?;
            }
            #[cfg(windows)]
            Self::WindowsServer(pipe) => {
                pipe.write_u32(len).await?;
                pipe.write_all(&data).await?;
            }
        }
        Ok(())
    }

    async fn recv_frame<T: DeserializeOwned>(&mut self) -> Result<T> {
        match self {
            #[cfg(unix)]
            Self::Unix(stream) => {
                let len = stream.read_u32().await? as usize;
                let mut data = vec![0u8; len];
                stream.read_exact(&mut data).await?;
                Ok(bincode::deserialize(&data)?)
            }
            #[cfg(windows)]
            Self::WindowsClient(pipe) => {
                let len = pipe.read_u32().await? as usize;
                let mut data = vec![0u8; len];
                pipe.read_exact(&mut data).await?;
                Ok(bincode::deserialize(&data)?)
            }
            #[cfg(windows)]
            Self::WindowsServer(pipe) => {
                let len = pipe.read_u32().await? as usize;
                let mut data = vec![0u8; len];
                pipe.read_exact(&mut data).await?;
                Ok(bincode::deserialize(&data)?)
            }
        }
    }

    pub async fn send_host_message(&mut self, msg: &HostMessage) -> Result<()> {
        self.send_frame(msg).await
    }

    pub async fn recv_host_message(&mut self) -> Result<HostMessage> {
        self.recv_frame().await
    }

    pub async fn send_server_message(&mut self, msg: &ServerMessage) -> Result<()> {
        self.send_frame(msg).await
    }

    pub async fn recv_server_message(&mut self) -> Result<ServerMessage> {
        self.recv_frame().await
    }
}

/// Server-side listener.
pub struct TransportListener {
    #[cfg(unix)]
    listener: UnixListener,
    #[cfg(windows)]
    pipe_name: std::path::PathBuf,
}

impl TransportListener {
    #[cfg(unix)]
    pub async fn bind(path: &std::path::Path) -> Result<Self> {
        // Stale socket from a crashed previous run
        let _ = std::fs::remove_file(path);
        Ok(Self {
            listener: UnixListener::bind(path)?,
        })
    }

    #[cfg(windows)]
    pub async fn bind(path: &std::path::Path) -> Result<Self> {
        Ok(Self {
            pipe_name: path.to_path_buf(),
        })
    }

    #[cfg(unix)]
    pub async fn accept(&self) -> Result<MessageTransport> {
        let (stream, _) = self.listener.accept().await?;
        Ok(MessageTransport::Unix(stream))
    }

    #[cfg(windows)]
    pub async fn accept(&self) -> Result<MessageTransport> {
        let server = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&self.pipe_name)?;
        server.connect().await?;
        Ok(MessageTransport::WindowsServer(server))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipc-test.sock");
        let listener = TransportListener::bind(&path).await.unwrap();

        let client = tokio::spawn({
            let path = path.clone();
            async move {
                let mut transport = MessageTransport::connect(&path).await.unwrap();
                transport
                    .send_host_message(&HostMessage::SaveState)
                    .await
                    .unwrap();
                transport.recv_server_message().await.unwrap()
            }
        });

        let mut server_side = listener.accept().await.unwrap();
        let msg = server_side.recv_host_message().await.unwrap();
        assert!(matches!(msg, HostMessage::SaveState));
        server_side
            .send_server_message(&ServerMessage::State { data: vec![1, 2, 3] })
            .await
            .unwrap();

        let reply = client.await.unwrap();
        assert!(matches!(reply, ServerMessage::State { data } if data == vec![1, 2, 3]));
    }
}
