//! Client side of the daemon socket

use tokio::io::{ReadHalf, WriteHalf};

use crate::common::error::IpcError;
use crate::common::{Error, Result};

use super::protocol::{Command, ControllerEvent, Request, Response};
use super::transport::{self, Stream};

/// Connection to the storyrun daemon
pub struct DaemonClient {
    reader: ReadHalf<Stream>,
    writer: WriteHalf<Stream>,
    next_id: u64,
}

impl DaemonClient {
    /// Connect to the running daemon
    pub async fn connect() -> Result<Self> {
        let stream = transport::connect().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound
                || e.kind() == std::io::ErrorKind::ConnectionRefused
            {
                Error::DaemonNotRunning
            } else {
                Error::DaemonConnectionFailed(e)
            }
        })?;

        let (reader, writer) = tokio::io::split(stream);

        Ok(Self {
            reader,
            writer,
            next_id: 1,
        })
    }

    /// Send a command and wait for the response
    pub async fn send_command(&mut self, command: Command) -> Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;

        transport::send_json(&mut self.writer, &Request { id, command })
            .await
            .map_err(|e| Error::DaemonCommunication(e.to_string()))?;

        let response: Response = transport::recv_json(&mut self.reader)
            .await
            .map_err(|e| Error::DaemonCommunication(e.to_string()))?;

        if response.id != id {
            return Err(Error::DaemonCommunication(format!(
                "Response ID mismatch: expected {}, got {}",
                id, response.id
            )));
        }

        if response.success {
            Ok(response.result.unwrap_or(serde_json::json!({})))
        } else {
            let error = response.error.unwrap_or_else(|| IpcError {
                code: "UNKNOWN".to_string(),
                message: "Unknown error".to_string(),
            });
            Err(error.into())
        }
    }

    /// Turn this connection into an event stream
    ///
    /// Returns the snapshot current at subscription time; later events come
    /// from [`DaemonClient::next_event`].
    pub async fn subscribe(&mut self) -> Result<serde_json::Value> {
        self.send_command(Command::Subscribe).await
    }

    /// Next pushed event, or `None` once the daemon hangs up
    pub async fn next_event(&mut self) -> Result<Option<ControllerEvent>> {
        match transport::recv_json(&mut self.reader).await {
            Ok(event) => Ok(Some(event)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(Error::DaemonCommunication(e.to_string())),
        }
    }
}
