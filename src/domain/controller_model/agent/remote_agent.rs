use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::domain::controller_model::agent::codec::AgentCodec;
use crate::domain::controller_model::agent::command::{Command, CommandFailure, CommandResult};
use crate::domain::controller_model::agent::dispatcher::DeviceAgent;
use crate::domain::controller_model::agent::protocol::{CommandEnvelope, ResponseEnvelope};
use crate::domain::controller_model::utils::id::AgentId;
use crate::error::{Error, Result};

/// Agent running in another process, reached over TCP. The connection is opened lazily and
/// re-opened after any transport error.
#[derive(Debug)]
pub struct RemoteAgent {
    id: AgentId,
    address: String,
    io_timeout: Duration,
    stream: Option<TcpStream>,
    buffer: BytesMut,
}

impl RemoteAgent {
    pub fn new(id: AgentId, address: impl Into<String>, io_timeout: Duration) -> Self {
        RemoteAgent { id, address: address.into(), io_timeout, stream: None, buffer: BytesMut::new() }
    }

    fn connect(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect(&self.address)?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;
        stream.set_nodelay(true)?;
        log::info!("Connected to agent {} at {}.", self.id, self.address);
        Ok(stream)
    }

    fn exchange(&mut self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        if self.stream.is_none() {
            self.stream = Some(self.connect()?);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::Protocol(format!("no connection to {}", self.address)));
        };

        let mut frame = BytesMut::new();
        AgentCodec::<CommandEnvelope>::new().encode(envelope, &mut frame)?;
        stream.write_all(&frame)?;

        let mut decoder = AgentCodec::<ResponseEnvelope>::new();
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(response) = decoder.decode(&mut self.buffer)? {
                return Ok(response);
            }
            let read = stream.read(&mut chunk)?;
            if read == 0 {
                return Err(Error::Protocol(format!("agent at {} closed the connection", self.address)));
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }
}

impl DeviceAgent for RemoteAgent {
    fn id(&self) -> AgentId {
        self.id.clone()
    }

    fn handle(&mut self, command: Command) -> CommandResult {
        let name = command.name();
        match self.exchange(CommandEnvelope::new(self.id.clone(), command)) {
            Ok(response) => response.into_result(),
            Err(Error::IoError(e)) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                self.stream = None;
                self.buffer.clear();
                CommandResult::Timeout
            }
            Err(e) => {
                log::error!("Command '{}' to remote agent {} failed: {}", name, self.id, e);
                self.stream = None;
                self.buffer.clear();
                CommandResult::failure(format!("connection to agent failed: {}", e))
            }
        }
    }
}

/// Serves `agent` to controllers connecting on `listener` until `cancel` fires. Connections are
/// handled one after another, commands in the order they arrive.
pub async fn serve_agent(listener: TcpListener, agent: Box<dyn DeviceAgent>, cancel: CancellationToken) -> Result<()> {
    let agent = Arc::new(Mutex::new(agent));

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        log::info!("Controller connected from {}.", peer);

        let (read_half, write_half) = stream.into_split();
        let mut requests = FramedRead::new(read_half, AgentCodec::<CommandEnvelope>::new());
        let mut responses = FramedWrite::new(write_half, AgentCodec::<ResponseEnvelope>::new());

        loop {
            let envelope = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = requests.next() => match frame {
                    Some(Ok(envelope)) => envelope,
                    Some(Err(e)) => {
                        log::error!("Codec error: {}", e);
                        break;
                    }
                    None => break,
                },
            };

            let agent = agent.clone();
            let response = tokio::task::spawn_blocking(move || perform(&agent, envelope))
                .await
                .map_err(|e| Error::Protocol(e.to_string()))?;
            if let Err(e) = responses.send(response).await {
                log::error!("Failed to answer controller {}: {}", peer, e);
                break;
            }
        }
        log::info!("Controller {} disconnected.", peer);
    }
}

fn perform(agent: &Mutex<Box<dyn DeviceAgent>>, envelope: CommandEnvelope) -> ResponseEnvelope {
    let mut agent = match agent.lock() {
        Ok(agent) => agent,
        Err(poisoned) => poisoned.into_inner(),
    };
    if envelope.target_agent_id != agent.id() {
        return ResponseEnvelope::failure(CommandFailure::new(format!("unknown agent '{}'", envelope.target_agent_id)));
    }
    ResponseEnvelope::from(agent.handle(envelope.command))
}
