//! One-shot command execution
//!
//! Runs a single command over an exec channel using blocking I/O for the
//! whole exchange - no worker thread, no multiplex loop. Intended for
//! short administrative commands; interactive use belongs to
//! [`ShellWorker`](crate::worker::shell::ShellWorker).

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::Endpoint;
use crate::credential::{Credential, NoPrompts};
use crate::engine::{
    AuthenticatedSession, ChannelRequest, ConnectedSession, SessionChannel, SessionEngine,
};
use crate::error::WorkerError;
use crate::worker::READ_BUFFER_SIZE;

/// Connects, authenticates, runs one command, and collects its output.
pub struct CommandWorker<E: SessionEngine> {
    engine: E,
    endpoint: Endpoint,
    credential: Arc<dyn Credential>,
    command: String,
    timeout: Duration,
}

impl<E: SessionEngine> CommandWorker<E> {
    pub fn new(
        engine: E,
        endpoint: Endpoint,
        credential: Arc<dyn Credential>,
        command: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            engine,
            endpoint,
            credential,
            command: command.into(),
            timeout,
        }
    }

    /// Execute the command and return its combined output. Blocks the
    /// calling thread for the duration of the exchange.
    pub fn run(mut self) -> Result<String, WorkerError> {
        debug!(endpoint = %self.endpoint, command = %self.command, "running command");

        let connected = self
            .engine
            .connect(&self.endpoint, self.timeout)
            .map_err(WorkerError::Connection)?;
        let session = connected
            .authenticate(self.credential.as_ref(), &mut NoPrompts)
            .map_err(WorkerError::Connection)?;

        let mut channel = session
            .open_channel(&ChannelRequest::exec(self.command.clone()))
            .map_err(WorkerError::Connection)?;

        let mut output = Vec::new();
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match channel.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => output.extend_from_slice(&buf[..n]),
                // The session runs blocking here; tolerate engines that
                // still report a transient would-block.
                Err(e) if e.is_would_block() => continue,
                Err(e) => {
                    channel.close();
                    return Err(WorkerError::Receive(e));
                }
            }
        }

        channel.close();
        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}
