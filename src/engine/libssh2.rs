//! libssh2-backed session engine
//!
//! Implements the engine boundary on top of the `ssh2` crate. Enabled by
//! the `libssh2` cargo feature; the worker core never depends on this
//! module.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::config::Endpoint;
use crate::credential::{AuthSecret, Credential, Prompt, PromptHandler};
use crate::engine::{
    AuthenticatedSession, ChannelRequest, ConnectedSession, SessionChannel, SessionEngine,
};
use crate::error::EngineError;

/// libssh2's EAGAIN, the non-blocking retry signal.
const LIBSSH2_ERROR_EAGAIN: i32 = -37;

fn map_ssh2(err: ssh2::Error) -> EngineError {
    match err.code() {
        ssh2::ErrorCode::Session(LIBSSH2_ERROR_EAGAIN) => EngineError::WouldBlock,
        _ => EngineError::Protocol(err.to_string()),
    }
}

/// Session engine backed by libssh2.
pub struct Libssh2Engine;

impl Libssh2Engine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Libssh2Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionEngine for Libssh2Engine {
    type Connected = Libssh2Connected;
    type Authenticated = Libssh2Session;

    fn connect(
        &mut self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Libssh2Connected, EngineError> {
        let addr = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(EngineError::from_io)?
            .next()
            .ok_or_else(|| EngineError::Protocol(format!("no addresses for {endpoint}")))?;

        debug!(%endpoint, "connecting via libssh2");

        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(EngineError::from_io)?;
        // The probe shares the session's file descriptor and is used only
        // for readability polling.
        let probe = stream.try_clone().map_err(EngineError::from_io)?;

        let mut session = ssh2::Session::new().map_err(map_ssh2)?;
        session.set_timeout(timeout.as_millis() as u32);
        session.set_tcp_stream(stream);
        session
            .handshake()
            .map_err(|e| EngineError::Handshake(e.to_string()))?;

        Ok(Libssh2Connected { session, probe })
    }
}

/// Post-handshake libssh2 session.
pub struct Libssh2Connected {
    session: ssh2::Session,
    probe: TcpStream,
}

impl ConnectedSession for Libssh2Connected {
    type Authenticated = Libssh2Session;

    fn authenticate(
        self,
        credential: &dyn Credential,
        prompts: &mut dyn PromptHandler,
    ) -> Result<Libssh2Session, EngineError> {
        let username = credential.username();

        match credential.secret() {
            AuthSecret::Password(password) => self
                .session
                .userauth_password(username, password)
                .map_err(|e| EngineError::Auth(e.to_string()))?,
            AuthSecret::PrivateKeyFile { path, passphrase } => self
                .session
                .userauth_pubkey_file(username, None, path, passphrase)
                .map_err(|e| EngineError::Auth(e.to_string()))?,
            AuthSecret::KeyboardInteractive => {
                let mut bridge = PromptBridge {
                    handler: prompts,
                    error: None,
                };
                self.session
                    .userauth_keyboard_interactive(username, &mut bridge)
                    .map_err(|e| EngineError::Auth(e.to_string()))?;
                if let Some(e) = bridge.error {
                    return Err(e);
                }
            }
        }

        if !self.session.authenticated() {
            return Err(EngineError::Auth(
                "authentication rejected by server".to_string(),
            ));
        }

        Ok(Libssh2Session {
            session: self.session,
            probe: self.probe,
        })
    }
}

/// Adapts a [`PromptHandler`] to libssh2's keyboard-interactive callback,
/// which cannot return an error itself.
struct PromptBridge<'a> {
    handler: &'a mut dyn PromptHandler,
    error: Option<EngineError>,
}

impl ssh2::KeyboardInteractivePrompt for PromptBridge<'_> {
    fn prompt<'a>(
        &mut self,
        username: &str,
        instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        let mapped: Vec<Prompt> = prompts
            .iter()
            .map(|p| Prompt {
                text: p.text.to_string(),
                echo: p.echo,
            })
            .collect();

        match self.handler.respond(username, instructions, &mapped) {
            Ok(responses) => responses,
            Err(e) => {
                // Empty responses make the server reject the attempt; the
                // recorded error is surfaced after the auth call returns.
                self.error = Some(e);
                Vec::new()
            }
        }
    }
}

/// Fully authenticated libssh2 session.
pub struct Libssh2Session {
    session: ssh2::Session,
    probe: TcpStream,
}

impl AuthenticatedSession for Libssh2Session {
    type Channel = Libssh2Channel;

    fn set_blocking(&self, blocking: bool) {
        self.session.set_blocking(blocking);
    }

    fn is_blocking(&self) -> bool {
        self.session.is_blocking()
    }

    fn poll_readable(&self, timeout: Duration) -> Result<bool, EngineError> {
        // While the session is non-blocking the shared descriptor makes
        // the peek return immediately; the worker's idle sleep provides
        // the pacing in that case.
        self.probe
            .set_read_timeout(Some(timeout))
            .map_err(EngineError::from_io)?;

        let mut byte = [0u8; 1];
        match self.probe.peek(&mut byte) {
            // Zero bytes means end of stream: report readable so the read
            // path observes the close.
            Ok(_) => Ok(true),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(false)
            }
            Err(e) => Err(EngineError::Io(e)),
        }
    }

    fn configure_keepalive(&self, interval: Duration) {
        self.session
            .set_keepalive(false, interval.as_secs().max(1) as u32);
    }

    fn send_keepalive_if_due(&self) -> Result<(), EngineError> {
        self.session.keepalive_send().map(|_| ()).map_err(map_ssh2)
    }

    fn open_channel(&self, request: &ChannelRequest) -> Result<Libssh2Channel, EngineError> {
        let open_err = |e: ssh2::Error| EngineError::ChannelOpen(e.to_string());

        let mut channel = self.session.channel_session().map_err(open_err)?;
        match request {
            ChannelRequest::Shell { term, cols, rows } => {
                channel
                    .request_pty(term, None, Some((*cols as u32, *rows as u32, 0, 0)))
                    .map_err(open_err)?;
                channel.shell().map_err(open_err)?;
            }
            ChannelRequest::Exec { command } => channel.exec(command).map_err(open_err)?,
            ChannelRequest::Subsystem { name } => channel.subsystem(name).map_err(open_err)?,
        }

        Ok(Libssh2Channel { channel })
    }
}

/// A libssh2 channel; read/write surface would-block as
/// [`EngineError::WouldBlock`].
pub struct Libssh2Channel {
    channel: ssh2::Channel,
}

impl SessionChannel for Libssh2Channel {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        self.channel.read(buf).map_err(EngineError::from_io)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, EngineError> {
        self.channel.write(buf).map_err(EngineError::from_io)
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<(), EngineError> {
        self.channel
            .request_pty_size(cols as u32, rows as u32, None, None)
            .map_err(|e| EngineError::Channel(e.to_string()))
    }

    fn close(&mut self) {
        let _ = self.channel.send_eof();
        let _ = self.channel.close();
    }
}
