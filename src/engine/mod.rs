//! Session engine boundary
//!
//! The cryptographic protocol engine is an external collaborator: this
//! module defines the traits the connection worker drives it through, and
//! nothing else. The three session phases are distinct owned handles -
//! connecting consumes nothing, authenticating consumes the connected
//! handle - so the protocol's irreversible phase ordering is enforced by
//! move semantics instead of runtime checks.
//!
//! An optional libssh2-backed implementation lives in [`libssh2`] behind
//! the `libssh2` cargo feature; the worker itself never depends on it.

#[cfg(feature = "libssh2")]
pub mod libssh2;

use std::time::Duration;

use crate::config::Endpoint;
use crate::credential::{Credential, PromptHandler};
use crate::error::EngineError;

/// Parameters for opening a channel on an authenticated session.
#[derive(Debug, Clone)]
pub enum ChannelRequest {
    /// Interactive shell with a pseudo-terminal.
    Shell {
        /// Terminal type, e.g. "xterm-256color"
        term: String,
        cols: u16,
        rows: u16,
    },

    /// Run a single command.
    Exec { command: String },

    /// Protocol subsystem, e.g. "sftp" for file transfer.
    Subsystem { name: String },
}

impl ChannelRequest {
    pub fn shell(term: impl Into<String>, cols: u16, rows: u16) -> Self {
        Self::Shell {
            term: term.into(),
            cols,
            rows,
        }
    }

    pub fn exec(command: impl Into<String>) -> Self {
        Self::Exec {
            command: command.into(),
        }
    }
}

/// Entry point of the engine boundary: performs the blocking TCP connect
/// and protocol handshake.
pub trait SessionEngine: Send + 'static {
    type Connected: ConnectedSession<Authenticated = Self::Authenticated>;
    type Authenticated: AuthenticatedSession;

    /// Blocking connect + handshake, bounded by `timeout`.
    fn connect(
        &mut self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Self::Connected, EngineError>;
}

/// Post-handshake, pre-authentication session handle.
pub trait ConnectedSession: Send {
    type Authenticated;

    /// Blocking authentication exchange. Consumes the handle; the session
    /// cannot return to the pre-auth phase.
    fn authenticate(
        self,
        credential: &dyn Credential,
        prompts: &mut dyn PromptHandler,
    ) -> Result<Self::Authenticated, EngineError>;
}

/// Fully authenticated session handle.
///
/// Not thread-safe by contract: all calls happen on the thread that owns
/// the worker loop.
pub trait AuthenticatedSession: Send {
    type Channel: SessionChannel;

    /// Switch the underlying socket between blocking and non-blocking
    /// mode. Prefer [`BlockingGuard`] over calling this directly so the
    /// prior mode is restored on every exit path.
    fn set_blocking(&self, blocking: bool);

    fn is_blocking(&self) -> bool;

    /// Wait up to `timeout` for the socket to become readable.
    fn poll_readable(&self, timeout: Duration) -> Result<bool, EngineError>;

    /// Arm protocol-level keepalives. Must not be called before the
    /// handshake has completed.
    fn configure_keepalive(&self, interval: Duration);

    /// Send a keepalive if one is due. The engine tracks the schedule and
    /// ignores the call otherwise.
    fn send_keepalive_if_due(&self) -> Result<(), EngineError>;

    /// Open a channel. Works best in blocking mode; the channel manager
    /// takes care of the mode switch.
    fn open_channel(&self, request: &ChannelRequest) -> Result<Self::Channel, EngineError>;
}

/// A multiplexed sub-stream of an authenticated session.
pub trait SessionChannel: Send {
    /// Read available bytes. `Ok(0)` signals end of stream;
    /// [`EngineError::WouldBlock`] means no data right now.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EngineError>;

    /// Write bytes, possibly partially. [`EngineError::WouldBlock`] means
    /// nothing could be written right now.
    fn write(&mut self, buf: &[u8]) -> Result<usize, EngineError>;

    /// Resize the pseudo-terminal. Only meaningful for shell channels.
    fn resize(&mut self, cols: u16, rows: u16) -> Result<(), EngineError>;

    /// Best-effort close. Called before the session handle is released.
    fn close(&mut self);
}

/// Scope guard that flips the session's blocking mode and restores the
/// prior mode on drop, whatever the exit path.
pub struct BlockingGuard<'a, S: AuthenticatedSession + ?Sized> {
    session: &'a S,
    restore: bool,
}

impl<'a, S: AuthenticatedSession + ?Sized> BlockingGuard<'a, S> {
    /// Put `session` into the requested mode until the guard is dropped.
    pub fn enter(session: &'a S, blocking: bool) -> Self {
        let restore = session.is_blocking();
        session.set_blocking(blocking);
        Self { session, restore }
    }
}

impl<S: AuthenticatedSession + ?Sized> Drop for BlockingGuard<'_, S> {
    fn drop(&mut self) {
        self.session.set_blocking(self.restore);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ModeOnly {
        blocking: AtomicBool,
    }

    struct NoChannel;

    impl SessionChannel for NoChannel {
        fn read(&mut self, _buf: &mut [u8]) -> Result<usize, EngineError> {
            Err(EngineError::WouldBlock)
        }
        fn write(&mut self, _buf: &[u8]) -> Result<usize, EngineError> {
            Err(EngineError::WouldBlock)
        }
        fn resize(&mut self, _cols: u16, _rows: u16) -> Result<(), EngineError> {
            Ok(())
        }
        fn close(&mut self) {}
    }

    impl AuthenticatedSession for ModeOnly {
        type Channel = NoChannel;

        fn set_blocking(&self, blocking: bool) {
            self.blocking.store(blocking, Ordering::SeqCst);
        }
        fn is_blocking(&self) -> bool {
            self.blocking.load(Ordering::SeqCst)
        }
        fn poll_readable(&self, _timeout: Duration) -> Result<bool, EngineError> {
            Ok(false)
        }
        fn configure_keepalive(&self, _interval: Duration) {}
        fn send_keepalive_if_due(&self) -> Result<(), EngineError> {
            Ok(())
        }
        fn open_channel(&self, _request: &ChannelRequest) -> Result<NoChannel, EngineError> {
            Ok(NoChannel)
        }
    }

    #[test]
    fn guard_restores_prior_mode() {
        let session = ModeOnly {
            blocking: AtomicBool::new(false),
        };
        {
            let _guard = BlockingGuard::enter(&session, true);
            assert!(session.is_blocking());
        }
        assert!(!session.is_blocking());
    }

    #[test]
    fn guard_restores_on_panic() {
        let session = ModeOnly {
            blocking: AtomicBool::new(false),
        };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = BlockingGuard::enter(&session, true);
            panic!("channel open failed");
        }));
        assert!(result.is_err());
        assert!(!session.is_blocking());
    }

    #[test]
    fn nested_guards_unwind_in_order() {
        let session = ModeOnly {
            blocking: AtomicBool::new(false),
        };
        {
            let _outer = BlockingGuard::enter(&session, true);
            {
                let _inner = BlockingGuard::enter(&session, false);
                assert!(!session.is_blocking());
            }
            assert!(session.is_blocking());
        }
        assert!(!session.is_blocking());
    }
}
