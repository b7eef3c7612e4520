//! relayterm - SSH connection worker core for relay-tunneled terminal
//! clients
//!
//! This crate owns the hard part of an interactive SSH client: the
//! per-connection worker that performs a blocking handshake, then runs a
//! non-blocking full-duplex multiplex loop interleaving inbound data,
//! outbound data, periodic keepalives, and cooperative cancellation -
//! while the embedding application pushes bytes in and receives bytes out
//! without ever blocking its own threads.
//!
//! # Features
//! - Dedicated connection thread per worker with an explicit lifecycle
//!   state machine
//! - Lock-free caller surface: enqueue and cancel never block
//! - Lazy shell/exec/subsystem channel opening with scoped blocking-mode
//!   switches
//! - Keepalive scheduling on idle connections
//! - Process-wide rundown barrier for synchronized shutdown
//! - Engine-agnostic: the protocol engine is consumed through traits; an
//!   optional libssh2 adapter ships behind the `libssh2` feature
//!
//! The TCP relay that makes the remote host reachable is an external
//! collaborator: workers are handed the tunnel's local [`Endpoint`] and
//! never know about the relay itself.

pub mod config;
pub mod credential;
pub mod engine;
pub mod error;
pub mod queue;
pub mod rundown;
pub mod worker;

pub use config::{Endpoint, WorkerConfig};
pub use credential::{
    AuthSecret, Credential, InteractiveCredential, KeyFileCredential, NoPrompts,
    PasswordCredential, Prompt, PromptHandler,
};
pub use engine::{
    AuthenticatedSession, BlockingGuard, ChannelRequest, ConnectedSession, SessionChannel,
    SessionEngine,
};
pub use error::{EngineError, WorkerError};
pub use queue::SendQueue;
pub use rundown::{wait_for_all_workers_quiesced, RundownBarrier, RundownError, RundownGuard};
pub use worker::exec::CommandWorker;
pub use worker::shell::{ShellEvent, ShellParams, ShellWorker};
pub use worker::{ChannelManager, ConnectionWorker, WorkerHooks, WorkerState};
