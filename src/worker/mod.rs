//! Connection worker
//!
//! One worker owns one protocol session end-to-end on a dedicated OS
//! thread: blocking connect + handshake + authentication, then a
//! non-blocking multiplex loop that interleaves inbound data, outbound
//! data, and keepalives until cancellation or a fatal I/O error.
//!
//! Callers interact with a live connection only through thread-safe
//! surfaces: [`ConnectionWorker::enqueue_send`] and
//! [`ConnectionWorker::cancel`]. Everything else - including every hook -
//! runs synchronously on the connection thread, so hooks must return
//! promptly; a slow hook stalls that connection's entire I/O loop.

mod channel;
pub mod exec;
pub mod shell;

pub use channel::ChannelManager;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::{Endpoint, WorkerConfig};
use crate::credential::{Credential, PromptHandler};
use crate::engine::{AuthenticatedSession, BlockingGuard, ConnectedSession, SessionEngine};
use crate::error::{EngineError, WorkerError};
use crate::queue::SendQueue;
use crate::rundown::RundownBarrier;

/// How long one loop iteration waits for socket readability. This is the
/// loop's only blocking point and bounds its latency.
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Cooperative yield while the channel is idle, to avoid a busy loop.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Receive buffer size for shell channels.
pub(crate) const READ_BUFFER_SIZE: usize = 4096;

/// Lifecycle of a connection worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Created, not yet started
    Idle,
    /// Blocking TCP connect + handshake in progress
    Connecting,
    /// Blocking authentication exchange in progress
    Authenticating,
    /// Non-blocking multiplex loop running
    Established,
    /// Loop exited, resources being released
    Draining,
    /// Connect or authentication failed; the loop never ran
    Failed,
    /// All resources released
    Closed,
}

/// Per-iteration operation classification, used to route I/O failures to
/// the matching error hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Sending,
    Receiving,
}

/// Capability set invoked by the worker on its connection thread.
///
/// The ready hooks drive actual channel I/O and return
/// [`EngineError::WouldBlock`] when the engine cannot make progress; the
/// loop swallows that and retries on the next iteration. Any other error
/// ends the connection.
pub struct WorkerHooks<E: SessionEngine> {
    pub(crate) connected: Box<dyn FnMut() + Send>,
    pub(crate) connection_error: Box<dyn FnMut(WorkerError) + Send>,
    pub(crate) send_error: Box<dyn FnMut(WorkerError) + Send>,
    pub(crate) receive_error: Box<dyn FnMut(WorkerError) + Send>,
    pub(crate) before_close: Box<dyn FnMut() + Send>,
    pub(crate) ready_to_send:
        Box<dyn FnMut(&E::Authenticated) -> Result<(), EngineError> + Send>,
    pub(crate) ready_to_receive:
        Box<dyn FnMut(&E::Authenticated) -> Result<(), EngineError> + Send>,
}

impl<E: SessionEngine> WorkerHooks<E> {
    /// All hooks default to no-ops.
    pub fn new() -> Self {
        Self {
            connected: Box::new(|| {}),
            connection_error: Box::new(|_| {}),
            send_error: Box::new(|_| {}),
            receive_error: Box::new(|_| {}),
            before_close: Box::new(|| {}),
            ready_to_send: Box::new(|_| Ok(())),
            ready_to_receive: Box::new(|_| Ok(())),
        }
    }

    /// Fires exactly once, after authentication succeeds and before the
    /// first ready hook.
    pub fn on_connected(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.connected = Box::new(f);
        self
    }

    /// Fires when the connection never reaches the established phase, or
    /// when a lazy channel open fails.
    pub fn on_connection_error(mut self, f: impl FnMut(WorkerError) + Send + 'static) -> Self {
        self.connection_error = Box::new(f);
        self
    }

    pub fn on_send_error(mut self, f: impl FnMut(WorkerError) + Send + 'static) -> Self {
        self.send_error = Box::new(f);
        self
    }

    pub fn on_receive_error(mut self, f: impl FnMut(WorkerError) + Send + 'static) -> Self {
        self.receive_error = Box::new(f);
        self
    }

    /// Fires while the session handle is still valid, so dependent
    /// channels can be torn down first.
    pub fn on_before_close(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.before_close = Box::new(f);
        self
    }

    /// Invoked on iterations where queued data is ready to go out.
    pub fn on_ready_to_send(
        mut self,
        f: impl FnMut(&E::Authenticated) -> Result<(), EngineError> + Send + 'static,
    ) -> Self {
        self.ready_to_send = Box::new(f);
        self
    }

    /// Invoked on iterations where the socket is readable. Expected to
    /// perform a bounded non-blocking read and return quickly.
    pub fn on_ready_to_receive(
        mut self,
        f: impl FnMut(&E::Authenticated) -> Result<(), EngineError> + Send + 'static,
    ) -> Self {
        self.ready_to_receive = Box::new(f);
        self
    }
}

impl<E: SessionEngine> Default for WorkerHooks<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between the worker handle and its connection thread.
struct Shared {
    state: Mutex<WorkerState>,
    cancelled: AtomicBool,
    queue: Arc<SendQueue>,
}

impl Shared {
    fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
    }
}

/// Everything the connection thread consumes when it starts.
struct Startup<E: SessionEngine> {
    engine: E,
    credential: Arc<dyn Credential>,
    prompts: Box<dyn PromptHandler>,
    hooks: WorkerHooks<E>,
}

/// A single logical connection: created once, started once, disposed
/// exactly once.
pub struct ConnectionWorker<E: SessionEngine> {
    id: String,
    endpoint: Endpoint,
    config: WorkerConfig,
    shared: Arc<Shared>,
    barrier: Arc<RundownBarrier>,
    startup: Option<Startup<E>>,
    thread: Option<JoinHandle<()>>,
    disposed: bool,
}

impl<E: SessionEngine> ConnectionWorker<E> {
    pub fn new(
        engine: E,
        endpoint: Endpoint,
        credential: Arc<dyn Credential>,
        prompts: Box<dyn PromptHandler>,
        hooks: WorkerHooks<E>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            endpoint,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(WorkerState::Idle),
                cancelled: AtomicBool::new(false),
                queue: Arc::new(SendQueue::new()),
            }),
            barrier: RundownBarrier::global(),
            startup: Some(Startup {
                engine,
                credential,
                prompts,
                hooks,
            }),
            thread: None,
            disposed: false,
        }
    }

    /// Replace the rundown barrier the worker registers with. Defaults to
    /// the process-global barrier.
    pub fn with_rundown(mut self, barrier: Arc<RundownBarrier>) -> Self {
        self.barrier = barrier;
        self
    }

    /// Replace the hook set. Fails once the worker has been started, since
    /// the hooks have moved to the connection thread by then.
    pub fn set_hooks(&mut self, hooks: WorkerHooks<E>) -> Result<(), WorkerError> {
        match self.startup {
            Some(ref mut startup) => {
                startup.hooks = hooks;
                Ok(())
            }
            None => Err(WorkerError::State(
                "hooks cannot be replaced after start".into(),
            )),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state.lock()
    }

    /// Whether the connection thread is up and cancellation has not been
    /// requested yet.
    pub fn is_connected(&self) -> bool {
        self.state() == WorkerState::Established && !self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Spawn the connection thread. Must only be called once.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        let startup = self
            .startup
            .take()
            .ok_or_else(|| WorkerError::State("worker already started".into()))?;

        let guard = self
            .barrier
            .acquire()
            .map_err(|e| WorkerError::State(e.to_string()))?;

        let shared = self.shared.clone();
        let endpoint = self.endpoint.clone();
        let config = self.config.clone();
        let id = self.id.clone();
        let name = format!(
            "ssh-worker-{}@{}",
            startup.credential.username(),
            self.endpoint
        );

        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                let _rundown = guard;
                run_connection(&id, &endpoint, &config, &shared, startup);
            })
            .map_err(|e| WorkerError::State(format!("failed to spawn connection thread: {e}")))?;

        self.thread = Some(handle);
        Ok(())
    }

    /// Append bytes to the outbound queue and wake the loop. Callable from
    /// any thread; never blocks.
    pub fn enqueue_send(&self, data: &[u8]) {
        self.shared.queue.enqueue(data);
    }

    /// Raise or clear the queue's ready signal without queueing data.
    pub fn notify_ready_to_send(&self, ready: bool) {
        self.shared.queue.set_ready(ready);
    }

    /// Handle to the outbound queue, for hook closures that drain it on
    /// the connection thread.
    pub fn queue(&self) -> Arc<SendQueue> {
        self.shared.queue.clone()
    }

    /// Bytes enqueued but not yet delivered to the channel.
    pub fn pending_send_bytes(&self) -> usize {
        self.shared.queue.len()
    }

    /// Request cooperative cancellation. Callable from any thread; the
    /// loop honors it before its next poll.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
    }

    /// Cancel and, unless configured otherwise, join the connection
    /// thread. Safe to call more than once. Joining from the connection
    /// thread itself is programmer error; it is detected and skipped
    /// rather than deadlocking.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        self.cancel();

        if let Some(handle) = self.thread.take() {
            if !self.config.join_on_dispose {
                debug!(worker = %self.id, "dispose without join");
            } else if handle.thread().id() == std::thread::current().id() {
                debug_assert!(false, "dispose must not join from the connection thread");
                error!(
                    worker = %self.id,
                    "dispose called on the connection thread; skipping join to avoid deadlock"
                );
            } else if handle.join().is_err() {
                error!(worker = %self.id, "connection thread panicked");
            }
        } else {
            // Never started: nothing to unwind.
            self.shared.set_state(WorkerState::Closed);
        }
    }
}

impl<E: SessionEngine> Drop for ConnectionWorker<E> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Body of the connection thread.
fn run_connection<E: SessionEngine>(
    id: &str,
    endpoint: &Endpoint,
    config: &WorkerConfig,
    shared: &Shared,
    startup: Startup<E>,
) {
    let Startup {
        mut engine,
        credential,
        mut prompts,
        mut hooks,
    } = startup;

    info!(worker = %id, endpoint = %endpoint, "connecting");
    shared.set_state(WorkerState::Connecting);

    let connected = match engine.connect(endpoint, config.connection_timeout()) {
        Ok(session) => session,
        Err(e) => {
            error!(worker = %id, error = %e, "connect failed");
            shared.set_state(WorkerState::Failed);
            (hooks.connection_error)(WorkerError::Connection(e));
            shared.set_state(WorkerState::Closed);
            return;
        }
    };

    shared.set_state(WorkerState::Authenticating);

    let session = match connected.authenticate(credential.as_ref(), prompts.as_mut()) {
        Ok(session) => session,
        Err(e) => {
            // Not distinguished from transport failures at this layer:
            // the connection never became usable.
            error!(worker = %id, error = %e, "authentication failed");
            shared.set_state(WorkerState::Failed);
            (hooks.connection_error)(WorkerError::Connection(e));
            shared.set_state(WorkerState::Closed);
            return;
        }
    };

    shared.set_state(WorkerState::Established);

    {
        // The loop runs non-blocking; teardown below the guard reverts to
        // blocking I/O while the session handle is still valid.
        let _non_blocking = BlockingGuard::enter(&session, false);

        (hooks.connected)();
        session.configure_keepalive(config.keep_alive_interval());

        info!(worker = %id, "established");

        let failure = multiplex_loop(config, shared, &session, &mut hooks);

        shared.set_state(WorkerState::Draining);

        if let Some((operation, e)) = failure {
            error!(worker = %id, error = %e, "socket I/O failed");
            route_error(&mut hooks, operation, e);
        } else {
            debug!(worker = %id, "loop cancelled");
        }

        (hooks.before_close)();
    }

    // Session handle released here, after the before-close hook.
    drop(session);
    shared.set_state(WorkerState::Closed);
    info!(worker = %id, "closed");
}

/// Runs until cancellation (returns `None`) or a fatal I/O error (returns
/// the failed operation and its cause).
fn multiplex_loop<E: SessionEngine>(
    config: &WorkerConfig,
    shared: &Shared,
    session: &E::Authenticated,
    hooks: &mut WorkerHooks<E>,
) -> Option<(Operation, EngineError)> {
    let keepalive_check_interval = config.keepalive_check_interval();
    let mut last_keepalive_check = Instant::now();

    while !shared.cancelled.load(Ordering::SeqCst) {
        // In each iteration, wait for (data received on socket) OR (user
        // data to send); treat the channel as idle when neither holds.
        let readable = match session.poll_readable(POLL_TIMEOUT) {
            Ok(readable) => readable,
            Err(e) if e.is_would_block() => false,
            Err(e) => return Some((Operation::Receiving, e)),
        };
        let send_requested = shared.queue.is_ready();
        let mut activity = false;

        if readable {
            activity = true;
            if let Err(e) = (hooks.ready_to_receive)(session) {
                if !e.is_would_block() {
                    return Some((Operation::Receiving, e));
                }
            }
        }

        if send_requested {
            activity = true;
            if let Err(e) = (hooks.ready_to_send)(session) {
                if !e.is_would_block() {
                    return Some((Operation::Sending, e));
                }
            }
        }

        if !activity {
            // Idle: ask the engine for a keepalive at the check cadence.
            // The engine ignores the call if none is due yet.
            if last_keepalive_check.elapsed() >= keepalive_check_interval {
                match session.send_keepalive_if_due() {
                    Ok(()) => {}
                    Err(e) if e.is_would_block() => {}
                    Err(e) => return Some((Operation::Sending, e)),
                }
                last_keepalive_check = Instant::now();
            }

            std::thread::sleep(IDLE_SLEEP);
        }
    }

    None
}

/// One I/O error ends the connection; route it to the hook matching the
/// operation that was in flight. A failed lazy channel open counts as a
/// connection failure, not a send/receive failure.
fn route_error<E: SessionEngine>(
    hooks: &mut WorkerHooks<E>,
    operation: Operation,
    error: EngineError,
) {
    if matches!(error, EngineError::ChannelOpen(_)) {
        (hooks.connection_error)(WorkerError::Connection(error));
        return;
    }
    match operation {
        Operation::Sending => (hooks.send_error)(WorkerError::Send(error)),
        Operation::Receiving => (hooks.receive_error)(WorkerError::Receive(error)),
    }
}
