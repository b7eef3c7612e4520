//! Interactive shell worker
//!
//! Wires a [`ConnectionWorker`] to a lazily opened shell channel, the
//! outbound queue, resize routing, and an event stream for the embedding
//! layer. Events are delivered over an unbounded channel so the
//! connection thread never blocks on a slow consumer.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::{Endpoint, WorkerConfig};
use crate::credential::{Credential, PromptHandler};
use crate::engine::{ChannelRequest, SessionChannel, SessionEngine};
use crate::error::{EngineError, WorkerError};
use crate::rundown::RundownBarrier;
use crate::worker::{ChannelManager, ConnectionWorker, WorkerHooks, WorkerState, READ_BUFFER_SIZE};

/// Shell channel parameters.
#[derive(Debug, Clone)]
pub struct ShellParams {
    /// Terminal type, e.g. "xterm-256color"
    pub term: String,
    pub cols: u16,
    pub rows: u16,
}

impl Default for ShellParams {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

/// Events emitted by a shell worker, in connection-thread order.
#[derive(Debug)]
pub enum ShellEvent {
    /// Fired exactly once, before any data event.
    Connected,
    /// Data received from the remote shell.
    Data(Bytes),
    /// The connection never became usable, or a channel open failed.
    ConnectionError(WorkerError),
    SendError(WorkerError),
    ReceiveError(WorkerError),
    /// The session is closing; no further events follow.
    Closed,
}

/// An interactive remote shell over one connection worker.
pub struct ShellWorker<E: SessionEngine> {
    worker: ConnectionWorker<E>,
    pending_resize: Arc<Mutex<Option<(u16, u16)>>>,
    events: Option<mpsc::UnboundedReceiver<ShellEvent>>,
}

impl<E: SessionEngine> ShellWorker<E> {
    pub fn new(
        engine: E,
        endpoint: Endpoint,
        credential: Arc<dyn Credential>,
        prompts: Box<dyn PromptHandler>,
        params: ShellParams,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending_resize: Arc<Mutex<Option<(u16, u16)>>> = Arc::new(Mutex::new(None));

        let mut worker = ConnectionWorker::new(
            engine,
            endpoint,
            credential,
            prompts,
            WorkerHooks::new(),
            config,
        );

        let queue = worker.queue();
        let manager = Arc::new(Mutex::new(ChannelManager::<E>::new(ChannelRequest::shell(
            params.term.clone(),
            params.cols,
            params.rows,
        ))));

        let hooks = {
            let connected_tx = event_tx.clone();
            let connected_queue = queue.clone();
            let conn_err_tx = event_tx.clone();
            let send_err_tx = event_tx.clone();
            let recv_err_tx = event_tx.clone();
            let close_tx = event_tx.clone();
            let close_manager = manager.clone();
            let recv_manager = manager.clone();
            let recv_tx = event_tx;
            let send_manager = manager;
            let send_queue = queue;
            let send_resize = pending_resize.clone();

            WorkerHooks::new()
                .on_connected(move || {
                    // Force a send iteration so the channel opens right
                    // away instead of on the first keystroke.
                    connected_queue.set_ready(true);
                    let _ = connected_tx.send(ShellEvent::Connected);
                })
                .on_connection_error(move |e| {
                    let _ = conn_err_tx.send(ShellEvent::ConnectionError(e));
                })
                .on_send_error(move |e| {
                    let _ = send_err_tx.send(ShellEvent::SendError(e));
                })
                .on_receive_error(move |e| {
                    let _ = recv_err_tx.send(ShellEvent::ReceiveError(e));
                })
                .on_ready_to_receive(move |session| {
                    let mut manager = recv_manager.lock();
                    let channel = manager.ensure_open(session)?;

                    let mut buf = [0u8; READ_BUFFER_SIZE];
                    match channel.read(&mut buf) {
                        // A readable channel that yields no bytes has hit
                        // end of stream; surface it instead of spinning.
                        Ok(0) => Err(EngineError::Disconnected),
                        Ok(n) => {
                            let _ = recv_tx.send(ShellEvent::Data(Bytes::copy_from_slice(
                                &buf[..n],
                            )));
                            Ok(())
                        }
                        Err(e) if e.is_would_block() => Ok(()),
                        Err(e) => Err(e),
                    }
                })
                .on_ready_to_send(move |session| {
                    let mut manager = send_manager.lock();
                    let channel = manager.ensure_open(session)?;

                    if let Some((cols, rows)) = send_resize.lock().take() {
                        if let Err(e) = channel.resize(cols, rows) {
                            warn!(error = %e, "terminal resize failed");
                        }
                    }

                    let data = send_queue.drain_all();
                    let mut offset = 0;
                    while offset < data.len() {
                        match channel.write(&data[offset..]) {
                            Ok(0) => break,
                            Ok(n) => offset += n,
                            Err(e) if e.is_would_block() => break,
                            Err(e) => {
                                // Undelivered bytes stay queued for the
                                // embedder to inspect; the connection is
                                // over either way.
                                send_queue.requeue_front(&data[offset..]);
                                return Err(e);
                            }
                        }
                    }

                    if offset < data.len() {
                        // Partial or refused write: keep the remainder at
                        // the front so delivery order is preserved.
                        send_queue.requeue_front(&data[offset..]);
                    } else {
                        send_queue.reset_if_idle();
                    }
                    Ok(())
                })
                .on_before_close(move || {
                    close_manager.lock().close();
                    let _ = close_tx.send(ShellEvent::Closed);
                })
        };

        // The worker has not started yet, so this cannot fail.
        let _ = worker.set_hooks(hooks);

        Self {
            worker,
            pending_resize,
            events: Some(event_rx),
        }
    }

    /// Replace the rundown barrier before starting. Defaults to the
    /// process-global barrier.
    pub fn with_rundown(mut self, barrier: Arc<RundownBarrier>) -> Self {
        self.worker = self.worker.with_rundown(barrier);
        self
    }

    /// Spawn the connection thread. Must only be called once.
    pub fn connect(&mut self) -> Result<(), WorkerError> {
        self.worker.start()
    }

    /// Queue bytes for the remote shell's stdin. Callable from any
    /// thread; never blocks.
    pub fn send(&self, data: &[u8]) {
        self.worker.enqueue_send(data);
    }

    /// Request a pseudo-terminal resize. Applied on the connection thread
    /// at the next send opportunity; only meaningful once the shell
    /// channel exists.
    pub fn request_resize(&self, cols: u16, rows: u16) {
        *self.pending_resize.lock() = Some((cols, rows));
        self.worker.notify_ready_to_send(true);
    }

    /// Bytes enqueued but not yet delivered to the remote shell.
    pub fn pending_send_bytes(&self) -> usize {
        self.worker.pending_send_bytes()
    }

    /// Take the event stream. Yields `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ShellEvent>> {
        self.events.take()
    }

    pub fn id(&self) -> &str {
        self.worker.id()
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn is_connected(&self) -> bool {
        self.worker.is_connected()
    }

    /// Request cooperative cancellation without waiting for the thread.
    pub fn cancel(&self) {
        self.worker.cancel();
    }

    /// Cancel and (by default) join the connection thread. Idempotent.
    pub fn dispose(&mut self) {
        self.worker.dispose();
    }
}
