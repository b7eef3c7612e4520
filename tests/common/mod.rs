//! Scriptable in-memory session engine for integration tests.
//!
//! The test side holds a [`FakeNet`] handle and scripts connect results,
//! inbound data, write outcomes, and remote closure; the worker side
//! drives the same shared state through the engine traits.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use relayterm::{
    AuthenticatedSession, ChannelRequest, ConnectedSession, Credential, Endpoint, EngineError,
    PromptHandler, SessionChannel, SessionEngine,
};

/// Scripted outcome of the blocking connect phase.
pub enum ConnectScript {
    Succeed,
    /// Sleep for the given duration, then fail with a timeout-class error.
    TimeoutAfter(Duration),
    /// Handshake succeeds but authentication is rejected.
    RejectAuth,
}

/// Scripted outcome of a single channel write attempt.
pub enum WriteScript {
    WouldBlock,
    Partial(usize),
    Fail,
}

enum Inbound {
    Data(Vec<u8>),
    Eof,
}

struct NetState {
    connect: Mutex<ConnectScript>,
    fail_channel_open: AtomicBool,
    readable: AtomicBool,
    incoming: Mutex<VecDeque<Inbound>>,
    written: Mutex<Vec<u8>>,
    write_plan: Mutex<VecDeque<WriteScript>>,
    blocking: AtomicBool,
    writes_blocked: AtomicBool,
    keepalives: AtomicUsize,
    channel_opens: AtomicUsize,
    write_attempts: AtomicUsize,
    resizes: Mutex<Vec<(u16, u16)>>,
}

/// Test-side control plane. Clones share the same state.
#[derive(Clone)]
pub struct FakeNet {
    state: Arc<NetState>,
}

impl FakeNet {
    pub fn new() -> (FakeEngine, FakeNet) {
        let state = Arc::new(NetState {
            connect: Mutex::new(ConnectScript::Succeed),
            fail_channel_open: AtomicBool::new(false),
            readable: AtomicBool::new(false),
            incoming: Mutex::new(VecDeque::new()),
            written: Mutex::new(Vec::new()),
            write_plan: Mutex::new(VecDeque::new()),
            blocking: AtomicBool::new(true),
            writes_blocked: AtomicBool::new(false),
            keepalives: AtomicUsize::new(0),
            channel_opens: AtomicUsize::new(0),
            write_attempts: AtomicUsize::new(0),
            resizes: Mutex::new(Vec::new()),
        });
        (
            FakeEngine {
                state: state.clone(),
            },
            FakeNet { state },
        )
    }

    pub fn script_connect(&self, script: ConnectScript) {
        *self.state.connect.lock() = script;
    }

    pub fn script_channel_open_failure(&self) {
        self.state.fail_channel_open.store(true, Ordering::SeqCst);
    }

    /// Queue inbound data and mark the socket readable.
    pub fn push_incoming(&self, data: &[u8]) {
        self.state.incoming.lock().push_back(Inbound::Data(data.to_vec()));
        self.state.readable.store(true, Ordering::SeqCst);
    }

    /// Close the remote side: the next read observes end of stream.
    pub fn close_remote(&self) {
        self.state.incoming.lock().push_back(Inbound::Eof);
        self.state.readable.store(true, Ordering::SeqCst);
    }

    /// Drop any queued inbound data and clear readability.
    pub fn drain_incoming(&self) {
        self.state.incoming.lock().clear();
        self.state.readable.store(false, Ordering::SeqCst);
    }

    /// Script the outcome of upcoming write attempts, in order. Attempts
    /// beyond the script succeed fully.
    pub fn script_writes(&self, outcomes: Vec<WriteScript>) {
        *self.state.write_plan.lock() = outcomes.into();
    }

    /// While set, every write attempt is refused with a would-block.
    pub fn block_writes(&self, blocked: bool) {
        self.state.writes_blocked.store(blocked, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.written.lock().clone()
    }

    pub fn keepalive_count(&self) -> usize {
        self.state.keepalives.load(Ordering::SeqCst)
    }

    pub fn channel_open_count(&self) -> usize {
        self.state.channel_opens.load(Ordering::SeqCst)
    }

    pub fn write_attempts(&self) -> usize {
        self.state.write_attempts.load(Ordering::SeqCst)
    }

    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.state.resizes.lock().clone()
    }

    pub fn is_blocking(&self) -> bool {
        self.state.blocking.load(Ordering::SeqCst)
    }
}

pub struct FakeEngine {
    state: Arc<NetState>,
}

impl SessionEngine for FakeEngine {
    type Connected = FakeConnected;
    type Authenticated = FakeSession;

    fn connect(
        &mut self,
        _endpoint: &Endpoint,
        _timeout: Duration,
    ) -> Result<FakeConnected, EngineError> {
        let scripted = {
            let script = self.state.connect.lock();
            match *script {
                ConnectScript::Succeed => Ok(false),
                ConnectScript::RejectAuth => Ok(true),
                ConnectScript::TimeoutAfter(delay) => Err(delay),
            }
        };
        match scripted {
            Ok(reject_auth) => Ok(FakeConnected {
                state: self.state.clone(),
                reject_auth,
            }),
            Err(delay) => {
                std::thread::sleep(delay);
                Err(EngineError::Timeout("endpoint unreachable".into()))
            }
        }
    }
}

pub struct FakeConnected {
    state: Arc<NetState>,
    reject_auth: bool,
}

impl ConnectedSession for FakeConnected {
    type Authenticated = FakeSession;

    fn authenticate(
        self,
        _credential: &dyn Credential,
        _prompts: &mut dyn PromptHandler,
    ) -> Result<FakeSession, EngineError> {
        if self.reject_auth {
            return Err(EngineError::Auth("permission denied".into()));
        }
        Ok(FakeSession { state: self.state })
    }
}

pub struct FakeSession {
    state: Arc<NetState>,
}

impl AuthenticatedSession for FakeSession {
    type Channel = FakeChannel;

    fn set_blocking(&self, blocking: bool) {
        self.state.blocking.store(blocking, Ordering::SeqCst);
    }

    fn is_blocking(&self) -> bool {
        self.state.blocking.load(Ordering::SeqCst)
    }

    fn poll_readable(&self, timeout: Duration) -> Result<bool, EngineError> {
        // Honor the poll contract: block up to `timeout` while nothing is
        // readable, so the loop stays paced like a real socket poll.
        if !self.state.readable.load(Ordering::SeqCst) {
            std::thread::sleep(timeout);
        }
        Ok(self.state.readable.load(Ordering::SeqCst))
    }

    fn configure_keepalive(&self, _interval: Duration) {}

    fn send_keepalive_if_due(&self) -> Result<(), EngineError> {
        self.state.keepalives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn open_channel(&self, _request: &ChannelRequest) -> Result<FakeChannel, EngineError> {
        if self.state.fail_channel_open.load(Ordering::SeqCst) {
            return Err(EngineError::ChannelOpen("administratively prohibited".into()));
        }
        self.state.channel_opens.fetch_add(1, Ordering::SeqCst);
        Ok(FakeChannel {
            state: self.state.clone(),
        })
    }
}

pub struct FakeChannel {
    state: Arc<NetState>,
}

impl SessionChannel for FakeChannel {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EngineError> {
        let mut incoming = self.state.incoming.lock();
        let next = incoming.pop_front();
        if incoming.is_empty() {
            self.state.readable.store(false, Ordering::SeqCst);
        }
        match next {
            Some(Inbound::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    incoming.push_front(Inbound::Data(data[n..].to_vec()));
                    self.state.readable.store(true, Ordering::SeqCst);
                }
                Ok(n)
            }
            Some(Inbound::Eof) => Ok(0),
            None => Err(EngineError::WouldBlock),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, EngineError> {
        self.state.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.state.writes_blocked.load(Ordering::SeqCst) {
            return Err(EngineError::WouldBlock);
        }
        match self.state.write_plan.lock().pop_front() {
            Some(WriteScript::WouldBlock) => Err(EngineError::WouldBlock),
            Some(WriteScript::Partial(n)) => {
                let n = n.min(buf.len());
                self.state.written.lock().extend_from_slice(&buf[..n]);
                Ok(n)
            }
            Some(WriteScript::Fail) => Err(EngineError::Channel("broken pipe".into())),
            None => {
                self.state.written.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
        }
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<(), EngineError> {
        self.state.resizes.lock().push((cols, rows));
        Ok(())
    }

    fn close(&mut self) {}
}

/// Install the test tracing subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Poll `predicate` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}
