//! Per-server connection lifecycle.
//!
//! A [`ConnectionManager`] moves through three states:
//!
//! ```text
//! Disconnected --start_connect_loop--> Connecting --dial ok--> Connected
//!      ^                                   |  ^                    |
//!      |                                   |  +-- retry every 15s  |
//!      +------------- close ---------------+-----------------------+
//! ```
//!
//! While connected, a read loop dispatches inbound envelopes through the
//! manager's [`EnvelopeRouter`] and a write loop drains the outbound queue.
//! More than [`CONSECUTIVE_ERROR_MAX`] transport errors in a row tear the
//! link down and start the connect loop again. Each connection attempt owns
//! a [`CancellationToken`]; `close` cancels it, which stops the retry loop
//! or both I/O loops.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mcbridge_core::{BridgeError, BridgeResult, Endpoint, Envelope, EnvelopeRouter, ServerStatus};

use crate::transport::{Dialer, FrameSink, FrameStream, Link};

/// Consecutive transport errors tolerated before a forced reconnect.
pub const CONSECUTIVE_ERROR_MAX: u32 = 5;

/// Delay between failed dial attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(15);

/// Capacity of the outbound envelope queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 40;

/// How long `shutdown` waits for the connection's tasks to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Message sent to a server right after a link comes up.
pub const CONNECTED_GREETING: &str = "Bridge: Successfully connected to server.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        })
    }
}

struct NetState {
    status: ConnectionStatus,
    error_count: u32,
    stop: Option<CancellationToken>,
    tasks: Vec<JoinHandle<()>>,
}

impl NetState {
    /// Move to Disconnected and hand back the token to cancel.
    fn close(&mut self) -> Option<CancellationToken> {
        self.status = ConnectionStatus::Disconnected;
        self.error_count = 0;
        self.stop.take()
    }
}

struct Inner {
    endpoint: Endpoint,
    name: RwLock<String>,
    dialer: Arc<dyn Dialer>,
    router: EnvelopeRouter,
    state: Mutex<NetState>,
    outbound_tx: mpsc::Sender<Envelope>,
    outbound_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Envelope>>>,
    last_status: Arc<Mutex<Option<ServerStatus>>>,
}

/// Handle to one server connection. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.endpoint)
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectionManager {
    /// Create a disconnected manager. Status snapshots received from the
    /// server are cached in addition to whatever `router` does with them.
    pub fn new(endpoint: Endpoint, name: String, dialer: Arc<dyn Dialer>, mut router: EnvelopeRouter) -> Self {
        let last_status = Arc::new(Mutex::new(None));
        let cache = Arc::clone(&last_status);
        router.on_status(move |status| {
            *cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(status.clone());
            Ok(())
        });

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                endpoint,
                name: RwLock::new(name),
                dialer,
                router,
                state: Mutex::new(NetState {
                    status: ConnectionStatus::Disconnected,
                    error_count: 0,
                    stop: None,
                    tasks: Vec::new(),
                }),
                outbound_tx,
                outbound_rx: Arc::new(tokio::sync::Mutex::new(outbound_rx)),
                last_status,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, NetState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut state = self.state();
        state.tasks.retain(|h| !h.is_finished());
        state.tasks.push(handle);
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn name(&self) -> String {
        self.inner.name.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn rename(&self, name: String) {
        *self.inner.name.write().unwrap_or_else(PoisonError::into_inner) = name;
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state().status
    }

    pub fn error_count(&self) -> u32 {
        self.state().error_count
    }

    /// Most recent status snapshot reported by the server.
    pub fn last_status(&self) -> Option<ServerStatus> {
        self.inner
            .last_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Queue an envelope for the write loop, waiting while the queue is full.
    ///
    /// Envelopes queued while disconnected are delivered after the next
    /// successful connect.
    pub async fn enqueue(&self, envelope: Envelope) -> BridgeResult<()> {
        self.inner
            .outbound_tx
            .send(envelope)
            .await
            .map_err(|_| BridgeError::Closed)
    }

    /// Queue an envelope without waiting. Fails if the queue is full.
    pub fn try_enqueue(&self, envelope: Envelope) -> BridgeResult<()> {
        self.inner.outbound_tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                BridgeError::Transport(format!("outbound queue full for {}", self.inner.endpoint))
            }
            mpsc::error::TrySendError::Closed(_) => BridgeError::Closed,
        })
    }

    /// Pop the oldest queued envelope, if the write loop is not holding the queue.
    #[cfg(test)]
    pub(crate) fn take_queued(&self) -> Option<Envelope> {
        self.inner.outbound_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Start dialing in the background. No-op unless disconnected.
    pub fn start_connect_loop(&self) {
        let stop = {
            let mut state = self.state();
            if state.status != ConnectionStatus::Disconnected {
                return;
            }
            begin_connecting(&mut state)
        };
        self.spawn_retry_loop(stop);
    }

    /// Run the retry loop for the attempt owning `stop`. A `close` that lands
    /// before the loop starts has already cancelled `stop`.
    fn spawn_retry_loop(&self, stop: CancellationToken) {
        info!(endpoint = %self.inner.endpoint, "starting connect loop");
        let this = self.clone();
        let handle = tokio::spawn(async move { this.retry_loop(stop).await });
        self.track(handle);
    }

    async fn retry_loop(self, stop: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            if stop.is_cancelled() || self.status() != ConnectionStatus::Connecting {
                break;
            }
            attempt += 1;
            match self.connect(&stop).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(
                        endpoint = %self.inner.endpoint,
                        attempt,
                        error = %e,
                        "connect failed, retrying in {}s",
                        RETRY_INTERVAL.as_secs()
                    );
                }
            }
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(RETRY_INTERVAL) => {}
            }
        }
    }

    /// One dial attempt. On success the I/O loops are running and the
    /// greeting is first in line on the wire.
    async fn connect(&self, stop: &CancellationToken) -> BridgeResult<()> {
        let link = tokio::select! {
            biased;
            _ = stop.cancelled() => return Err(BridgeError::Closed),
            link = self.inner.dialer.dial(&self.inner.endpoint) => link?,
        };

        {
            let mut state = self.state();
            if stop.is_cancelled() || state.status != ConnectionStatus::Connecting {
                debug!(endpoint = %self.inner.endpoint, "closed while dialing, dropping link");
                return Err(BridgeError::Closed);
            }
            state.status = ConnectionStatus::Connected;
            state.error_count = 0;
        }
        info!(endpoint = %self.inner.endpoint, name = %self.name(), "connected");

        let Link { sink, stream } = link;
        let reader = {
            let this = self.clone();
            let stop = stop.clone();
            tokio::spawn(async move { this.read_loop(stream, stop).await })
        };
        let writer = {
            let this = self.clone();
            let stop = stop.clone();
            let greeting = Envelope::chat(CONNECTED_GREETING);
            tokio::spawn(async move { this.write_loop(sink, stop, greeting).await })
        };
        self.track(reader);
        self.track(writer);
        Ok(())
    }

    async fn read_loop(self, mut stream: Box<dyn FrameStream>, stop: CancellationToken) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                frame = stream.recv() => frame,
            };
            match frame {
                Ok(text) => {
                    self.handle_error(None);
                    if let Err(e) = self.inner.router.handle_text(&text) {
                        self.handle_error(Some(&e));
                    }
                }
                Err(e) => self.handle_error(Some(&e)),
            }
        }
        debug!(endpoint = %self.inner.endpoint, "read loop stopped");
    }

    async fn write_loop(self, mut sink: Box<dyn FrameSink>, stop: CancellationToken, greeting: Envelope) {
        let result = tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            result = send_envelope(sink.as_mut(), &greeting) => result,
        };
        self.handle_error(result.as_ref().err());

        // A previous connection's writer holds the queue until it is cancelled.
        let queue = Arc::clone(&self.inner.outbound_rx);
        let mut queue = tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            queue = queue.lock_owned() => queue,
        };

        loop {
            let envelope = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                envelope = queue.recv() => envelope,
            };
            let Some(envelope) = envelope else { break };
            let result = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                result = send_envelope(sink.as_mut(), &envelope) => result,
            };
            self.handle_error(result.as_ref().err());
        }
        sink.close().await;
        debug!(endpoint = %self.inner.endpoint, "write loop stopped");
    }

    /// Record the outcome of one transport operation.
    ///
    /// Success resets the error counter. Once a connected link has failed
    /// more than [`CONSECUTIVE_ERROR_MAX`] times in a row it is closed and
    /// the connect loop restarted.
    pub fn handle_error(&self, err: Option<&BridgeError>) {
        let Some(err) = err else {
            self.state().error_count = 0;
            return;
        };

        // Tearing down and re-entering Connecting happen under one lock so a
        // concurrent `close` either precedes both or cancels the new attempt.
        let (count, reconnect) = {
            let mut state = self.state();
            state.error_count += 1;
            let count = state.error_count;
            let reconnect = if count > CONSECUTIVE_ERROR_MAX && state.status == ConnectionStatus::Connected {
                let old = state.close();
                Some((old, begin_connecting(&mut state)))
            } else {
                None
            };
            (count, reconnect)
        };
        warn!(endpoint = %self.inner.endpoint, error = %err, count, "transport error");

        if let Some((old, stop)) = reconnect {
            warn!(endpoint = %self.inner.endpoint, "too many consecutive errors, reconnecting");
            if let Some(token) = old {
                token.cancel();
            }
            self.spawn_retry_loop(stop);
        }
    }

    /// Stop the connection: cancel the retry loop or I/O loops and move to
    /// Disconnected. Safe to call repeatedly.
    pub fn close(&self) {
        let (was, token) = {
            let mut state = self.state();
            let was = state.status;
            (was, state.close())
        };
        if let Some(token) = token {
            token.cancel();
        }
        if was != ConnectionStatus::Disconnected {
            info!(endpoint = %self.inner.endpoint, "connection closed");
        }
    }

    /// Close and wait for background tasks to finish.
    pub async fn shutdown(&self) -> BridgeResult<()> {
        self.close();
        let tasks = std::mem::take(&mut self.state().tasks);
        let mut result = Ok(());
        for handle in tasks {
            let abort = handle.abort_handle();
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => {
                    result = Err(BridgeError::Transport(format!(
                        "{}: connection task failed: {e}",
                        self.inner.endpoint
                    )));
                }
                Err(_) => {
                    abort.abort();
                    result = Err(BridgeError::Transport(format!(
                        "{}: connection task did not stop in time",
                        self.inner.endpoint
                    )));
                }
            }
        }
        result
    }
}

/// Move to Connecting with a fresh token for the new attempt.
fn begin_connecting(state: &mut NetState) -> CancellationToken {
    state.status = ConnectionStatus::Connecting;
    let stop = CancellationToken::new();
    state.stop = Some(stop.clone());
    stop
}

async fn send_envelope(sink: &mut dyn FrameSink, envelope: &Envelope) -> BridgeResult<()> {
    let frame = envelope.encode()?;
    sink.send(frame).await
}
