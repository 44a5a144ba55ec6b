// src/progress/mod.rs
// Progress channel - session-scoped streaming connection with reconnect

mod backoff;
mod endpoint;
#[cfg(test)]
pub(crate) mod mock;
mod transport;
mod types;

pub use backoff::{ReconnectPolicy, MAX_RECONNECT_ATTEMPTS};
pub use endpoint::ProgressEndpoint;
pub use transport::{Frame, ProgressConnection, ProgressTransport, WebSocketTransport};
pub use types::{
    ChannelError, ChannelEvent, ChannelEventKind, ChannelState, ProgressEvent, ProgressStatus,
    ABNORMAL_CLOSURE, NORMAL_CLOSURE, NO_STATUS_RECEIVED,
};

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const CLIENT_CLOSE_REASON: &str = "client closed";

/// Live, auto-recovering connection for one conversion session.
///
/// At most one worker task runs per channel. Opening a different session,
/// calling [`ProgressChannel::close`] or dropping the channel closes the
/// current connection with a normal closure, which never reconnects.
pub struct ProgressChannel {
    transport: Arc<dyn ProgressTransport>,
    endpoint: ProgressEndpoint,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ChannelState>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    worker: Option<Worker>,
}

struct Worker {
    session_id: String,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ProgressChannel {
    pub fn new(
        transport: Arc<dyn ProgressTransport>,
        endpoint: ProgressEndpoint,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChannelState::default());

        let channel = Self {
            transport,
            endpoint,
            policy,
            state: Arc::new(state),
            events,
            worker: None,
        };
        (channel, receiver)
    }

    /// Connect to `session_id`, replacing a connection for any other session
    pub async fn open(&mut self, session_id: &str) {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            tracing::debug!("Progress channel open skipped: empty session id");
            return;
        }

        if self.session_id() == Some(session_id) {
            return;
        }

        self.close().await;
        self.state.send_replace(ChannelState::default());
        self.spawn_worker(session_id.to_string());
    }

    /// Intentional close; suppresses any reconnect
    pub async fn close(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let _ = worker.shutdown.send(());
        if let Err(e) = worker.handle.await {
            if e.is_panic() {
                tracing::error!(
                    "Progress worker for session {} panicked",
                    worker.session_id
                );
            }
        }
        self.state.send_modify(|state| state.is_connected = false);
    }

    /// Manual escape hatch: reset the attempt counter and retry immediately.
    /// A session that already reported completed or failed stays closed.
    pub async fn reconnect(&mut self) {
        let Some(session_id) = self.session_id().map(str::to_string) else {
            return;
        };

        if self.state.borrow().session_complete {
            tracing::debug!(
                "Manual reconnect ignored: session {} already finished",
                session_id
            );
            return;
        }

        tracing::info!("Manual reconnect requested for session {}", session_id);
        self.close().await;
        self.state.send_modify(|state| {
            state.reconnect_attempt = 0;
            state.exhausted = false;
        });
        self.spawn_worker(session_id);
    }

    pub fn session_id(&self) -> Option<&str> {
        self.worker.as_ref().map(|w| w.session_id.as_str())
    }

    /// True while a worker is connecting, connected or waiting to reconnect
    pub fn is_open(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    fn spawn_worker(&mut self, session_id: String) {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let context = WorkerContext {
            url: self.endpoint.url_for(&session_id),
            session_id: session_id.clone(),
            transport: Arc::clone(&self.transport),
            policy: self.policy,
            state: Arc::clone(&self.state),
            events: self.events.clone(),
        };

        let handle = tokio::spawn(run_worker(context, shutdown_rx));
        self.worker = Some(Worker {
            session_id,
            shutdown,
            handle,
        });
    }
}

struct WorkerContext {
    session_id: String,
    url: String,
    transport: Arc<dyn ProgressTransport>,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ChannelState>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

enum ReadOutcome {
    Shutdown,
    Closed { code: u16, reason: String },
}

async fn run_worker(ctx: WorkerContext, mut shutdown: oneshot::Receiver<()>) {
    loop {
        tracing::debug!("Progress channel connecting: {}", ctx.url);

        let connected = tokio::select! {
            _ = &mut shutdown => return,
            result = ctx.transport.connect(&ctx.url) => result,
        };

        let (code, reason) = match connected {
            Ok(mut connection) => {
                ctx.on_open();
                match ctx.read_frames(connection.as_mut(), &mut shutdown).await {
                    ReadOutcome::Shutdown => {
                        connection.close(NORMAL_CLOSURE, CLIENT_CLOSE_REASON).await;
                        ctx.on_close(NORMAL_CLOSURE, CLIENT_CLOSE_REASON, false);
                        return;
                    }
                    ReadOutcome::Closed { code, reason } => (code, reason),
                }
            }
            Err(err) => {
                tracing::debug!("Progress channel error for session {}: {}", ctx.session_id, err);
                ctx.emit(ChannelEventKind::Error(err.to_string()));
                (ABNORMAL_CLOSURE, err.to_string())
            }
        };

        if code == NORMAL_CLOSURE || ctx.state.borrow().session_complete {
            ctx.on_close(code, &reason, false);
            return;
        }

        let attempt = ctx.state.borrow().reconnect_attempt;
        if !ctx.policy.should_retry(attempt) {
            ctx.on_close(code, &reason, false);
            ctx.on_exhausted(attempt);
            return;
        }

        let delay = ctx.policy.delay(attempt, &mut rand::thread_rng());
        ctx.on_close(code, &reason, true);
        ctx.state
            .send_modify(|state| state.reconnect_attempt = attempt + 1);
        tracing::debug!(
            "Progress channel reconnecting in {}ms (attempt {}/{})",
            delay.as_millis(),
            attempt + 1,
            ctx.policy.max_attempts()
        );
        ctx.emit(ChannelEventKind::ReconnectScheduled {
            attempt: attempt + 1,
            delay,
        });

        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

impl WorkerContext {
    async fn read_frames(
        &self,
        connection: &mut dyn ProgressConnection,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> ReadOutcome {
        loop {
            let frame = tokio::select! {
                _ = &mut *shutdown => return ReadOutcome::Shutdown,
                frame = connection.next_frame() => frame,
            };

            match frame {
                Frame::Text(raw) => self.on_message(&raw),
                Frame::Error(message) => {
                    tracing::debug!(
                        "Progress channel error for session {}: {}",
                        self.session_id,
                        message
                    );
                    self.emit(ChannelEventKind::Error(message));
                }
                Frame::Closed { code, reason } => return ReadOutcome::Closed { code, reason },
            }
        }
    }

    fn on_open(&self) {
        tracing::debug!("Progress channel connected: session={}", self.session_id);
        self.state.send_modify(|state| {
            state.is_connected = true;
            state.reconnect_attempt = 0;
            state.exhausted = false;
        });
        self.emit(ChannelEventKind::Connected);
    }

    fn on_message(&self, raw: &str) {
        let event = match ProgressEvent::decode(raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    "Dropping progress frame for session {}: {}",
                    self.session_id,
                    e
                );
                return;
            }
        };

        let terminal = event.is_terminal();
        let mut newly_complete = false;
        self.state.send_modify(|state| {
            newly_complete = terminal && !state.session_complete;
            state.session_complete |= terminal;
            state.last_progress = Some(event.clone());
        });
        if newly_complete {
            tracing::debug!(
                "Session {} reached {:?}, reconnect disabled",
                self.session_id,
                event.status
            );
        }
        self.emit(ChannelEventKind::Progress(event));
    }

    fn on_close(&self, code: u16, reason: &str, reconnect_scheduled: bool) {
        tracing::debug!(
            "Progress channel disconnected: session={}, code={}, reason={:?}",
            self.session_id,
            code,
            reason
        );
        self.state.send_modify(|state| state.is_connected = false);
        self.emit(ChannelEventKind::Disconnected {
            code,
            reason: reason.to_string(),
            reconnect_scheduled,
        });
    }

    fn on_exhausted(&self, attempts: u32) {
        tracing::warn!(
            "Progress channel for session {} gave up after {} reconnect attempts",
            self.session_id,
            attempts
        );
        self.state.send_modify(|state| state.exhausted = true);
        self.emit(ChannelEventKind::Exhausted { attempts });
    }

    fn emit(&self, kind: ChannelEventKind) {
        let _ = self.events.send(ChannelEvent {
            session_id: self.session_id.clone(),
            kind,
        });
    }
}
