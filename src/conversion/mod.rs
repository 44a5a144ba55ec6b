// src/conversion/mod.rs
// Conversion session controller - drives one submission to a terminal state

mod api;
mod errors;
mod request;
mod response;
mod status;

pub use api::{ConversionApi, HttpConversionApi};
pub use errors::{ConversionError, ErrorCategory, ErrorReport};
pub use request::{
    ConversionOptions, ConversionRequest, MediaType, UploadFile, UploadProgressFn, UploadTracker,
};
pub use response::{terminal_status, BatchResponse, BatchResult, ConversionResponse, SubmitOutcome};
pub use status::{BatchSummary, ConversionStatus, SessionSnapshot};

use crate::config::{ClientConfig, ConfigError};
use crate::progress::{
    ChannelEvent, ProgressChannel, ProgressEndpoint, ProgressTransport, ReconnectPolicy,
    WebSocketTransport,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Owns at most one live progress channel and publishes a [`SessionSnapshot`].
///
/// Every submission and reset stamps a new generation. Updates carrying an
/// older generation are dropped inside the watch update, so results of a
/// superseded submission or messages from a torn-down channel never reach
/// the published state.
#[derive(Clone)]
pub struct ConversionController {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn ConversionApi>,
    transport: Arc<dyn ProgressTransport>,
    endpoint: ProgressEndpoint,
    policy: ReconnectPolicy,
    snapshot: watch::Sender<SessionSnapshot>,
    generation: AtomicU64,
    active: Mutex<Option<ActiveSession>>,
}

struct ActiveSession {
    generation: u64,
    commands: mpsc::UnboundedSender<PumpCommand>,
    pump: JoinHandle<()>,
}

enum PumpCommand {
    Reconnect,
    Stop,
}

impl ConversionController {
    pub fn new(
        api: Arc<dyn ConversionApi>,
        transport: Arc<dyn ProgressTransport>,
        endpoint: ProgressEndpoint,
        policy: ReconnectPolicy,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::idle(0));
        Self {
            inner: Arc::new(Inner {
                api,
                transport,
                endpoint,
                policy,
                snapshot,
                generation: AtomicU64::new(0),
                active: Mutex::new(None),
            }),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let api = HttpConversionApi::from_config(config)?;
        let endpoint = config.progress_endpoint()?;

        Ok(Self::new(
            Arc::new(api),
            Arc::new(WebSocketTransport),
            endpoint,
            config.reconnect.policy(),
        ))
    }

    /// Run the HTTP phase of a new submission, replacing any previous one.
    ///
    /// Returns the snapshot as it stands once the server answered. A
    /// non-terminal answer leaves a progress channel attached that carries
    /// the session to `Completed` or `Failed`.
    pub async fn submit(&self, request: ConversionRequest) -> SessionSnapshot {
        let generation = self.inner.next_generation();
        self.inner
            .snapshot
            .send_replace(SessionSnapshot::begin(generation));
        self.inner.teardown().await;

        if let Err(e) = request.validate() {
            tracing::warn!("Conversion request rejected: {}", e);
            self.inner.update(generation, |s| {
                s.fail(&e);
                true
            });
            return self.snapshot();
        }

        let inner = Arc::clone(&self.inner);
        let on_upload: UploadProgressFn = Arc::new(move |percent| {
            inner.update(generation, |s| s.apply_upload_progress(percent));
        });

        let result = self.inner.api.submit(&request, on_upload).await;

        if !self.inner.is_current(generation) {
            tracing::debug!("Discarding result of superseded submission {}", generation);
            return self.snapshot();
        }

        match result {
            Ok(outcome) => {
                let mut needs_channel = false;
                self.inner.update(generation, |s| {
                    needs_channel = s.apply_outcome(&outcome);
                    true
                });

                if needs_channel {
                    if let Some(session_id) = outcome.session_id() {
                        self.inner.attach(generation, session_id).await;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Conversion submit failed: {}", e);
                self.inner.update(generation, |s| {
                    s.fail(&e);
                    true
                });
            }
        }

        self.snapshot()
    }

    /// Back to `Idle`; safe at any time, including mid-submit
    pub async fn reset(&self) {
        let generation = self.inner.next_generation();
        self.inner
            .snapshot
            .send_replace(SessionSnapshot::idle(generation));
        self.inner.teardown().await;
        tracing::debug!("Conversion controller reset");
    }

    /// Manual reconnect of the active progress channel, if any
    pub async fn reconnect(&self) {
        let active = self.inner.active.lock().await;
        if let Some(session) = active.as_ref() {
            let _ = session.commands.send(PumpCommand::Reconnect);
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Wait for `Completed`, `Failed` or a reset.
    ///
    /// A stalled progress stream ends the wait with
    /// [`ConversionError::ChannelExhausted`].
    pub async fn wait_until_terminal(&self) -> Result<SessionSnapshot, ConversionError> {
        let mut receiver = self.inner.snapshot.subscribe();
        let snapshot = receiver
            .wait_for(|s| s.is_terminal() || s.stalled || s.status == ConversionStatus::Idle)
            .await
            .map_err(|_| ConversionError::InvalidResponse("controller dropped".to_string()))?
            .clone();

        if snapshot.stalled && !snapshot.is_terminal() {
            return Err(ConversionError::ChannelExhausted {
                attempts: snapshot.reconnect_attempt,
            });
        }
        Ok(snapshot)
    }
}

impl Inner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Apply `modify` only if the published state still belongs to `generation`
    fn update<F>(&self, generation: u64, modify: F) -> bool
    where
        F: FnOnce(&mut SessionSnapshot) -> bool,
    {
        self.snapshot
            .send_if_modified(|s| s.generation == generation && modify(s))
    }

    async fn attach(self: &Arc<Self>, generation: u64, session_id: &str) {
        let mut active = self.active.lock().await;
        if !self.is_current(generation) {
            return;
        }
        if let Some(previous) = active.take() {
            previous.stop().await;
        }

        let (mut channel, events) =
            ProgressChannel::new(Arc::clone(&self.transport), self.endpoint.clone(), self.policy);
        channel.open(session_id).await;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_session(
            Arc::clone(self),
            generation,
            session_id.to_string(),
            channel,
            events,
            command_rx,
        ));

        tracing::debug!("Progress channel attached: session={}", session_id);
        *active = Some(ActiveSession {
            generation,
            commands,
            pump,
        });
    }

    async fn teardown(&self) {
        let previous = self.active.lock().await.take();
        if let Some(session) = previous {
            tracing::debug!("Tearing down session generation {}", session.generation);
            session.stop().await;
        }
    }
}

impl ActiveSession {
    async fn stop(self) {
        let _ = self.commands.send(PumpCommand::Stop);
        if let Err(e) = self.pump.await {
            if e.is_panic() {
                tracing::error!("Session pump for generation {} panicked", self.generation);
            }
        }
    }
}

/// Feeds channel events for one session into the snapshot until it is terminal
async fn pump_session(
    inner: Arc<Inner>,
    generation: u64,
    session_id: String,
    mut channel: ProgressChannel,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    mut commands: mpsc::UnboundedReceiver<PumpCommand>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(PumpCommand::Reconnect) => {
                    inner.update(generation, |s| {
                        let changed = s.stalled;
                        s.stalled = false;
                        changed
                    });
                    channel.reconnect().await;
                }
                Some(PumpCommand::Stop) | None => break,
            },
            event = events.recv() => {
                let Some(event) = event else { break };
                if event.session_id != session_id {
                    continue;
                }
                if !inner.is_current(generation) {
                    break;
                }

                let mut terminal = false;
                inner.update(generation, |s| {
                    let changed = s.apply_channel_event(&event.kind);
                    terminal = s.is_terminal();
                    changed
                });
                if terminal {
                    tracing::info!("Session {} finished, closing progress channel", session_id);
                    break;
                }
            }
        }
    }

    channel.close().await;
}
