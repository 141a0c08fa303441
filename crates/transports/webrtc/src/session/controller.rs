//! Per-session signaling state machine
//!
//! One controller owns one negotiation engine and the outbound half of one
//! signaling transport. Inbound signaling, engine events, the negotiation
//! deadline and external close requests all funnel into a single loop, so
//! each input is handled to completion before the next one starts and the
//! engine never sees interleaved description/candidate calls.
//!
//! ```text
//! Connecting ──offer──▶ OfferReceived ──answer queued──▶ AnswerSent
//!      │                                                     │
//!      │                                          ICE connected
//!      │                                                     ▼
//!      └────────── transport end / ICE failed / timeout ──▶ Closed ◀── Connected
//! ```

use super::registry::SessionRegistry;
use super::state::{SessionHandle, SessionId, SessionState};
use crate::config::RelayConfig;
use crate::media::{FrameSampler, InboundStream, MediaRelay};
use crate::peer::{ConnectivityState, EngineEvent, EngineFactory, NegotiationEngine};
use crate::signaling::{Envelope, IceCandidate, SessionDescription, SignalMessage};
use crate::{Error, Result};
use futures::future::join_all;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Capacity of the per-session engine event queue
const ENGINE_EVENT_QUEUE_SIZE: usize = 256;

/// Process-wide dependencies shared by every session
pub struct SessionContext {
    pub config: Arc<RelayConfig>,
    pub registry: Arc<SessionRegistry>,
    pub engines: Arc<dyn EngineFactory>,
    pub relay: Arc<MediaRelay>,
}

impl SessionContext {
    pub fn new(
        config: Arc<RelayConfig>,
        engines: Arc<dyn EngineFactory>,
        sampler: Arc<FrameSampler>,
    ) -> Self {
        let relay = Arc::new(MediaRelay::new(config.relay_buffer_size, sampler));
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            engines,
            relay,
        }
    }
}

/// State machine for one client connection
pub struct SessionController {
    handle: Arc<SessionHandle>,
    engine: Arc<dyn NegotiationEngine>,
    outbound: mpsc::Sender<SignalMessage>,
    registry: Arc<SessionRegistry>,
    relay: Arc<MediaRelay>,
    state: SessionState,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    negotiation_timeout: Option<Duration>,
    teardown_grace: Duration,
}

impl SessionController {
    /// Create the engine, register the session and return the controller
    /// together with the engine's event queue
    pub async fn create(
        ctx: &SessionContext,
        outbound: mpsc::Sender<SignalMessage>,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(ENGINE_EVENT_QUEUE_SIZE);
        let engine = ctx.engines.create_session(events_tx).await?;

        let handle = Arc::new(SessionHandle::new(SessionId::new()));
        if let Err(e) = ctx.registry.insert(Arc::clone(&handle)) {
            let _ = engine.close().await;
            return Err(e);
        }

        info!(session_id = %handle.id(), "Session created");

        let (shutdown_tx, _) = watch::channel(false);

        let controller = Self {
            handle,
            engine,
            outbound,
            registry: Arc::clone(&ctx.registry),
            relay: Arc::clone(&ctx.relay),
            state: SessionState::Connecting,
            shutdown_tx,
            tasks: Vec::new(),
            negotiation_timeout: ctx.config.negotiation_timeout(),
            teardown_grace: ctx.config.teardown_grace(),
        };

        Ok((controller, events_rx))
    }

    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    pub fn handle(&self) -> Arc<SessionHandle> {
        Arc::clone(&self.handle)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until it closes
    ///
    /// `inbound` yields decoded signaling messages; its end or a transport
    /// error item closes the session, other error items only drop that frame.
    pub async fn run<S>(self, inbound: S, events: mpsc::Receiver<EngineEvent>) -> SessionState
    where
        S: Stream<Item = Result<Envelope>> + Unpin + Send,
    {
        let span = info_span!("session", session_id = %self.handle.id());
        self.run_loop(inbound, events).instrument(span).await
    }

    async fn run_loop<S>(mut self, mut inbound: S, mut events: mpsc::Receiver<EngineEvent>) -> SessionState
    where
        S: Stream<Item = Result<Envelope>> + Unpin + Send,
    {
        let handle = Arc::clone(&self.handle);
        let deadline = self.negotiation_timeout.map(|t| Instant::now() + t);
        let mut events_open = true;

        while self.state != SessionState::Closed {
            let armed = deadline.is_some() && self.state < SessionState::Connected;
            let deadline_at = deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                _ = handle.close_requested() => {
                    self.close("close requested").await;
                }
                frame = inbound.next() => match frame {
                    Some(Ok(envelope)) => self.on_envelope(envelope).await,
                    Some(Err(e)) => self.on_error(e).await,
                    None => {
                        info!("Signaling transport closed");
                        self.close("transport closed").await;
                    }
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.on_engine_event(event).await,
                    None => events_open = false,
                },
                _ = tokio::time::sleep_until(deadline_at), if armed => {
                    warn!("Negotiation did not complete in time (state: {})", self.state);
                    self.close("negotiation timeout").await;
                }
            }
        }

        self.state
    }

    async fn on_envelope(&mut self, envelope: Envelope) {
        if let Some(client_id) = envelope.client_id.as_deref() {
            if self.handle.set_client_id(client_id) {
                info!(client_id, "Client identified");
            }
        }

        match envelope.message {
            SignalMessage::Offer(desc) => {
                if let Err(e) = self.on_offer(desc).await {
                    self.on_error(e).await;
                }
            }
            SignalMessage::Candidate(candidate) => self.on_candidate(candidate).await,
            SignalMessage::Answer(_) => {
                debug!("Ignoring answer from client, server is always the answerer");
            }
            SignalMessage::Unknown(kind) => {
                debug!("Ignoring signaling message of type '{}'", kind);
            }
        }
    }

    /// Apply a remote offer and answer it
    async fn on_offer(&mut self, desc: SessionDescription) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        info!("Received offer");

        self.engine.set_remote_description(desc).await?;
        let answer = self.engine.create_answer().await?;
        self.engine.set_local_description(answer.clone()).await?;
        self.advance(SessionState::OfferReceived);

        self.send(SignalMessage::Answer(answer)).await?;
        self.advance(SessionState::AnswerSent);

        info!("Sent answer");
        Ok(())
    }

    async fn on_candidate(&mut self, candidate: Option<IceCandidate>) {
        if self.state == SessionState::Closed {
            return;
        }

        let Some(candidate) = candidate else {
            debug!("Remote end-of-candidates");
            return;
        };

        debug!("Adding remote ICE candidate: {}", candidate.candidate);
        if let Err(e) = self.engine.add_remote_candidate(candidate).await {
            self.on_error(e).await;
        }
    }

    async fn on_engine_event(&mut self, event: EngineEvent) {
        if self.state == SessionState::Closed {
            return;
        }

        match event {
            EngineEvent::LocalCandidate(Some(candidate)) => {
                debug!("Local ICE candidate: {}", candidate.candidate);
                if let Err(e) = self.send(SignalMessage::Candidate(Some(candidate))).await {
                    self.on_error(e).await;
                }
            }
            EngineEvent::LocalCandidate(None) => {
                debug!("ICE gathering complete");
            }
            EngineEvent::ConnectivityStateChanged(state) => {
                self.on_connectivity_change(state).await;
            }
            EngineEvent::InboundStream(stream) => self.on_inbound_stream(stream).await,
        }
    }

    async fn on_connectivity_change(&mut self, state: ConnectivityState) {
        info!("ICE Connection State: {}", state);

        if state.is_established() {
            self.advance(SessionState::Connected);
        } else if state.is_terminal() {
            self.close("connectivity lost").await;
        }
    }

    async fn on_inbound_stream(&mut self, stream: InboundStream) {
        let track_id = stream.info.track_id.clone();
        match self
            .relay
            .start(stream, self.engine.as_ref(), self.shutdown_tx.subscribe())
            .await
        {
            Ok(tasks) => {
                self.tasks.retain(|task| !task.is_finished());
                self.tasks.extend(tasks);
            }
            Err(e) => warn!("Failed to relay track {}: {}", track_id, e),
        }
    }

    /// Transport errors close the session; everything else is logged and
    /// the triggering message is dropped
    async fn on_error(&mut self, e: Error) {
        if e.is_transport_error() {
            warn!("Signaling transport failed: {}", e);
            self.close("transport error").await;
        } else {
            warn!("Dropping signaling message: {}", e);
        }
    }

    async fn send(&self, message: SignalMessage) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| Error::Transport("signaling writer closed".to_string()))
    }

    /// Move forward; never regresses and never leaves `Closed`
    fn advance(&mut self, next: SessionState) {
        if next > self.state && self.state != SessionState::Closed {
            debug!("Session state {} -> {}", self.state, next);
            self.state = next;
            self.handle.set_state(next);
        }
    }

    /// Tear the session down; only the first call has any effect
    pub async fn close(&mut self, reason: &str) {
        if self.state == SessionState::Closed {
            return;
        }

        info!("Closing session: {}", reason);
        self.state = SessionState::Closed;
        self.handle.set_state(SessionState::Closed);

        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.engine.close().await {
            warn!("Failed to close negotiation engine: {}", e);
        }

        self.registry.remove(&self.handle.id());

        let tasks = std::mem::take(&mut self.tasks);
        let abort_handles: Vec<_> = tasks.iter().map(|task| task.abort_handle()).collect();
        if tokio::time::timeout(self.teardown_grace, join_all(tasks))
            .await
            .is_err()
        {
            warn!("Media tasks did not stop within {:?}, aborting", self.teardown_grace);
            for handle in abort_handles {
                handle.abort();
            }
        }

        info!(
            lifetime = ?self.handle.created_at().elapsed(),
            "Session closed"
        );
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        // Dropped without teardown, e.g. the owning task was cancelled
        self.handle.set_state(SessionState::Closed);
        let _ = self.shutdown_tx.send(true);
        self.registry.remove(&self.handle.id());
        for task in &self.tasks {
            task.abort();
        }

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let engine = Arc::clone(&self.engine);
            runtime.spawn(async move {
                let _ = engine.close().await;
            });
        }
    }
}

/// Create a session for one transport and run it to completion,
/// returning the state it finished in
pub async fn run_session<S>(
    ctx: &SessionContext,
    inbound: S,
    outbound: mpsc::Sender<SignalMessage>,
) -> Result<SessionState>
where
    S: Stream<Item = Result<Envelope>> + Unpin + Send,
{
    let (controller, events) = SessionController::create(ctx, outbound).await?;
    Ok(controller.run(inbound, events).await)
}
