//! Test harness for session-level tests
//!
//! Provides a scripted negotiation engine that records every call the
//! controller makes, plus a fixture that runs one controller over in-memory
//! signaling channels.

#![allow(dead_code)]

use async_trait::async_trait;
use iris_webrtc::media::{CodecCapability, MediaKind};
use iris_webrtc::{
    EngineEvent, EngineFactory, Envelope, Error, FrameSampler, IceCandidate, InboundStream,
    InboundStreamInfo, NegotiationEngine, PacketSink, PacketSource, RelayConfig, Result,
    SessionContext, SessionController, SessionDescription, SessionHandle, SessionState,
    SignalMessage,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

/// Default wait for anything the fixture expects to happen
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize tracing for tests (safe to call more than once)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug,webrtc=warn")
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Scripted engine
// =============================================================================

/// One call observed by the scripted engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    SetRemote(SessionDescription),
    CreateAnswer,
    SetLocal(SessionDescription),
    AddCandidate(IceCandidate),
    CreateOutbound(String),
    Close,
}

/// Knobs for the scripted engine
#[derive(Debug, Clone, Default)]
pub struct EngineScript {
    /// Reject every remote description
    pub reject_offers: bool,
    /// Reject every remote candidate
    pub reject_candidates: bool,
}

/// Negotiation engine that answers every offer with a fixed SDP
pub struct ScriptedEngine {
    script: EngineScript,
    events: mpsc::Sender<EngineEvent>,
    calls: Mutex<Vec<EngineCall>>,
    sinks: Mutex<Vec<Arc<RecordingSink>>>,
}

pub const ANSWER_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

impl ScriptedEngine {
    fn new(script: EngineScript, events: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            script,
            events,
            calls: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn close_count(&self) -> usize {
        self.count(|c| matches!(c, EngineCall::Close))
    }

    pub fn sinks(&self) -> Vec<Arc<RecordingSink>> {
        self.sinks.lock().clone()
    }

    /// Push an event as if the engine raised it
    pub async fn emit(&self, event: EngineEvent) {
        self.events
            .send(event)
            .await
            .expect("controller dropped the event queue");
    }
}

#[async_trait]
impl NegotiationEngine for ScriptedEngine {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(EngineCall::SetRemote(desc));
        if self.script.reject_offers {
            return Err(Error::Sdp("malformed offer".to_string()));
        }
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(EngineCall::CreateAnswer);
        Ok(SessionDescription::answer(ANSWER_SDP))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(EngineCall::SetLocal(desc));
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(EngineCall::AddCandidate(candidate));
        if self.script.reject_candidates {
            return Err(Error::IceCandidate("unknown ufrag".to_string()));
        }
        Ok(())
    }

    async fn create_outbound_stream(
        &self,
        inbound: &InboundStreamInfo,
    ) -> Result<Arc<dyn PacketSink>> {
        self.record(EngineCall::CreateOutbound(inbound.track_id.clone()));
        let sink = Arc::new(RecordingSink::default());
        self.sinks.lock().push(Arc::clone(&sink));
        Ok(sink)
    }

    async fn close(&self) -> Result<()> {
        self.record(EngineCall::Close);
        Ok(())
    }
}

/// Factory handing out scripted engines and keeping them for inspection
#[derive(Default)]
pub struct ScriptedFactory {
    script: EngineScript,
    engines: Mutex<Vec<Arc<ScriptedEngine>>>,
    created: Notify,
}

impl ScriptedFactory {
    pub fn new(script: EngineScript) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    pub fn engines(&self) -> Vec<Arc<ScriptedEngine>> {
        self.engines.lock().clone()
    }

    /// Wait until `n` engines have been created
    pub async fn wait_for_engines(&self, n: usize) -> Vec<Arc<ScriptedEngine>> {
        tokio::time::timeout(STEP_TIMEOUT, async {
            loop {
                let notified = self.created.notified();
                if self.engines.lock().len() >= n {
                    return self.engines();
                }
                notified.await;
            }
        })
        .await
        .expect("engine was never created")
    }
}

#[async_trait]
impl EngineFactory for ScriptedFactory {
    async fn create_session(
        &self,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Arc<dyn NegotiationEngine>> {
        let engine = Arc::new(ScriptedEngine::new(self.script.clone(), events));
        self.engines.lock().push(Arc::clone(&engine));
        self.created.notify_waiters();
        Ok(engine)
    }
}

// =============================================================================
// Media doubles
// =============================================================================

/// Sink that keeps every packet written to it
#[derive(Default)]
pub struct RecordingSink {
    packets: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSink {
    pub fn packets(&self) -> Vec<Vec<u8>> {
        self.packets.lock().clone()
    }
}

#[async_trait]
impl PacketSink for RecordingSink {
    async fn write_packet(&self, packet: &[u8]) -> Result<usize> {
        self.packets.lock().push(packet.to_vec());
        Ok(packet.len())
    }
}

/// Source that never yields a packet; the relay only stops on shutdown
#[derive(Default)]
pub struct StalledSource {
    pub reads: AtomicUsize,
}

#[async_trait]
impl PacketSource for StalledSource {
    async fn read_packet(&self, _buf: &mut [u8]) -> Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Source that yields the given packets, then reports end of stream
pub struct ScriptedSource {
    packets: Mutex<std::collections::VecDeque<Vec<u8>>>,
}

impl ScriptedSource {
    pub fn new(packets: Vec<Vec<u8>>) -> Self {
        Self {
            packets: Mutex::new(packets.into()),
        }
    }
}

#[async_trait]
impl PacketSource for ScriptedSource {
    async fn read_packet(&self, buf: &mut [u8]) -> Result<usize> {
        let next = self.packets.lock().pop_front();
        match next {
            Some(packet) => {
                buf[..packet.len()].copy_from_slice(&packet);
                Ok(packet.len())
            }
            None => Err(Error::Relay("EOF".to_string())),
        }
    }
}

pub fn stream_info(track_id: &str, kind: MediaKind) -> InboundStreamInfo {
    let codec = match kind {
        MediaKind::Video => CodecCapability {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            ..Default::default()
        },
        MediaKind::Audio => CodecCapability {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
    };
    InboundStreamInfo {
        track_id: track_id.to_string(),
        stream_id: "client-stream".to_string(),
        kind,
        codec,
    }
}

pub fn inbound_stream(
    track_id: &str,
    kind: MediaKind,
    source: Arc<dyn PacketSource>,
) -> InboundStream {
    InboundStream {
        info: stream_info(track_id, kind),
        source,
    }
}

// =============================================================================
// Session fixture
// =============================================================================

pub fn test_config() -> RelayConfig {
    RelayConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        redis_url: None,
        negotiation_timeout_secs: 0,
        teardown_grace_ms: 200,
        ..Default::default()
    }
}

pub fn test_context(config: RelayConfig, factory: Arc<ScriptedFactory>) -> Arc<SessionContext> {
    Arc::new(SessionContext::new(
        Arc::new(config),
        factory,
        Arc::new(FrameSampler::disabled()),
    ))
}

/// One controller running over in-memory signaling channels
pub struct SessionFixture {
    pub ctx: Arc<SessionContext>,
    pub engine: Arc<ScriptedEngine>,
    pub handle: Arc<SessionHandle>,
    inbound: Option<mpsc::Sender<Result<Envelope>>>,
    outbound: mpsc::Receiver<SignalMessage>,
    task: JoinHandle<SessionState>,
}

impl SessionFixture {
    pub async fn start(config: RelayConfig, script: EngineScript) -> Self {
        init_test_tracing();

        let factory = Arc::new(ScriptedFactory::new(script));
        let ctx = test_context(config, Arc::clone(&factory));

        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (outbound_tx, outbound_rx) = mpsc::channel(16);

        let (controller, events) = SessionController::create(&ctx, outbound_tx)
            .await
            .expect("session creation failed");
        let handle = controller.handle();
        let engine = factory.engines().pop().expect("no engine created");

        let task = tokio::spawn(controller.run(ReceiverStream::new(inbound_rx), events));

        Self {
            ctx,
            engine,
            handle,
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
            task,
        }
    }

    /// Deliver one raw signaling frame as the transport would decode it
    pub async fn send_text(&self, text: &str) {
        let frame = SignalMessage::decode(text);
        self.inbound_sender()
            .send(frame)
            .await
            .expect("controller stopped reading");
    }

    pub async fn send_error(&self, error: Error) {
        let _ = self.inbound_sender().send(Err(error)).await;
    }

    /// Simulate the client hanging up
    pub fn close_transport(&mut self) {
        self.inbound = None;
    }

    fn inbound_sender(&self) -> &mpsc::Sender<Result<Envelope>> {
        self.inbound.as_ref().expect("transport already closed")
    }

    pub async fn recv(&mut self) -> SignalMessage {
        tokio::time::timeout(STEP_TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for outbound message")
            .expect("outbound queue closed")
    }

    /// Everything queued so far, without waiting
    pub fn drain(&mut self) -> Vec<SignalMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Wait until the controller has processed everything sent so far
    pub async fn settle(&self) {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> SessionState {
        tokio::time::timeout(STEP_TIMEOUT, self.task)
            .await
            .expect("session did not finish")
            .expect("session task panicked")
    }
}

pub fn offer_json(sdp: &str) -> String {
    serde_json::json!({
        "type": "offer",
        "sdp": { "type": "offer", "sdp": sdp }
    })
    .to_string()
}

pub fn candidate_json(candidate: &str) -> String {
    serde_json::json!({
        "type": "candidate",
        "candidate": {
            "candidate": candidate,
            "sdpMid": "0",
            "sdpMLineIndex": 0
        }
    })
    .to_string()
}
