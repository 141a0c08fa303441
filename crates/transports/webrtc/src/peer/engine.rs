//! Negotiation engine boundary
//!
//! The session controller only talks to the engine through these traits.
//! Engine callbacks are never handled in place: every asynchronous
//! notification is pushed as an [`EngineEvent`] onto the owning session's
//! queue and processed by the controller loop.

use crate::media::{InboundStream, InboundStreamInfo, PacketSink};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connectivity state reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    /// Media can flow
    pub fn is_established(&self) -> bool {
        matches!(self, ConnectivityState::Connected | ConnectivityState::Completed)
    }

    /// The connection will not recover
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectivityState::Failed | ConnectivityState::Closed)
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectivityState::New => "new",
            ConnectivityState::Checking => "checking",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Completed => "completed",
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Failed => "failed",
            ConnectivityState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Asynchronous notifications from the engine
#[derive(Debug)]
pub enum EngineEvent {
    /// A local candidate was gathered; `None` marks the end of gathering
    LocalCandidate(Option<IceCandidate>),

    ConnectivityStateChanged(ConnectivityState),

    /// The remote peer started sending a track
    InboundStream(InboundStream),
}

/// One negotiation engine instance, bound to one session
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Create an outbound track with the inbound track's codec and stream id,
    /// and register it for sending to the remote peer
    async fn create_outbound_stream(&self, inbound: &InboundStreamInfo)
        -> Result<Arc<dyn PacketSink>>;

    /// Release the engine; inbound and outbound streams fail afterwards
    async fn close(&self) -> Result<()>;
}

/// Creates one engine per accepted connection
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create_session(
        &self,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Arc<dyn NegotiationEngine>>;
}
