//! WebRTC media signaling relay
//!
//! Accepts browser clients over a WebSocket signaling channel, answers their
//! SDP offers, trickles ICE candidates both ways and loops every inbound
//! media track straight back to the sender. Video tracks are additionally
//! sampled on a fixed interval and announced on a Redis pub/sub topic.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Browser client                                          │
//! │  ↓ (JSON over WebSocket /signal)     ↓ (RTP over ICE)    │
//! │  RelayServer (axum)                                      │
//! │  └─ SessionController (one per connection)               │
//! │     ├─ NegotiationEngine (webrtc-rs peer connection)     │
//! │     ├─ MediaRelay (inbound track → outbound track)       │
//! │     │   └─ FrameSampler ──▶ RedisPublisher               │
//! │     └─ SessionRegistry (process-wide lookup)             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use iris_webrtc::RelayConfig;
//!
//! let config = RelayConfig {
//!     listen_addr: "127.0.0.1:9000".parse().unwrap(),
//!     ..Default::default()
//! };
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.frame_topic, "video-frames");
//! ```
//!
//! ## Running a server
//!
//! ```no_run
//! use iris_webrtc::{FrameSampler, RelayConfig, RelayServer, SessionContext, WebRtcEngineFactory};
//! use std::sync::Arc;
//!
//! # async fn example() -> iris_webrtc::Result<()> {
//! let config = Arc::new(RelayConfig::default());
//! let engines = Arc::new(WebRtcEngineFactory::new(Arc::clone(&config)));
//! let ctx = SessionContext::new(config, engines, Arc::new(FrameSampler::disabled()));
//!
//! let listener = tokio::net::TcpListener::bind(ctx.config.listen_addr).await?;
//! RelayServer::new(Arc::new(ctx))
//!     .serve(listener, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::{RelayConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use media::{
    CodecCapability, FrameDecoder, FramePublisher, FrameSampler, InboundStream,
    InboundStreamInfo, MediaKind, MediaRelay, PacketSink, PacketSource, PacketTap,
    RedisPublisher, SampledFrame,
};
pub use peer::{
    ConnectivityState, EngineEvent, EngineFactory, NegotiationEngine, WebRtcEngineFactory,
};
pub use session::{
    SessionContext, SessionController, SessionHandle, SessionId, SessionRegistry, SessionState,
};
pub use signaling::{
    Envelope, IceCandidate, RelayServer, SdpType, SessionDescription, SignalMessage,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
