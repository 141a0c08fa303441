//! Negotiation engine
//!
//! The engine traits the session controller drives, and the webrtc-rs
//! implementation used by the server.

pub mod connection;
pub mod engine;

pub use connection::{WebRtcEngine, WebRtcEngineFactory};
pub use engine::{ConnectivityState, EngineEvent, EngineFactory, NegotiationEngine};
