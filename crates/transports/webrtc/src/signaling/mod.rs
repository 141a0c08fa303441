//! Signaling protocol and WebSocket transport
//!
//! Clients exchange SDP and ICE candidates as JSON text frames over a
//! WebSocket; the server is always the answerer.

pub mod protocol;
pub mod websocket;

pub use protocol::{Envelope, IceCandidate, SdpType, SessionDescription, SignalMessage};
pub use websocket::{router, RelayServer};
