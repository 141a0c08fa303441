//! WebSocket signaling server
//!
//! Serves `/signal` (one session per upgraded connection) and `/health`
//! over a single axum router.

mod handler;
mod server;

pub use handler::signal_handler;
pub use server::{router, RelayServer};
