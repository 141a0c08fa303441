//! Session management
//!
//! One session per signaling connection: the controller drives negotiation,
//! the registry tracks which sessions are live.

pub mod controller;
pub mod registry;
pub mod state;

pub use controller::{run_session, SessionContext, SessionController};
pub use registry::SessionRegistry;
pub use state::{SessionHandle, SessionId, SessionState};
