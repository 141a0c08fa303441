//! Session identity and negotiation state

use parking_lot::RwLock;
use std::fmt;
use std::time::Instant;
use tokio::sync::Notify;
use uuid::Uuid;

/// Unique identifier for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Negotiation state of a session
///
/// States are ordered; a session only moves forward, except that any state
/// may jump to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Transport open, engine created, no description exchanged
    Connecting,
    OfferReceived,
    /// A local answer has been committed and queued for the client
    AnswerSent,
    /// Connectivity established at least once
    Connected,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Connecting => "connecting",
            SessionState::OfferReceived => "offer-received",
            SessionState::AnswerSent => "answer-sent",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Registry-facing view of a live session
///
/// The controller owns the session; the handle only mirrors its state and
/// lets other parties ask it to close.
pub struct SessionHandle {
    id: SessionId,
    created_at: Instant,
    state: RwLock<SessionState>,
    client_id: RwLock<Option<String>>,
    close_requested: Notify,
}

impl SessionHandle {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            state: RwLock::new(SessionState::Connecting),
            client_id: RwLock::new(None),
            close_requested: Notify::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    /// Client identifier, if the client sent one
    pub fn client_id(&self) -> Option<String> {
        self.client_id.read().clone()
    }

    /// Record the client identifier; only the first one sticks
    pub(crate) fn set_client_id(&self, client_id: &str) -> bool {
        let mut slot = self.client_id.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(client_id.to_string());
        true
    }

    /// Ask the owning controller to close the session
    pub fn close(&self) {
        self.close_requested.notify_one();
    }

    pub(crate) async fn close_requested(&self) {
        self.close_requested.notified().await
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("client_id", &self.client_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_states_are_ordered() {
        assert!(SessionState::Connecting < SessionState::OfferReceived);
        assert!(SessionState::OfferReceived < SessionState::AnswerSent);
        assert!(SessionState::AnswerSent < SessionState::Connected);
        assert!(SessionState::Connected < SessionState::Closed);
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_first_client_id_sticks() {
        let handle = SessionHandle::new(SessionId::new());
        assert_eq!(handle.client_id(), None);
        assert!(handle.set_client_id("alice"));
        assert!(!handle.set_client_id("mallory"));
        assert_eq!(handle.client_id().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_close_request_is_not_lost() {
        let handle = SessionHandle::new(SessionId::new());
        // Requested before anyone waits
        handle.close();
        tokio::time::timeout(Duration::from_secs(1), handle.close_requested())
            .await
            .expect("close request lost");
    }
}
