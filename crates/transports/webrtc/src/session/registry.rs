//! Process-wide table of live sessions
//!
//! Injected into the controllers rather than reached globally, so tests can
//! run many independent registries side by side. No `.await` happens while
//! the lock is held.

use super::state::{SessionHandle, SessionId};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session; an id can only be registered once
    pub fn insert(&self, handle: Arc<SessionHandle>) -> Result<()> {
        let mut sessions = self.sessions.write();
        let id = handle.id();
        if sessions.contains_key(&id) {
            return Err(Error::SessionExists(id.to_string()));
        }
        sessions.insert(id, handle);
        debug!("Registered session {} (total: {})", id, sessions.len());
        Ok(())
    }

    /// Remove a session, returning it only to the first caller
    pub fn remove(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(id);
        if removed.is_some() {
            debug!("Removed session {} (remaining: {})", id, sessions.len());
        }
        removed
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().copied().collect()
    }

    /// Ask every live session to close, returning how many were asked
    ///
    /// Sessions remove themselves as their controllers finish teardown.
    pub fn close_all(&self) -> usize {
        let handles: Vec<_> = self.sessions.read().values().cloned().collect();
        for handle in &handles {
            handle.close();
        }
        handles.len()
    }
}
