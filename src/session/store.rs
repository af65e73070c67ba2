use std::collections::HashMap;
use std::sync::Mutex;

use super::Session;
use crate::error::{Result, SignerError};

/// Persistence seam for sessions. The storage format is the implementor's
/// business; the manager only needs get/set/list by id.
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Session>>;
    fn set(&self, session: &Session) -> Result<()>;
    fn list(&self) -> Result<Vec<Session>>;
}

/// In-process store, the default when nothing else is injected.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, id: &str) -> Result<Option<Session>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| SignerError::Storage("memory store poisoned".to_string()))?;
        Ok(sessions.get(id).cloned())
    }

    fn set(&self, session: &Session) -> Result<()> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| SignerError::Storage("memory store poisoned".to_string()))?;
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Session>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| SignerError::Storage("memory store poisoned".to_string()))?;
        Ok(sessions.values().cloned().collect())
    }
}
