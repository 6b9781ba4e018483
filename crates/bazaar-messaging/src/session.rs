use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use crate::error::MessagingError;

/// Opaque session issued by account management.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Uuid,
    pub access_token: String,
}

/// Shared handle to the current session. Cloning shares the same slot, so
/// signing out is seen by every component at once.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    current: Arc<RwLock<Option<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(session: Session) -> Self {
        let store = Self::new();
        store.sign_in(session);
        store
    }

    pub fn sign_in(&self, session: Session) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    pub fn sign_out(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn current(&self) -> Option<Session> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The active session, or `AuthRequired` if there is none or its token
    /// is blank.
    pub fn require(&self) -> Result<Session, MessagingError> {
        self.current()
            .filter(|s| !s.access_token.trim().is_empty())
            .ok_or(MessagingError::AuthRequired)
    }
}
