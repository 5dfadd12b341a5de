use log::debug;

use crate::transport::TokenStorage;

/// Tracks the session token lifecycle and gates token-dependent work.
///
/// The token is absent at first load unless one was persisted by an
/// earlier session, set on successful login, and cleared on logout.
/// While the token is absent, views that depend on it are "not yet
/// available" rather than stale-cached, and gated queries (like
/// fetching the current user) are skipped outright, never
/// attempted-and-failed.
pub struct SessionGate {
    token: Option<String>,
    storage: Box<dyn TokenStorage>,
}

impl std::fmt::Debug for SessionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGate")
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl SessionGate {
    /// Create a gate, recovering any token the storage collaborator
    /// persisted in an earlier session.
    pub fn new(storage: Box<dyn TokenStorage>) -> Self {
        let token = storage.get();
        if token.is_some() {
            debug!("session token recovered from storage");
        }
        SessionGate { token, storage }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Install a fresh token (successful login) and persist it.
    pub fn set_token(&mut self, token: &str) {
        self.token = Some(token.to_string());
        self.storage.set(token);
    }

    /// Drop the token from memory and storage. Idempotent. The caller
    /// (the client context) is responsible for the rest of the logout
    /// sequence: store wipe, view wipe, reactor teardown, navigation.
    pub fn clear(&mut self) {
        self.token = None;
        self.storage.clear();
    }
}
