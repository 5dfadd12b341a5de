use serde_json::Value;

use crate::error::Error;

/// The remote API, as the cache core sees it.
///
/// Payloads are untyped JSON in both directions; the core decodes typed
/// entities at the boundary. Operation names follow the remote schema:
/// queries `allBooks`, `allAuthors`, `me`; mutations `addBook`,
/// `editAuthor`, `login`, `createUser`; subscription `bookAdded`.
///
/// Implementations map remote failures onto [`Error::Server`],
/// [`Error::Auth`], or [`Error::Transport`] as appropriate. The
/// mechanics of HTTP and the persistent push connection are entirely
/// the implementation's concern.
pub trait Transport: Send + Sync {
    fn query(&self, name: &str, params: Value) -> Result<Value, Error>;

    fn mutate(&self, name: &str, params: Value) -> Result<Value, Error>;

    /// Open a live push channel for the named subscription. Each call
    /// establishes a fresh connection; the reactor calls this again
    /// after every disconnect.
    fn subscribe(&self, name: &str) -> Result<Box<dyn PushChannel>, Error>;
}

/// One live push connection.
pub trait PushChannel: Send {
    /// Block until the next event arrives. `Ok(None)` means the server
    /// closed the channel cleanly; an error means it dropped. Both send
    /// the reactor back through reconnection.
    fn next(&mut self) -> Result<Option<Value>, Error>;
}

/// Persistence for the session token, supplied by the host application
/// (browser local storage, a keychain, a file — the core does not care).
pub trait TokenStorage: Send {
    fn get(&self) -> Option<String>;
    fn set(&mut self, token: &str);
    fn clear(&mut self);
}

/// In-memory token storage. Suitable for tests and for hosts without a
/// persistence layer; the token then lives only as long as the client.
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    token: Option<String>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        MemoryTokenStorage::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        MemoryTokenStorage {
            token: Some(token.into()),
        }
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn get(&self) -> Option<String> {
        self.token.clone()
    }

    fn set(&mut self, token: &str) {
        self.token = Some(token.to_string());
    }

    fn clear(&mut self) {
        self.token = None;
    }
}
