//! The client context: one long-lived object owning the entity store,
//! the view index, the session gate, and the notification feed, wired
//! to a transport and a token storage supplied by the host.
//!
//! All cache state sits behind a single mutex, so mutations coming
//! from the UI thread and from the push reactor serialize on the same
//! lock. There is no further ordering guarantee between a local
//! create-book response and the push event for the same book; the
//! merge engine's duplicate check carries that load.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use serde_json::{json, Value};

use crate::entity::{
    decode_author, decode_book, decode_user, Author, AuthorId, Book, BookId, User,
};
use crate::error::Error;
use crate::merge::merge_book_across_views;
use crate::push::{lock, notify, Backoff, ConnState, NotificationFeed, PushReactor, ReactorHandle};
use crate::session::SessionGate;
use crate::store::EntityStore;
use crate::transport::{MemoryTokenStorage, TokenStorage, Transport};
use crate::view::{Selector, ViewIndex};

/// A cache mutation visible to subscribers. The UI layer re-renders
/// from these instead of polling.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    BookMerged(BookId),
    AuthorUpdated(AuthorId),
    ViewPopulated(Selector),
    ViewInvalidated(Selector),
    AuthorsPopulated,
    NotificationPosted,
    LoggedIn,
    /// The session ended; the UI should navigate to the
    /// unauthenticated entry view.
    LoggedOut,
}

pub(crate) type Observers = Arc<Mutex<Vec<Box<dyn Fn(&Change) + Send + Sync>>>>;

pub(crate) struct CacheState {
    pub(crate) store: EntityStore,
    pub(crate) views: ViewIndex,
    pub(crate) session: SessionGate,
    pub(crate) feed: NotificationFeed,
}

/// Form fields for the create-book operation. `published` arrives as
/// the raw form string and is validated here, before any request goes
/// out.
#[derive(Debug, Clone, Default)]
pub struct NewBookFields {
    pub title: String,
    pub author: String,
    pub published: String,
    pub genres: Vec<String>,
}

/// Form fields for the signup operation. The password never leaves the
/// client beyond the create-user request; the confirm field exists only
/// for local validation.
#[derive(Debug, Clone, Default)]
pub struct SignupFields {
    pub username: String,
    pub favorite_genre: String,
    pub password: String,
    pub confirm_password: String,
}

/// Builder for [`LibraryClient`]. The transport is the only required
/// collaborator; storage defaults to in-memory, the notification
/// lifetime to 5 seconds, and the reconnect backoff to 1s doubling up
/// to 10s.
pub struct LibraryClientBuilder {
    transport: Arc<dyn Transport>,
    storage: Option<Box<dyn TokenStorage>>,
    notification_ttl: Duration,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl LibraryClientBuilder {
    pub fn storage(mut self, storage: Box<dyn TokenStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn notification_ttl(mut self, ttl: Duration) -> Self {
        self.notification_ttl = ttl;
        self
    }

    pub fn reconnect_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn build(self) -> LibraryClient {
        let storage = self
            .storage
            .unwrap_or_else(|| Box::new(MemoryTokenStorage::new()));
        let state = CacheState {
            store: EntityStore::new(),
            views: ViewIndex::new(),
            session: SessionGate::new(storage),
            feed: NotificationFeed::with_ttl(self.notification_ttl),
        };
        LibraryClient {
            transport: self.transport,
            state: Arc::new(Mutex::new(state)),
            observers: Arc::new(Mutex::new(Vec::new())),
            reactor: Mutex::new(None),
            backoff_base: self.backoff_base,
            backoff_max: self.backoff_max,
        }
    }
}

/// The library client cache core.
///
/// Constructed once at startup and shared (behind an `Arc` if needed)
/// with every component that touches the cache — explicit dependency
/// injection, no ambient global. A token persisted by a previous
/// session is recovered during construction.
pub struct LibraryClient {
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<CacheState>>,
    observers: Observers,
    reactor: Mutex<Option<ReactorHandle>>,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl LibraryClient {
    pub fn builder(transport: Arc<dyn Transport>) -> LibraryClientBuilder {
        LibraryClientBuilder {
            transport,
            storage: None,
            notification_ttl: NotificationFeed::DEFAULT_TTL,
            backoff_base: Backoff::DEFAULT_BASE,
            backoff_max: Backoff::DEFAULT_MAX,
        }
    }

    pub fn new(transport: Arc<dyn Transport>, storage: Box<dyn TokenStorage>) -> Self {
        Self::builder(transport).storage(storage).build()
    }

    /// Register a callback invoked on every cache mutation.
    pub fn observe(&self, observer: impl Fn(&Change) + Send + Sync + 'static) {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Box::new(observer));
    }

    pub fn is_authenticated(&self) -> bool {
        lock(&self.state).session.is_authenticated()
    }

    pub fn token(&self) -> Option<String> {
        lock(&self.state).session.token().map(str::to_string)
    }

    // ---- view reads ------------------------------------------------

    /// The cached sequence for a view, or `None` when not yet
    /// available. A miss is the signal to call [`fetch_books`].
    ///
    /// [`fetch_books`]: LibraryClient::fetch_books
    pub fn current_view(&self, selector: &Selector) -> Option<Vec<Book>> {
        let state = lock(&self.state);
        let ids = state.views.view(selector)?;
        Some(
            ids.iter()
                .filter_map(|id| state.store.book(id).cloned())
                .collect(),
        )
    }

    pub fn current_authors(&self) -> Option<Vec<Author>> {
        let state = lock(&self.state);
        let ids = state.views.authors()?;
        Some(
            ids.iter()
                .filter_map(|id| state.store.author(id).cloned())
                .collect(),
        )
    }

    /// Distinct genres across the unfiltered view, in first-seen order.
    /// Empty until the unfiltered view has been fetched.
    pub fn known_genres(&self) -> Vec<String> {
        let state = lock(&self.state);
        let Some(ids) = state.views.view(&Selector::AllBooks) else {
            return Vec::new();
        };
        let mut genres: Vec<String> = Vec::new();
        for id in ids {
            if let Some(book) = state.store.book(id) {
                for genre in &book.genres {
                    if !genres.contains(genre) {
                        genres.push(genre.clone());
                    }
                }
            }
        }
        genres
    }

    pub fn notifications(&self) -> Vec<crate::push::Notification> {
        lock(&self.state).feed.live()
    }

    /// Mark a view stale so the next read misses and triggers a fetch.
    pub fn invalidate(&self, selector: &Selector) {
        lock(&self.state).views.invalidate(selector);
        notify(&self.observers, &[Change::ViewInvalidated(selector.clone())]);
    }

    pub fn invalidate_authors(&self) {
        lock(&self.state).views.invalidate_authors();
    }

    // ---- fetch paths -----------------------------------------------

    /// Query `allBooks` for the selector and populate its view with the
    /// authoritative result. Entities land in the store; the view holds
    /// ids only.
    pub fn fetch_books(&self, selector: &Selector) -> Result<Vec<Book>, Error> {
        let epoch = lock(&self.state).store.epoch();
        let genre = match selector {
            Selector::AllBooks => Value::Null,
            Selector::Genre(g) => Value::String(g.clone()),
        };
        let response = self.transport.query("allBooks", json!({ "genre": genre }))?;
        let items = as_array(response)?;

        let mut books = Vec::with_capacity(items.len());
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let record = decode_book(item)?;
            books.push(record.book.clone());
            records.push(record);
        }

        {
            let mut state = lock(&self.state);
            if state.store.epoch() != epoch {
                warn!("discarding stale allBooks response ({selector}): session ended");
                return Ok(books);
            }
            let mut ids: Vec<BookId> = Vec::with_capacity(records.len());
            for record in records {
                state.store.ensure_author(&record.book.author_id, &record.author_name);
                if !ids.contains(&record.book.id) {
                    ids.push(record.book.id.clone());
                }
                state.store.upsert_book(record.book);
            }
            state.views.populate(selector.clone(), ids);
        }
        notify(&self.observers, &[Change::ViewPopulated(selector.clone())]);
        Ok(books)
    }

    /// Query `allAuthors` and populate the authors list.
    pub fn fetch_authors(&self) -> Result<Vec<Author>, Error> {
        let epoch = lock(&self.state).store.epoch();
        let response = self.transport.query("allAuthors", json!({}))?;
        let items = as_array(response)?;

        let mut authors = Vec::with_capacity(items.len());
        for item in items {
            authors.push(decode_author(item)?);
        }

        {
            let mut state = lock(&self.state);
            if state.store.epoch() != epoch {
                warn!("discarding stale allAuthors response: session ended");
                return Ok(authors);
            }
            let ids: Vec<AuthorId> = authors.iter().map(|a| a.id.clone()).collect();
            for author in &authors {
                state.store.upsert_author(author.clone());
            }
            state.views.populate_authors(ids);
        }
        notify(&self.observers, &[Change::AuthorsPopulated]);
        Ok(authors)
    }

    /// The current user, fetched through the gated `me` query. Returns
    /// `Ok(None)` without touching the transport while logged out — the
    /// query is skipped, not attempted-and-failed.
    pub fn current_user(&self) -> Result<Option<User>, Error> {
        let epoch = {
            let state = lock(&self.state);
            if !state.session.is_authenticated() {
                debug!("skipping me query: no session token");
                return Ok(None);
            }
            if let Some(user) = state.store.user() {
                return Ok(Some(user.clone()));
            }
            state.store.epoch()
        };

        let response = self.transport.query("me", json!({}))?;
        if response.is_null() {
            return Ok(None);
        }
        let user = decode_user(response)?;

        let mut state = lock(&self.state);
        if state.store.epoch() == epoch {
            state.store.set_user(user.clone());
        }
        Ok(Some(user))
    }

    /// Books in the logged-in user's favorite genre. `Ok(None)` while
    /// logged out; otherwise served from the genre view, fetching it on
    /// a miss.
    pub fn recommended_books(&self) -> Result<Option<Vec<Book>>, Error> {
        let Some(user) = self.current_user()? else {
            return Ok(None);
        };
        let selector = Selector::genre(user.favorite_genre);
        if let Some(books) = self.current_view(&selector) {
            return Ok(Some(books));
        }
        self.fetch_books(&selector).map(Some)
    }

    // ---- mutations -------------------------------------------------

    /// Validate and submit a create-book request, then merge the
    /// response book into the store and every affected view.
    pub fn submit_create_book(&self, fields: NewBookFields) -> Result<Book, Error> {
        if fields.title.trim().is_empty() {
            return Err(Error::validation("title", "title is required"));
        }
        if fields.author.trim().is_empty() {
            return Err(Error::validation("author", "author is required"));
        }
        if fields.published.trim().is_empty() {
            return Err(Error::validation("published", "published year is required"));
        }
        let published: i32 = fields
            .published
            .trim()
            .parse()
            .map_err(|_| Error::validation("published", "published year must be a number"))?;
        if fields.genres.iter().all(|g| g.trim().is_empty()) {
            return Err(Error::validation("genres", "at least one genre is required"));
        }
        self.require_session()?;

        let epoch = lock(&self.state).store.epoch();
        let response = self.transport.mutate(
            "addBook",
            json!({
                "title": fields.title,
                "author": fields.author,
                "published": published,
                "genres": fields.genres,
            }),
        )?;
        let record = decode_book(response)?;
        let book = record.book.clone();

        let newly_added;
        {
            let mut state = lock(&self.state);
            if state.store.epoch() != epoch {
                warn!("discarding addBook response '{}': session ended", book.title);
                return Ok(book);
            }
            // Reborrow so views and store split as disjoint fields
            // rather than two mutable borrows of the guard.
            let state = &mut *state;
            let outcome = merge_book_across_views(
                &mut state.views,
                &mut state.store,
                &record.book,
                &record.author_name,
            );
            newly_added = outcome.newly_added;
        }
        if newly_added {
            notify(&self.observers, &[Change::BookMerged(book.id.clone())]);
        }
        Ok(book)
    }

    /// Validate and submit an edit-birth-year request. The cached
    /// author record is updated in place — no refetch, and the derived
    /// book count is untouched.
    pub fn submit_edit_author(&self, name: &str, born: &str) -> Result<Author, Error> {
        if name.trim().is_empty() {
            return Err(Error::validation("name", "select an author"));
        }
        if born.trim().is_empty() {
            return Err(Error::validation("born", "birth year is required"));
        }
        let born: i32 = born
            .trim()
            .parse()
            .map_err(|_| Error::validation("born", "birth year must be a number"))?;
        self.require_session()?;

        let epoch = lock(&self.state).store.epoch();
        let response = self
            .transport
            .mutate("editAuthor", json!({ "name": name, "setBornTo": born }))?;
        let updated = decode_author(response)?;

        {
            let mut state = lock(&self.state);
            if state.store.epoch() != epoch {
                warn!("discarding editAuthor response for '{name}': session ended");
                return Ok(updated);
            }
            // The id lookup covers the normal case; a payload without an
            // author id decodes with the name standing in, so fall back
            // to the name key before giving up and inserting.
            let updated_in_place = state.store.set_author_born(&updated.id, updated.born)
                || state
                    .store
                    .author_by_name_mut(&updated.name)
                    .map(|existing| existing.born = updated.born)
                    .is_some();
            if !updated_in_place {
                state.store.upsert_author(updated.clone());
            }
        }
        notify(&self.observers, &[Change::AuthorUpdated(updated.id.clone())]);
        Ok(updated)
    }

    /// Submit credentials; on success the token is installed in the
    /// session gate and persisted to storage.
    pub fn submit_login(&self, username: &str, password: &str) -> Result<(), Error> {
        if username.trim().is_empty() {
            return Err(Error::validation("username", "username is required"));
        }
        if password.is_empty() {
            return Err(Error::validation("password", "password is required"));
        }

        let response = self.transport.mutate(
            "login",
            json!({ "username": username, "password": password }),
        )?;
        let token = response
            .get("value")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Server("login response carried no token".to_string()))?
            .to_string();

        lock(&self.state).session.set_token(&token);
        notify(&self.observers, &[Change::LoggedIn]);
        Ok(())
    }

    /// Validate and submit a signup request. The confirm field and the
    /// length rule are checked locally; only username and favorite
    /// genre travel to the server.
    pub fn submit_create_user(&self, fields: SignupFields) -> Result<(), Error> {
        if fields.username.trim().is_empty() {
            return Err(Error::validation("username", "username is required"));
        }
        if fields.favorite_genre.trim().is_empty() {
            return Err(Error::validation("favorite_genre", "favorite genre is required"));
        }
        if fields.password.is_empty() {
            return Err(Error::validation("password", "password is required"));
        }
        if fields.password != fields.confirm_password {
            return Err(Error::validation("confirm_password", "passwords do not match"));
        }
        if fields.password.len() < 5 {
            return Err(Error::validation(
                "password",
                "password must be at least 5 characters long",
            ));
        }

        self.transport.mutate(
            "createUser",
            json!({
                "username": fields.username,
                "favoriteGenre": fields.favorite_genre,
            }),
        )?;
        Ok(())
    }

    /// End the session: clear the token (memory and storage), wipe the
    /// entity store and every view, drop the notification feed, tear
    /// down the push reactor, and signal the UI to navigate away.
    /// Responses still in flight for the old session find the epoch
    /// advanced and are discarded on arrival.
    pub fn logout(&self) {
        {
            let mut state = lock(&self.state);
            state.session.clear();
            state.store.clear();
            state.views.clear();
            state.feed.clear();
        }
        if let Some(handle) = self
            .reactor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.shutdown();
        }
        notify(&self.observers, &[Change::LoggedOut]);
    }

    // ---- push channel ----------------------------------------------

    /// Start the push reactor if it is not already running.
    pub fn connect_push(&self) {
        let mut reactor = self
            .reactor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if reactor.is_some() {
            return;
        }
        *reactor = Some(PushReactor::spawn(
            Arc::clone(&self.transport),
            Arc::clone(&self.state),
            Arc::clone(&self.observers),
            Backoff::new(self.backoff_base, self.backoff_max),
        ));
    }

    pub fn push_status(&self) -> ConnState {
        self.reactor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(ReactorHandle::status)
            .unwrap_or(ConnState::Disconnected)
    }

    fn require_session(&self) -> Result<(), Error> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(Error::Auth("not logged in".to_string()))
        }
    }
}

fn as_array(value: Value) -> Result<Vec<Value>, Error> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(Error::Server(format!(
            "expected a list, got: {other}"
        ))),
    }
}
