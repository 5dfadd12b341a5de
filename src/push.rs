//! The push reactor: a background consumer of the `bookAdded`
//! subscription that keeps the cache in step with mutations made by
//! other clients, and derives the transient notification feed.
//!
//! The reactor never terminates on its own while a session is active.
//! Connection loss sends it through bounded exponential backoff and a
//! fresh subscribe; redelivered events are harmless because the merge
//! engine is idempotent; malformed events are logged and dropped. The
//! only teardown is an explicit shutdown, normally driven by logout.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde_json::Value;

use crate::client::{CacheState, Change, Observers};
use crate::entity::decode_book;
use crate::merge::merge_book_across_views;
use crate::transport::Transport;

/// Subscription name on the remote schema.
const BOOK_ADDED: &str = "bookAdded";

/// Connection state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
}

pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub(crate) fn new() -> Self {
        StatusCell(AtomicU8::new(ConnState::Disconnected as u8))
    }

    pub(crate) fn set(&self, state: ConnState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn get(&self) -> ConnState {
        match self.0.load(Ordering::SeqCst) {
            1 => ConnState::Connecting,
            2 => ConnState::Connected,
            3 => ConnState::Reconnecting,
            _ => ConnState::Disconnected,
        }
    }
}

/// Bounded exponential backoff: doubles from `base` up to `max`, reset
/// on a successful connect.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub const DEFAULT_BASE: Duration = Duration::from_secs(1);
    pub const DEFAULT_MAX: Duration = Duration::from_secs(10);

    pub fn new(base: Duration, max: Duration) -> Self {
        Backoff {
            base,
            max,
            current: base,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = self.current.checked_mul(2).unwrap_or(self.max);
        self.current = next.min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(Self::DEFAULT_BASE, Self::DEFAULT_MAX)
    }
}

/// A transient "new book arrived" message for the UI.
#[derive(Debug, Clone)]
pub struct Notification {
    pub title: String,
    pub author_name: String,
    posted_at: Instant,
}

impl Notification {
    pub(crate) fn new(title: &str, author_name: &str) -> Self {
        Notification {
            title: title.to_string(),
            author_name: author_name.to_string(),
            posted_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.posted_at.elapsed()
    }
}

/// Holds notifications for a fixed display lifetime, after which they
/// auto-clear. Expiry is lazy: expired entries are pruned on the next
/// push or read, no timer thread involved.
#[derive(Debug)]
pub struct NotificationFeed {
    entries: VecDeque<Notification>,
    ttl: Duration,
}

impl NotificationFeed {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self::with_ttl(Self::DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        NotificationFeed {
            entries: VecDeque::new(),
            ttl,
        }
    }

    pub fn push(&mut self, notification: Notification) {
        self.prune();
        self.entries.push_back(notification);
    }

    /// Notifications still within their display lifetime, oldest first.
    pub fn live(&self) -> Vec<Notification> {
        self.entries
            .iter()
            .filter(|n| n.age() < self.ttl)
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn prune(&mut self) {
        while let Some(front) = self.entries.front() {
            if front.age() < self.ttl {
                break;
            }
            self.entries.pop_front();
        }
    }
}

impl Default for NotificationFeed {
    fn default() -> Self {
        NotificationFeed::new()
    }
}

pub(crate) struct PushReactor {
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<CacheState>>,
    observers: Observers,
    status: Arc<StatusCell>,
    shutdown: Arc<AtomicBool>,
    backoff: Backoff,
}

/// Control handle for a running reactor thread.
pub struct ReactorHandle {
    status: Arc<StatusCell>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReactorHandle {
    pub fn status(&self) -> ConnState {
        self.status.get()
    }

    /// Ask the reactor to stop. The thread is not joined: it may be
    /// blocked inside the channel waiting for an event, and exits on
    /// the next event, disconnect, or backoff tick.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.status.set(ConnState::Disconnected);
    }
}

impl Drop for ReactorHandle {
    fn drop(&mut self) {
        self.shutdown();
        // Detach; see shutdown().
        self.thread.take();
    }
}

impl PushReactor {
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        state: Arc<Mutex<CacheState>>,
        observers: Observers,
        backoff: Backoff,
    ) -> ReactorHandle {
        let status = Arc::new(StatusCell::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let reactor = PushReactor {
            transport,
            state,
            observers,
            status: Arc::clone(&status),
            shutdown: Arc::clone(&shutdown),
            backoff,
        };
        let thread = thread::spawn(move || reactor.run());
        ReactorHandle {
            status,
            shutdown,
            thread: Some(thread),
        }
    }

    fn run(mut self) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.status.set(ConnState::Connecting);
            match self.transport.subscribe(BOOK_ADDED) {
                Ok(mut channel) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    info!("push channel connected");
                    self.status.set(ConnState::Connected);
                    self.backoff.reset();
                    loop {
                        if self.shutdown.load(Ordering::SeqCst) {
                            self.status.set(ConnState::Disconnected);
                            return;
                        }
                        match channel.next() {
                            Ok(Some(payload)) => self.handle_event(payload),
                            Ok(None) => {
                                info!("push channel closed by server");
                                break;
                            }
                            Err(e) => {
                                warn!("push channel dropped: {e}");
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!("push connect failed: {e}"),
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.status.set(ConnState::Reconnecting);
            let delay = self.backoff.next_delay();
            debug!("push channel reconnecting in {delay:?}");
            if !sleep_unless_shutdown(&self.shutdown, delay) {
                break;
            }
        }
        self.status.set(ConnState::Disconnected);
    }

    /// Apply one `bookAdded` event: merge across views and post a
    /// notification. Malformed payloads are dropped with a log line.
    /// The book list is browsable without a session, so events are
    /// applied whether or not anyone is logged in; only a reactor
    /// already asked to shut down ignores them.
    fn handle_event(&self, payload: Value) {
        if self.shutdown.load(Ordering::SeqCst) {
            debug!("ignoring push event: reactor shut down");
            return;
        }
        let record = match decode_book(payload) {
            Ok(record) => record,
            Err(e) => {
                warn!("dropping malformed push event: {e}");
                return;
            }
        };

        let mut changes = Vec::new();
        {
            let mut state = lock(&self.state);
            // Reborrow so views and store split as disjoint fields
            // rather than two mutable borrows of the guard.
            let state = &mut *state;
            let outcome = merge_book_across_views(
                &mut state.views,
                &mut state.store,
                &record.book,
                &record.author_name,
            );
            state
                .feed
                .push(Notification::new(&record.book.title, &record.author_name));
            if outcome.newly_added {
                changes.push(Change::BookMerged(record.book.id.clone()));
            }
            changes.push(Change::NotificationPosted);
        }
        notify(&self.observers, &changes);
    }
}

pub(crate) fn lock(state: &Mutex<CacheState>) -> std::sync::MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn notify(observers: &Observers, changes: &[Change]) {
    let observers = observers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    for change in changes {
        for observer in observers.iter() {
            observer(change);
        }
    }
}

/// Sleep in short slices so a shutdown request does not wait out a full
/// backoff delay. Returns `false` if shutdown was requested.
fn sleep_unless_shutdown(shutdown: &AtomicBool, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        thread::sleep(remaining.min(Duration::from_millis(25)));
    }
    !shutdown.load(Ordering::SeqCst)
}
