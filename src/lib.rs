mod client;
mod entity;
mod error;
mod merge;
mod push;
mod session;
mod store;
mod transport;
mod view;

pub use client::{Change, LibraryClient, LibraryClientBuilder, NewBookFields, SignupFields};
pub use entity::{
    decode_author, decode_book, decode_user, Author, AuthorId, Book, BookId, BookRecord, User,
};
pub use error::Error;
pub use merge::{merge_book_across_views, merge_book_into_view, MergeOutcome};
pub use push::{Backoff, ConnState, Notification, NotificationFeed, ReactorHandle};
pub use session::SessionGate;
pub use store::EntityStore;
pub use transport::{MemoryTokenStorage, PushChannel, TokenStorage, Transport};
pub use view::{Selector, ViewIndex};
