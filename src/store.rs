use std::collections::HashMap;

use crate::entity::{Author, AuthorId, Book, BookId, User};

/// Normalized in-memory store of canonical entity state.
///
/// The store is the sole owner of entity fields; views reference
/// entities by id and never hold a forked copy. `clear` bumps an epoch
/// so that responses captured before a logout can be recognized as
/// stale and discarded instead of repopulating a wiped store.
#[derive(Debug, Default)]
pub struct EntityStore {
    books: HashMap<BookId, Book>,
    authors: HashMap<AuthorId, Author>,
    user: Option<User>,
    epoch: u64,
}

impl EntityStore {
    pub fn new() -> Self {
        EntityStore::default()
    }

    /// Insert or replace a book. Returns `true` if the id was not
    /// present before — the merge engine uses this as its
    /// once-per-distinct-book guard.
    pub fn upsert_book(&mut self, book: Book) -> bool {
        self.books.insert(book.id.clone(), book).is_none()
    }

    pub fn book(&self, id: &BookId) -> Option<&Book> {
        self.books.get(id)
    }

    /// Insert or replace an author. Returns `true` if newly added.
    pub fn upsert_author(&mut self, author: Author) -> bool {
        self.authors.insert(author.id.clone(), author).is_none()
    }

    /// Insert an author only if the id is unknown. Used when a book
    /// payload names an author we have not fetched — the stub must not
    /// overwrite a fetched record's born/book_count.
    pub fn ensure_author(&mut self, id: &AuthorId, name: &str) {
        self.authors
            .entry(id.clone())
            .or_insert_with(|| Author::new(id.0.clone(), name));
    }

    pub fn author(&self, id: &AuthorId) -> Option<&Author> {
        self.authors.get(id)
    }

    pub fn author_mut(&mut self, id: &AuthorId) -> Option<&mut Author> {
        self.authors.get_mut(id)
    }

    /// Look an author up by name — the edit-birth-year operation keys
    /// on the (system-wide unique) name, not the id.
    pub fn author_by_name_mut(&mut self, name: &str) -> Option<&mut Author> {
        self.authors.values_mut().find(|a| a.name == name)
    }

    /// Update an author's birth year in place, leaving every other
    /// field (the derived book count included) untouched. Returns
    /// `false` when the id is unknown.
    pub fn set_author_born(&mut self, id: &AuthorId, born: Option<i32>) -> bool {
        match self.authors.get_mut(id) {
            Some(author) => {
                author.born = born;
                true
            }
            None => false,
        }
    }

    pub fn set_user(&mut self, user: User) {
        self.user = Some(user);
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn book_count(&self) -> usize {
        self.books.len()
    }

    pub fn author_count(&self) -> usize {
        self.authors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty() && self.authors.is_empty() && self.user.is_none()
    }

    /// Wipe all entities and advance the epoch. Idempotent, never fails.
    pub fn clear(&mut self) {
        self.books.clear();
        self.authors.clear();
        self.user = None;
        self.epoch += 1;
    }

    /// Current store epoch. A response applied under an older epoch is
    /// stale — the session it belonged to has been torn down.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}
