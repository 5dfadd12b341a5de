use std::collections::HashMap;
use std::fmt;

use crate::entity::{AuthorId, BookId};

/// Names a book view: the unfiltered list, or the list restricted to
/// one genre.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    AllBooks,
    Genre(String),
}

impl Selector {
    pub fn genre(genre: impl Into<String>) -> Self {
        Selector::Genre(genre.into())
    }

    /// Whether a book carrying `genres` belongs in this view.
    pub fn matches(&self, genres: &[String]) -> bool {
        match self {
            Selector::AllBooks => true,
            Selector::Genre(g) => genres.iter().any(|x| x == g),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::AllBooks => f.write_str("all books"),
            Selector::Genre(g) => write!(f, "genre '{g}'"),
        }
    }
}

/// Named, ordered result sets over the entity store.
///
/// A view is an ordered sequence of book ids. Views are created lazily:
/// a selector that has never been populated is "not cached", which is a
/// signal to the caller to fetch, not an error. Each id appears at most
/// once per view; the merge engine relies on `contains` to keep it that
/// way.
///
/// The authors list lives here too — it is the third named result set
/// ("all authors") and follows the same initialized-or-absent rule.
#[derive(Debug, Default)]
pub struct ViewIndex {
    books: HashMap<Selector, Vec<BookId>>,
    authors: Option<Vec<AuthorId>>,
}

impl ViewIndex {
    pub fn new() -> Self {
        ViewIndex::default()
    }

    /// The current sequence for `selector`, or `None` when the view has
    /// never been populated (or was invalidated).
    pub fn view(&self, selector: &Selector) -> Option<&[BookId]> {
        self.books.get(selector).map(Vec::as_slice)
    }

    pub fn is_initialized(&self, selector: &Selector) -> bool {
        self.books.contains_key(selector)
    }

    pub fn contains(&self, selector: &Selector, id: &BookId) -> bool {
        self.books
            .get(selector)
            .is_some_and(|ids| ids.iter().any(|x| x == id))
    }

    /// Replace the view's contents with an authoritative result set,
    /// initializing it on first use.
    pub fn populate(&mut self, selector: Selector, ids: Vec<BookId>) {
        self.books.insert(selector, ids);
    }

    /// Append an id to an initialized view. Callers are expected to
    /// have checked `contains` first; appending to an uninitialized
    /// view is a no-op — the next fetch will include the book anyway.
    pub fn append(&mut self, selector: &Selector, id: BookId) {
        if let Some(ids) = self.books.get_mut(selector) {
            ids.push(id);
        }
    }

    /// Drop a view so the next read is a cache miss, forcing the caller
    /// back to the authoritative source. Unknown selectors are ignored.
    pub fn invalidate(&mut self, selector: &Selector) {
        self.books.remove(selector);
    }

    /// Selectors of every currently initialized book view.
    pub fn initialized_selectors(&self) -> impl Iterator<Item = &Selector> {
        self.books.keys()
    }

    pub fn authors(&self) -> Option<&[AuthorId]> {
        self.authors.as_deref()
    }

    pub fn populate_authors(&mut self, ids: Vec<AuthorId>) {
        self.authors = Some(ids);
    }

    /// Append an author to an initialized authors list, skipping
    /// duplicates. No-op while the list is uninitialized.
    pub fn append_author(&mut self, id: AuthorId) {
        if let Some(ids) = &mut self.authors {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }

    pub fn invalidate_authors(&mut self) {
        self.authors = None;
    }

    /// Wipe every view back to uninitialized. Used on logout.
    pub fn clear(&mut self) {
        self.books.clear();
        self.authors = None;
    }
}
