//! The merge engine: pure functions that fold one incoming book into
//! every affected view without ever duplicating an entry.
//!
//! Two paths feed the same merge: the response to a local create-book
//! mutation, and `bookAdded` push events from other clients. Delivery
//! order between the two is not guaranteed, and push events may be
//! redelivered after a reconnect. The duplicate check here is the sole
//! correctness mechanism against double-application, so it must hold
//! regardless of arrival order or repetition.

use log::debug;

use crate::entity::Book;
use crate::store::EntityStore;
use crate::view::{Selector, ViewIndex};

/// What a cross-view merge actually did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    /// The book id was not in the store before this merge. Exactly one
    /// merge per distinct book reports `true`, and only that merge
    /// increments the author's book count.
    pub newly_added: bool,
    /// Views that gained an entry.
    pub views_touched: Vec<Selector>,
}

/// Merge one book into one view.
///
/// Returns `true` if the view gained an entry. Idempotent: an
/// uninitialized view and a view already containing the book are both
/// no-ops, and a book whose genres do not match the selector is left
/// out. Appends preserve prior order; there is no re-sort.
///
/// # Examples
///
/// ```
/// use shelfsync::{merge_book_into_view, Book, Selector, ViewIndex};
///
/// let mut index = ViewIndex::new();
/// index.populate(Selector::AllBooks, Vec::new());
///
/// let book = Book::new("b1", "Dune", 1965, ["scifi"], "a1");
/// assert!(merge_book_into_view(&mut index, &Selector::AllBooks, &book));
/// // Second application changes nothing.
/// assert!(!merge_book_into_view(&mut index, &Selector::AllBooks, &book));
/// assert_eq!(index.view(&Selector::AllBooks).unwrap().len(), 1);
/// ```
pub fn merge_book_into_view(index: &mut ViewIndex, selector: &Selector, book: &Book) -> bool {
    if !index.is_initialized(selector) {
        // Nothing to merge into; the next fetch includes the book.
        return false;
    }
    if index.contains(selector, &book.id) {
        return false;
    }
    if !selector.matches(&book.genres) {
        return false;
    }
    index.append(selector, book.id.clone());
    true
}

/// Merge one book into the store and every initialized view it belongs
/// in, bumping the owning author's derived book count exactly once per
/// distinct book id.
///
/// `author_name` seeds a stub author record when the book names an
/// author that has not been fetched yet; an already-known author keeps
/// its fetched fields. Genre views that were never initialized stay
/// uninitialized — the engine does not speculatively create views for
/// genres it first hears about in a push event.
pub fn merge_book_across_views(
    index: &mut ViewIndex,
    store: &mut EntityStore,
    book: &Book,
    author_name: &str,
) -> MergeOutcome {
    let newly_added = store.upsert_book(book.clone());
    store.ensure_author(&book.author_id, author_name);

    if newly_added {
        if let Some(author) = store.author_mut(&book.author_id) {
            author.book_count += 1;
        }
        index.append_author(book.author_id.clone());
    }

    let selectors: Vec<Selector> = index.initialized_selectors().cloned().collect();
    let mut views_touched = Vec::new();
    for selector in selectors {
        if merge_book_into_view(index, &selector, book) {
            views_touched.push(selector);
        }
    }

    debug!(
        "merged '{}' ({}): new={newly_added}, views touched={}",
        book.title,
        book.id.0,
        views_touched.len()
    );

    MergeOutcome {
        newly_added,
        views_touched,
    }
}
