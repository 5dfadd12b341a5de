use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Stable identifier of a [`Book`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(pub String);

/// Stable identifier of an [`Author`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorId(pub String);

impl From<&str> for BookId {
    fn from(s: &str) -> Self {
        BookId(s.to_string())
    }
}

impl From<&str> for AuthorId {
    fn from(s: &str) -> Self {
        AuthorId(s.to_string())
    }
}

/// A catalog entry. Immutable once created — there is no book-edit
/// operation; books enter the cache through a create-book response,
/// a list fetch, or a push event.
///
/// The owning author is referenced by id only. Author fields live in
/// the entity store, never forked into the book.
///
/// # Examples
///
/// ```
/// use shelfsync::Book;
///
/// let book = Book::new("b1", "Clean Code", 2008, ["programming", "craft"], "a1");
/// assert_eq!(book.title, "Clean Code");
/// assert!(book.in_genre("craft"));
/// assert!(!book.in_genre("poetry"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub published: i32,
    /// Non-empty set of genre labels. Order is the wire order; membership
    /// is what matters for view selection.
    pub genres: Vec<String>,
    pub author_id: AuthorId,
}

impl Book {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        published: i32,
        genres: impl IntoIterator<Item = impl Into<String>>,
        author_id: impl Into<String>,
    ) -> Self {
        Book {
            id: BookId(id.into()),
            title: title.into(),
            published,
            genres: genres.into_iter().map(Into::into).collect(),
            author_id: AuthorId(author_id.into()),
        }
    }

    /// Whether `genre` is a member of this book's genre set.
    pub fn in_genre(&self, genre: &str) -> bool {
        self.genres.iter().any(|g| g == genre)
    }
}

/// An author record. `name` is unique within the system and is the
/// lookup key for the edit-birth-year operation. `book_count` is
/// derived: the server reports it on fetch, and the merge engine
/// increments it once per distinct new book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: AuthorId,
    pub name: String,
    pub born: Option<i32>,
    pub book_count: u32,
}

impl Author {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Author {
            id: AuthorId(id.into()),
            name: name.into(),
            born: None,
            book_count: 0,
        }
    }

    pub fn with_born(mut self, born: i32) -> Self {
        self.born = Some(born);
        self
    }

    pub fn with_book_count(mut self, count: u32) -> Self {
        self.book_count = count;
        self
    }
}

/// The authenticated principal. At most one is meaningful at a time;
/// cleared on logout along with everything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub favorite_genre: String,
}

// Wire shapes. The transport hands back untyped JSON; these are the
// camelCase payloads the remote API actually produces.

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookWire {
    id: String,
    title: String,
    published: i32,
    genres: Vec<String>,
    author: AuthorWire,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorWire {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    born: Option<i32>,
    #[serde(default)]
    book_count: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserWire {
    id: String,
    username: String,
    favorite_genre: String,
}

/// Decoded book payload: the book plus enough about its author to seed
/// the entity store when the author has not been fetched yet.
#[derive(Debug, Clone, PartialEq)]
pub struct BookRecord {
    pub book: Book,
    pub author_name: String,
}

/// Decode a book payload (`addBook` response, `allBooks` element, or
/// `bookAdded` push event).
///
/// Some payloads carry only the author's name; the author id then falls
/// back to the name, which is unique system-wide. An empty genre set is
/// rejected — every book carries at least one genre.
pub fn decode_book(value: serde_json::Value) -> Result<BookRecord, Error> {
    let wire: BookWire = serde_json::from_value(value).map_err(Error::malformed)?;
    if wire.genres.is_empty() {
        return Err(Error::Server(format!(
            "book '{}' arrived with no genres",
            wire.title
        )));
    }
    let author_id = wire.author.id.unwrap_or_else(|| wire.author.name.clone());
    Ok(BookRecord {
        book: Book {
            id: BookId(wire.id),
            title: wire.title,
            published: wire.published,
            genres: wire.genres,
            author_id: AuthorId(author_id),
        },
        author_name: wire.author.name,
    })
}

/// Decode an author payload (`allAuthors` element or `editAuthor` response).
pub fn decode_author(value: serde_json::Value) -> Result<Author, Error> {
    let wire: AuthorWire = serde_json::from_value(value).map_err(Error::malformed)?;
    Ok(Author {
        id: AuthorId(wire.id.unwrap_or_else(|| wire.name.clone())),
        name: wire.name,
        born: wire.born,
        book_count: wire.book_count.unwrap_or(0),
    })
}

/// Decode a `me` payload.
pub fn decode_user(value: serde_json::Value) -> Result<User, Error> {
    let wire: UserWire = serde_json::from_value(value).map_err(Error::malformed)?;
    Ok(User {
        id: wire.id,
        username: wire.username,
        favorite_genre: wire.favorite_genre,
    })
}
