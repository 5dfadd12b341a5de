#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use serde_json::{json, Value};
use shelfsync::{Error, PushChannel, Transport};

/// Scripted in-memory server. Queries and mutations run against a small
/// book/author table; push channels are handed out from a queue the
/// test filled in advance.
pub struct FakeTransport {
    state: Mutex<ServerState>,
    channels: Mutex<VecDeque<FakeChannel>>,
    /// One-shot gate: when set, the next query signals entry and then
    /// blocks until the test sends a release. Used to stage a
    /// late-arriving response.
    query_gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    pub subscribe_calls: AtomicUsize,
}

struct ServerState {
    books: Vec<Value>,
    authors: Vec<Value>,
    me: Value,
    next_book_id: usize,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport {
            state: Mutex::new(ServerState {
                books: Vec::new(),
                authors: Vec::new(),
                me: Value::Null,
                next_book_id: 1,
            }),
            channels: Mutex::new(VecDeque::new()),
            query_gate: Mutex::new(None),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    /// Seed a book the server already knows about.
    pub fn seed_book(&self, id: &str, title: &str, published: i32, genres: &[&str], author: &str) {
        let mut state = self.state.lock().unwrap();
        state.books.push(book_value(id, title, published, genres, author));
        bump_author(&mut state.authors, author);
    }

    pub fn seed_author(&self, id: &str, name: &str, born: Option<i32>, book_count: u32) {
        let mut state = self.state.lock().unwrap();
        state.authors.push(json!({
            "id": id,
            "name": name,
            "born": born,
            "bookCount": book_count,
        }));
    }

    pub fn set_me(&self, id: &str, username: &str, favorite_genre: &str) {
        self.state.lock().unwrap().me = json!({
            "id": id,
            "username": username,
            "favoriteGenre": favorite_genre,
        });
    }

    /// Queue a push channel for the next `subscribe` call. Returns the
    /// sender the test feeds events through; dropping it closes the
    /// channel cleanly.
    pub fn queue_push_channel(&self) -> Sender<Result<Value, Error>> {
        let (tx, rx) = mpsc::channel();
        self.channels.lock().unwrap().push_back(FakeChannel { rx });
        tx
    }

    /// Make the next query block. Returns `(release, entered)`: the
    /// query sends on `entered` once it is in flight and waits for
    /// `release` before answering.
    pub fn gate_next_query(&self) -> (Sender<()>, Receiver<()>) {
        let (release_tx, release_rx) = mpsc::channel();
        let (entered_tx, entered_rx) = mpsc::channel();
        *self.query_gate.lock().unwrap() = Some((entered_tx, release_rx));
        (release_tx, entered_rx)
    }
}

impl Transport for FakeTransport {
    fn query(&self, name: &str, params: Value) -> Result<Value, Error> {
        if let Some((entered, release)) = self.query_gate.lock().unwrap().take() {
            let _ = entered.send(());
            let _ = release.recv();
        }
        let state = self.state.lock().unwrap();
        match name {
            "allBooks" => {
                let genre = params.get("genre").and_then(Value::as_str);
                let books: Vec<Value> = state
                    .books
                    .iter()
                    .filter(|b| match genre {
                        None => true,
                        Some(g) => b["genres"]
                            .as_array()
                            .is_some_and(|gs| gs.iter().any(|x| x == g)),
                    })
                    .cloned()
                    .collect();
                Ok(Value::Array(books))
            }
            "allAuthors" => Ok(Value::Array(state.authors.clone())),
            "me" => Ok(state.me.clone()),
            other => Err(Error::Server(format!("unknown query: {other}"))),
        }
    }

    fn mutate(&self, name: &str, params: Value) -> Result<Value, Error> {
        let mut state = self.state.lock().unwrap();
        match name {
            "addBook" => {
                let id = format!("b{}", state.next_book_id);
                state.next_book_id += 1;
                let genres: Vec<&str> = params["genres"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .filter_map(Value::as_str)
                    .collect();
                let book = book_value(
                    &id,
                    params["title"].as_str().unwrap(),
                    params["published"].as_i64().unwrap() as i32,
                    &genres,
                    params["author"].as_str().unwrap(),
                );
                state.books.push(book.clone());
                let author = params["author"].as_str().unwrap().to_string();
                bump_author(&mut state.authors, &author);
                Ok(book)
            }
            "editAuthor" => {
                let name = params["name"].as_str().unwrap();
                let born = params["setBornTo"].clone();
                for author in &mut state.authors {
                    if author["name"] == name {
                        author["born"] = born;
                        return Ok(author.clone());
                    }
                }
                Err(Error::Server(format!("author '{name}' not found")))
            }
            "login" => {
                let username = params["username"].as_str().unwrap();
                if params["password"] == "secret" {
                    Ok(json!({ "value": format!("tok-{username}") }))
                } else {
                    Err(Error::Auth("wrong credentials".to_string()))
                }
            }
            "createUser" => Ok(json!({
                "id": "u-new",
                "username": params["username"],
                "favoriteGenre": params["favoriteGenre"],
            })),
            other => Err(Error::Server(format!("unknown mutation: {other}"))),
        }
    }

    fn subscribe(&self, _name: &str) -> Result<Box<dyn PushChannel>, Error> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        match self.channels.lock().unwrap().pop_front() {
            Some(chan) => Ok(Box::new(chan)),
            None => Err(Error::Transport("push endpoint unreachable".to_string())),
        }
    }
}

struct FakeChannel {
    rx: Receiver<Result<Value, Error>>,
}

impl PushChannel for FakeChannel {
    fn next(&mut self) -> Result<Option<Value>, Error> {
        match self.rx.recv() {
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(e)) => Err(e),
            // Sender dropped: clean close.
            Err(_) => Ok(None),
        }
    }
}

/// A book payload in the wire shape the remote API produces.
pub fn book_value(id: &str, title: &str, published: i32, genres: &[&str], author: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "published": published,
        "genres": genres,
        "author": { "id": format!("author-{author}"), "name": author },
    })
}

fn bump_author(authors: &mut Vec<Value>, name: &str) {
    for author in authors.iter_mut() {
        if author["name"] == name {
            let count = author["bookCount"].as_u64().unwrap_or(0);
            author["bookCount"] = json!(count + 1);
            return;
        }
    }
    authors.push(json!({
        "id": format!("author-{name}"),
        "name": name,
        "born": Value::Null,
        "bookCount": 1,
    }));
}
