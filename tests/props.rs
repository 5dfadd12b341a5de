use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;
use shelfsync::{
    merge_book_across_views, merge_book_into_view, Book, EntityStore, Selector, ViewIndex,
};

const GENRES: [&str; 4] = ["scifi", "fantasy", "crime", "poetry"];

/// Books are immutable: the same id must always carry the same fields,
/// so everything derives from the id. Redelivery is then exactly what
/// the push channel produces in production.
fn book_from_id(id: u32) -> Book {
    let mut genres: Vec<&str> = GENRES
        .iter()
        .enumerate()
        .filter(|(i, _)| (id >> i) & 1 == 1)
        .map(|(_, g)| *g)
        .collect();
    if genres.is_empty() {
        genres.push(GENRES[id as usize % GENRES.len()]);
    }
    Book::new(
        format!("b{id}"),
        format!("Book {id}"),
        1900 + id as i32,
        genres,
        format!("a{}", id % 3),
    )
}

fn arb_book() -> impl Strategy<Value = Book> {
    (0..24u32).prop_map(book_from_id)
}

/// A merge stream: books arriving in arbitrary order, with repetitions
/// standing in for redelivered push events and response/push overlap.
fn arb_merge_stream() -> impl Strategy<Value = Vec<Book>> {
    proptest::collection::vec(arb_book(), 0..60)
}

/// Which genre views start out initialized (the unfiltered view always is).
fn arb_open_views() -> impl Strategy<Value = BTreeSet<usize>> {
    proptest::collection::btree_set(0..GENRES.len(), 0..=GENRES.len())
}

fn setup(open_genres: &BTreeSet<usize>) -> (ViewIndex, EntityStore) {
    let mut index = ViewIndex::new();
    index.populate(Selector::AllBooks, Vec::new());
    index.populate_authors(Vec::new());
    for i in open_genres {
        index.populate(Selector::genre(GENRES[*i]), Vec::new());
    }
    (index, EntityStore::new())
}

fn run_stream(index: &mut ViewIndex, store: &mut EntityStore, stream: &[Book]) {
    for book in stream {
        merge_book_across_views(index, store, book, "author");
    }
}

proptest! {
    // A single book merged twice into the same view leaves the view
    // exactly as a single merge does.
    #[test]
    fn prop_merge_is_idempotent(book in arb_book(), open in arb_open_views()) {
        let (mut index, _) = setup(&open);
        let selector = Selector::AllBooks;

        merge_book_into_view(&mut index, &selector, &book);
        let once: Vec<_> = index.view(&selector).unwrap().to_vec();
        merge_book_into_view(&mut index, &selector, &book);
        let twice: Vec<_> = index.view(&selector).unwrap().to_vec();

        prop_assert_eq!(once, twice);
    }

    // No view ever holds the same book id twice, whatever arrives.
    #[test]
    fn prop_no_view_holds_duplicates(stream in arb_merge_stream(), open in arb_open_views()) {
        let (mut index, mut store) = setup(&open);
        run_stream(&mut index, &mut store, &stream);

        let selectors: Vec<Selector> = index.initialized_selectors().cloned().collect();
        for selector in selectors {
            let ids = index.view(&selector).unwrap();
            let distinct: BTreeSet<_> = ids.iter().collect();
            prop_assert_eq!(distinct.len(), ids.len(), "duplicates in {}", selector);
        }
    }

    // A genre view holds exactly the merged books carrying that genre.
    #[test]
    fn prop_genre_views_are_correct(stream in arb_merge_stream(), open in arb_open_views()) {
        let (mut index, mut store) = setup(&open);
        run_stream(&mut index, &mut store, &stream);

        for i in &open {
            let genre = GENRES[*i];
            let ids = index.view(&Selector::genre(genre)).unwrap();
            for id in ids {
                let book = store.book(id).expect("view references a stored book");
                prop_assert!(book.in_genre(genre), "{} lacks genre {genre}", book.title);
            }
            // Conversely: every merged book with the genre is present.
            let all = index.view(&Selector::AllBooks).unwrap();
            for id in all {
                let book = store.book(id).unwrap();
                if book.in_genre(genre) {
                    prop_assert!(
                        ids.contains(id),
                        "{} missing from open genre view {genre}",
                        book.title
                    );
                }
            }
        }
    }

    // An author's book count equals the number of distinct book ids
    // merged for that author, however often each was redelivered.
    #[test]
    fn prop_book_counts_match_distinct_merges(stream in arb_merge_stream()) {
        let (mut index, mut store) = setup(&BTreeSet::new());
        run_stream(&mut index, &mut store, &stream);

        let mut expected: HashMap<String, BTreeSet<String>> = HashMap::new();
        for book in &stream {
            expected
                .entry(book.author_id.0.clone())
                .or_default()
                .insert(book.id.0.clone());
        }

        for (author_id, ids) in expected {
            let author = store
                .author(&shelfsync::AuthorId(author_id.clone()))
                .expect("merged author exists");
            prop_assert_eq!(author.book_count as usize, ids.len());
        }
    }

    // Replaying the whole stream a second time changes nothing.
    #[test]
    fn prop_replay_is_a_fixed_point(stream in arb_merge_stream(), open in arb_open_views()) {
        let (mut index, mut store) = setup(&open);
        run_stream(&mut index, &mut store, &stream);

        let before: Vec<(Selector, Vec<_>)> = index
            .initialized_selectors()
            .cloned()
            .map(|s| {
                let ids = index.view(&s).unwrap().to_vec();
                (s, ids)
            })
            .collect();

        run_stream(&mut index, &mut store, &stream);

        for (selector, ids) in before {
            prop_assert_eq!(index.view(&selector).unwrap(), ids.as_slice());
        }
    }
}
