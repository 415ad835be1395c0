//! The persistence collaborator, as an injectable trait.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;
use vellum_extract::models::{PatternTag, Work};

use crate::error::Result;
use crate::models::{Book, BookState, Page, Replacement, VirtualBook};

pub type RegistryHandle = Arc<dyn Registry>;

/// Books and the virtual books projected from them.
///
/// The registry is the only source of truth for virtual book identity.
/// Implementations keep every virtual book attached to an existing book:
/// writes for an unknown parent are rejected before anything is written, and
/// deleting a book deletes its virtual books with it.
#[async_trait]
pub trait Registry: Send + Sync {
    // =========================================================================
    // Books
    // =========================================================================

    async fn get_book(&self, id: &str) -> Result<Option<Book>>;

    /// Books ordered by library path.
    async fn list_books(&self, page: Page) -> Result<Vec<Book>>;

    /// Insert a book, or replace every field of the book with the same id.
    async fn upsert_book(&self, book: &Book) -> Result<()>;

    /// Delete a book and, by cascade, its virtual books.
    ///
    /// Returns the ids of the virtual books that went with it. Fails with
    /// [`ParentNotFound`](crate::error::ErrorKind::ParentNotFound) when the
    /// book does not exist.
    async fn delete_book(&self, id: &str) -> Result<Vec<Uuid>>;

    /// Record the outcome of processing a book, stamping the processing time.
    async fn record_outcome(&self, id: &str, state: &BookState, pattern: Option<PatternTag>) -> Result<()>;

    // =========================================================================
    // Virtual books
    // =========================================================================

    /// Make `works` the complete set of virtual books of `parent_id`.
    ///
    /// Works are matched to existing virtual books by position: a match
    /// keeps its id and has its fields updated, a work without a match is
    /// inserted with a fresh id, and an existing virtual book whose position
    /// is absent from `works` is deleted. Runs atomically.
    async fn replace_for_parent(&self, parent_id: &str, works: &[Work]) -> Result<Replacement>;

    async fn get(&self, id: Uuid) -> Result<Option<VirtualBook>>;

    /// Virtual books of one parent, in position order.
    async fn list_by_parent(&self, parent_id: &str, page: Page) -> Result<Vec<VirtualBook>>;

    /// All virtual books of several parents, grouped by parent id and in
    /// position order. Parents without virtual books are absent.
    async fn list_by_parents(&self, parent_ids: &[String]) -> Result<BTreeMap<String, Vec<VirtualBook>>>;

    /// Delete every virtual book of a parent, returning their ids.
    async fn delete_by_parent(&self, parent_id: &str) -> Result<Vec<Uuid>>;
}

pub(crate) fn group_by_parent(virtual_books: Vec<VirtualBook>) -> BTreeMap<String, Vec<VirtualBook>> {
    let mut map: BTreeMap<String, Vec<VirtualBook>> = BTreeMap::new();
    for vb in virtual_books {
        map.entry(vb.parent_id.clone()).or_default().push(vb);
    }
    for list in map.values_mut() {
        list.sort_by_key(|vb| vb.position);
    }
    map
}

/// Behaviour every [`Registry`] implementation shares, run against each.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use crate::error::ErrorKind;
    use time::OffsetDateTime;
    use vellum_extract::models::WorkKind;

    pub(crate) fn book(id: &str, path: &str) -> Book {
        let modified = OffsetDateTime::UNIX_EPOCH + time::Duration::milliseconds(1_700_000_000_123);
        Book::new(id, path, "application/epub+zip", "The Trilogy", 4096, modified)
            .with_authors(vec!["Ann Author".into(), "Bea Author".into()])
            .with_language(Some("en".into()))
    }

    pub(crate) fn works(titles: &[&str]) -> Vec<Work> {
        titles
            .iter()
            .enumerate()
            .map(|(i, title)| Work::new(*title, i as u32 + 1, format!("text/book{}.xhtml", i + 1), WorkKind::Novel))
            .collect()
    }

    pub(crate) async fn books_round_trip(registry: &dyn Registry) {
        let mut book = book("b1", "Fantasy/The Trilogy.epub");
        registry.upsert_book(&book).await.unwrap();
        assert_eq!(registry.get_book("b1").await.unwrap(), Some(book.clone()));
        book.title = "The Complete Trilogy".into();
        registry.upsert_book(&book).await.unwrap();
        assert_eq!(registry.get_book("b1").await.unwrap().unwrap().title, "The Complete Trilogy");
        assert_eq!(registry.get_book("missing").await.unwrap(), None);
    }

    pub(crate) async fn replace_keeps_ids_by_position(registry: &dyn Registry) {
        registry.upsert_book(&book("b1", "a.epub")).await.unwrap();
        let first = registry.replace_for_parent("b1", &works(&["One", "Two", "Three", "Four", "Five"])).await.unwrap();
        assert_eq!(first.virtual_books.len(), 5);
        let positions: Vec<_> = first.virtual_books.iter().map(|vb| vb.position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4, 5]);

        let again = registry.replace_for_parent("b1", &works(&["One", "Two", "Three", "Four", "Five"])).await.unwrap();
        let ids = |r: &Replacement| r.virtual_books.iter().map(|vb| vb.id).collect::<Vec<_>>();
        assert_eq!(ids(&again), ids(&first));
        assert!(again.removed.is_empty());

        let shrunk = registry.replace_for_parent("b1", &works(&["One", "Deux"])).await.unwrap();
        assert_eq!(ids(&shrunk), ids(&first)[..2].to_vec());
        assert_eq!(shrunk.removed.len(), 3);
        let listed = registry.list_by_parent("b1", Page::default()).await.unwrap();
        assert_eq!(listed, shrunk.virtual_books);
        assert_eq!(listed[1].title, "Deux");
        assert_eq!(registry.get(first.virtual_books[4].id).await.unwrap(), None);
    }

    pub(crate) async fn replace_rejects_unknown_parent(registry: &dyn Registry) {
        let err = registry.replace_for_parent("ghost", &works(&["One"])).await.unwrap_err();
        assert_eq!(*err, ErrorKind::ParentNotFound("ghost".into()));
        assert!(registry.list_by_parent("ghost", Page::default()).await.unwrap().is_empty());
    }

    pub(crate) async fn duplicate_positions_write_nothing(registry: &dyn Registry) {
        registry.upsert_book(&book("b1", "a.epub")).await.unwrap();
        let mut list = works(&["One", "Two"]);
        list[1].position = 1;
        assert!(registry.replace_for_parent("b1", &list).await.is_err());
        assert!(registry.list_by_parent("b1", Page::default()).await.unwrap().is_empty());
    }

    pub(crate) async fn delete_book_cascades(registry: &dyn Registry) {
        registry.upsert_book(&book("b1", "a.epub")).await.unwrap();
        registry.upsert_book(&book("b2", "b.epub")).await.unwrap();
        let created = registry.replace_for_parent("b1", &works(&["One", "Two"])).await.unwrap();
        registry.replace_for_parent("b2", &works(&["Other"])).await.unwrap();

        let mut removed = registry.delete_book("b1").await.unwrap();
        removed.sort();
        let mut expected: Vec<_> = created.virtual_books.iter().map(|vb| vb.id).collect();
        expected.sort();
        assert_eq!(removed, expected);
        assert!(registry.list_by_parent("b1", Page::default()).await.unwrap().is_empty());
        assert_eq!(registry.get(expected[0]).await.unwrap(), None);
        assert_eq!(registry.list_by_parent("b2", Page::default()).await.unwrap().len(), 1);

        let err = registry.delete_book("b1").await.unwrap_err();
        assert_eq!(*err, ErrorKind::ParentNotFound("b1".into()));
        assert_eq!(registry.delete_by_parent("b2").await.unwrap().len(), 1);
        assert!(registry.get_book("b2").await.unwrap().is_some());
    }

    pub(crate) async fn pagination_and_batched_lookup(registry: &dyn Registry) {
        registry.upsert_book(&book("b1", "b.epub")).await.unwrap();
        registry.upsert_book(&book("b2", "a.epub")).await.unwrap();
        registry.upsert_book(&book("b3", "c.epub")).await.unwrap();
        registry.replace_for_parent("b1", &works(&["One", "Two", "Three"])).await.unwrap();
        registry.replace_for_parent("b2", &works(&["Uno"])).await.unwrap();

        let page = registry.list_by_parent("b1", Page::new(1, 1)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].position, 2);
        let books: Vec<_> = registry.list_books(Page::new(0, 2)).await.unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(books, vec!["b2", "b1"]);

        let ids = vec!["b1".to_string(), "b2".to_string(), "b3".to_string()];
        let grouped = registry.list_by_parents(&ids).await.unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["b1"].iter().map(|vb| vb.position).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(grouped["b2"].len(), 1);
        assert!(registry.list_by_parents(&[]).await.unwrap().is_empty());
    }

    pub(crate) async fn record_outcome(registry: &dyn Registry) {
        registry.upsert_book(&book("b1", "a.epub")).await.unwrap();
        let state = BookState::Omnibus { virtual_books: 5 };
        registry.record_outcome("b1", &state, Some(PatternTag::DistinctDocuments)).await.unwrap();
        let stored = registry.get_book("b1").await.unwrap().unwrap();
        assert_eq!(stored.state, state);
        assert_eq!(stored.pattern, Some(PatternTag::DistinctDocuments));
        assert!(stored.processed_at.is_some());

        let failed = BookState::Failed { error: "unparseable source archive".into() };
        registry.record_outcome("b1", &failed, None).await.unwrap();
        assert_eq!(registry.get_book("b1").await.unwrap().unwrap().state, failed);
        assert!(registry.record_outcome("ghost", &failed, None).await.is_err());
    }
}
