//! In-memory registry for tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;
use vellum_extract::models::{PatternTag, Work};

use crate::error::{ErrorKind, Result};
use crate::models::{Book, BookState, Page, Replacement, VirtualBook, plan_replacement};
use crate::registry::{Registry, group_by_parent};
use crate::timestamp;

#[derive(Debug, Default)]
struct State {
    books: HashMap<String, Book>,
    virtual_books: HashMap<Uuid, VirtualBook>,
}

/// [`Registry`] kept in a `HashMap` behind a [`RwLock`], with the same
/// matching and cascade rules as the SQLite implementation.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: RwLock<State>,
    replacements: AtomicUsize,
}
impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful [`replace_for_parent`](Registry::replace_for_parent) calls.
    pub fn replacement_count(&self) -> usize {
        self.replacements.load(Ordering::SeqCst)
    }
}

fn paginate<T>(items: Vec<T>, page: Page) -> Vec<T> {
    items.into_iter().skip(page.offset as usize).take(page.limit as usize).collect()
}

fn children(state: &State, parent_id: &str) -> Vec<VirtualBook> {
    let mut list: Vec<_> = state.virtual_books.values().filter(|vb| vb.parent_id == parent_id).cloned().collect();
    list.sort_by_key(|vb| vb.position);
    list
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn get_book(&self, id: &str) -> Result<Option<Book>> {
        Ok(self.state.read().await.books.get(id).cloned())
    }

    async fn list_books(&self, page: Page) -> Result<Vec<Book>> {
        let mut books: Vec<_> = self.state.read().await.books.values().cloned().collect();
        books.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(paginate(books, page))
    }

    async fn upsert_book(&self, book: &Book) -> Result<()> {
        self.state.write().await.books.insert(book.id.clone(), book.clone());
        Ok(())
    }

    async fn delete_book(&self, id: &str) -> Result<Vec<Uuid>> {
        let mut state = self.state.write().await;
        if state.books.remove(id).is_none() {
            exn::bail!(ErrorKind::ParentNotFound(id.to_string()));
        }
        let removed: Vec<Uuid> = children(&state, id).into_iter().map(|vb| vb.id).collect();
        state.virtual_books.retain(|_, vb| vb.parent_id != id);
        Ok(removed)
    }

    async fn record_outcome(&self, id: &str, state: &BookState, pattern: Option<PatternTag>) -> Result<()> {
        let mut guard = self.state.write().await;
        let Some(book) = guard.books.get_mut(id) else {
            exn::bail!(ErrorKind::ParentNotFound(id.to_string()));
        };
        book.state = state.clone();
        book.pattern = pattern;
        book.processed_at = Some(timestamp::now());
        Ok(())
    }

    async fn replace_for_parent(&self, parent_id: &str, works: &[Work]) -> Result<Replacement> {
        let mut state = self.state.write().await;
        let Some(parent) = state.books.get(parent_id).cloned() else {
            exn::bail!(ErrorKind::ParentNotFound(parent_id.to_string()));
        };
        let replacement = plan_replacement(&parent, children(&state, parent_id), works, timestamp::now())?;
        for id in &replacement.removed {
            state.virtual_books.remove(id);
        }
        for vb in &replacement.virtual_books {
            state.virtual_books.insert(vb.id, vb.clone());
        }
        self.replacements.fetch_add(1, Ordering::SeqCst);
        Ok(replacement)
    }

    async fn get(&self, id: Uuid) -> Result<Option<VirtualBook>> {
        Ok(self.state.read().await.virtual_books.get(&id).cloned())
    }

    async fn list_by_parent(&self, parent_id: &str, page: Page) -> Result<Vec<VirtualBook>> {
        Ok(paginate(children(&*self.state.read().await, parent_id), page))
    }

    async fn list_by_parents(&self, parent_ids: &[String]) -> Result<BTreeMap<String, Vec<VirtualBook>>> {
        let state = self.state.read().await;
        let matching = state.virtual_books.values().filter(|vb| parent_ids.contains(&vb.parent_id)).cloned();
        Ok(group_by_parent(matching.collect()))
    }

    async fn delete_by_parent(&self, parent_id: &str) -> Result<Vec<Uuid>> {
        let mut state = self.state.write().await;
        let removed: Vec<Uuid> = children(&state, parent_id).into_iter().map(|vb| vb.id).collect();
        state.virtual_books.retain(|_, vb| vb.parent_id != parent_id);
        Ok(removed)
    }
}
