//! Virtual book lifecycle: registry mutations plus the artifact purges they
//! imply.

use exn::OptionExt;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use vellum_extract::models::Work;
use vellum_registry::RegistryHandle;
use vellum_registry::models::{BookState, Replacement};

use crate::content::ContentCache;
use crate::error::{ErrorKind, Result, from_registry};

/// The only component that mutates virtual book identity.
///
/// Every id that disappears, or keeps its id but moves to another anchor,
/// has its artifact purged. Purge failures are logged and do not undo the
/// registry change: an orphaned artifact is unreachable (its id no longer
/// resolves) and is eventually evicted.
#[derive(Clone)]
pub struct Lifecycle {
    registry: RegistryHandle,
    content: Arc<ContentCache>,
}
impl Lifecycle {
    pub fn new(registry: RegistryHandle, content: Arc<ContentCache>) -> Self {
        Self { registry, content }
    }

    /// Replace the virtual books of `parent_id` with `works`.
    #[instrument(skip(self, works), fields(works = works.len()))]
    pub async fn replace(&self, parent_id: &str, works: &[Work]) -> Result<Replacement> {
        let replacement = self.registry.replace_for_parent(parent_id, works).await.map_err(from_registry)?;
        self.purge_all(replacement.stale_artifacts().copied()).await;
        Ok(replacement)
    }

    /// Delete a parent book, its virtual books and their artifacts.
    #[instrument(skip(self))]
    pub async fn delete_parent(&self, parent_id: &str) -> Result<Vec<Uuid>> {
        let removed = self.registry.delete_book(parent_id).await.map_err(from_registry)?;
        self.purge_all(removed.iter().copied()).await;
        tracing::info!(virtual_books = removed.len(), "Deleted book");
        Ok(removed)
    }

    /// Delete the virtual books of a parent (and their artifacts), keeping
    /// the parent itself. The parent goes back to unprocessed.
    #[instrument(skip(self))]
    pub async fn delete_virtual_books(&self, parent_id: &str) -> Result<Vec<Uuid>> {
        self.registry
            .get_book(parent_id)
            .await
            .map_err(from_registry)?
            .ok_or_raise(|| ErrorKind::NotFound(parent_id.to_string()))?;
        let removed = self.registry.delete_by_parent(parent_id).await.map_err(from_registry)?;
        self.registry.record_outcome(parent_id, &BookState::Unprocessed, None).await.map_err(from_registry)?;
        self.purge_all(removed.iter().copied()).await;
        tracing::info!(virtual_books = removed.len(), "Deleted virtual books");
        Ok(removed)
    }

    async fn purge_all(&self, ids: impl Iterator<Item = Uuid>) {
        for id in ids {
            if let Err(err) = self.content.purge(id).await {
                tracing::warn!(virtual_book = %id, error = ?err, "Failed to purge artifact");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Harness;
    use vellum_registry::models::Page;

    #[tokio::test]
    async fn test_delete_parent_cascades_and_purges() {
        let harness = Harness::new().await;
        let book = harness.add_omnibus("omnibus.epub", 3).await;
        let ids = harness.process(&book).await;
        harness.content.ensure(ids[1]).await.unwrap();
        assert!(harness.artifact_exists(ids[1]).await);

        let removed = harness.lifecycle.delete_parent(&book).await.unwrap();
        assert_eq!(removed.len(), 3);
        assert!(!harness.artifact_exists(ids[1]).await);
        assert!(harness.registry.list_by_parent(&book, Page::default()).await.unwrap().is_empty());
        let err = harness.content.get_content(ids[1]).await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound(ids[1].to_string()));
    }

    #[tokio::test]
    async fn test_reanchored_virtual_book_is_purged() {
        let harness = Harness::new().await;
        let book = harness.add_omnibus("omnibus.epub", 3).await;
        let ids = harness.process(&book).await;
        harness.content.ensure(ids[0]).await.unwrap();
        harness.content.ensure(ids[1]).await.unwrap();

        let current = harness.registry.list_by_parent(&book, Page::default()).await.unwrap();
        let mut works: Vec<Work> = current.iter().map(|vb| vb.work()).collect();
        works[1].anchor = "text/book3.xhtml".into();
        works.truncate(2);
        let replacement = harness.lifecycle.replace(&book, &works).await.unwrap();
        assert_eq!(replacement.reanchored, vec![ids[1]]);
        assert_eq!(replacement.removed, vec![ids[2]]);
        assert!(harness.artifact_exists(ids[0]).await);
        assert!(!harness.artifact_exists(ids[1]).await);
    }

    #[tokio::test]
    async fn test_delete_virtual_books_keeps_parent() {
        let harness = Harness::new().await;
        let book = harness.add_omnibus("omnibus.epub", 2).await;
        harness.process(&book).await;
        assert_eq!(harness.lifecycle.delete_virtual_books(&book).await.unwrap().len(), 2);
        let parent = harness.registry.get_book(&book).await.unwrap().unwrap();
        assert_eq!(parent.state, BookState::Unprocessed);
        let err = harness.lifecycle.delete_virtual_books("ghost").await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound("ghost".into()));
    }
}
