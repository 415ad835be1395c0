//! Transport-agnostic request surface.
//!
//! Every operation returns a [`Response`], whose class maps onto an HTTP
//! status code. Nothing here knows about a particular server framework.

use crate::content::{Content, ContentCache};
use crate::error::{Error, ErrorKind, Result, from_registry};
use crate::lifecycle::Lifecycle;
use crate::scan::Scanner;
use exn::OptionExt;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;
use vellum_registry::RegistryHandle;
use vellum_registry::models::{Book, BookState, Page, VirtualBook};

/// Outcome class of an API call.
#[derive(Debug)]
pub enum Response<T> {
    Ok(T),
    /// The request was queued and runs in the background.
    Accepted,
    NoContent,
    NotFound(String),
    /// The work's anchor cannot be located in its parent.
    Unprocessable(String),
    Timeout,
    /// A dependency (storage, registry) is failing; retrying may help.
    Unavailable(String),
    Failed(String),
}
impl<T> Response<T> {
    /// HTTP-equivalent status code.
    pub fn status(&self) -> u16 {
        match self {
            Self::Ok(_) => 200,
            Self::Accepted => 202,
            Self::NoContent => 204,
            Self::NotFound(_) => 404,
            Self::Unprocessable(_) => 422,
            Self::Failed(_) => 500,
            Self::Unavailable(_) => 503,
            Self::Timeout => 504,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok(_) | Self::Accepted | Self::NoContent)
    }

    /// Transform the success value, keeping every other class.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        match self {
            Self::Ok(value) => Response::Ok(f(value)),
            Self::Accepted => Response::Accepted,
            Self::NoContent => Response::NoContent,
            Self::NotFound(id) => Response::NotFound(id),
            Self::Unprocessable(anchor) => Response::Unprocessable(anchor),
            Self::Timeout => Response::Timeout,
            Self::Unavailable(reason) => Response::Unavailable(reason),
            Self::Failed(reason) => Response::Failed(reason),
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(value) => Some(value),
            _ => None,
        }
    }

    /// Classify an error by its kind.
    pub fn from_error(err: &Error) -> Self {
        match &**err {
            ErrorKind::NotFound(id) => Self::NotFound(id.clone()),
            ErrorKind::Unprocessable(anchor) => Self::Unprocessable(anchor.clone()),
            ErrorKind::Timeout(_) => Self::Timeout,
            kind if kind.is_retryable() => Self::Unavailable(kind.to_string()),
            kind => Self::Failed(kind.to_string()),
        }
    }
}

/// The fields of a parent book shown alongside one of its virtual books.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentSummary {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub path: PathBuf,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
    #[serde(flatten)]
    pub state: BookState,
}
impl From<Book> for ParentSummary {
    fn from(book: Book) -> Self {
        Self {
            id: book.id,
            title: book.title,
            authors: book.authors,
            path: book.path,
            modified_at: book.modified_at,
            state: book.state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualBookDetail {
    #[serde(flatten)]
    pub virtual_book: VirtualBook,
    pub parent: ParentSummary,
}

/// The operations exposed to clients.
#[derive(Clone)]
pub struct Api {
    registry: RegistryHandle,
    lifecycle: Lifecycle,
    scanner: Arc<Scanner>,
    content: Arc<ContentCache>,
}

macro_rules! tri {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(error = ?err, "Request failed");
                return Response::from_error(&err);
            },
        }
    };
}

impl Api {
    pub fn new(registry: RegistryHandle, lifecycle: Lifecycle, scanner: Arc<Scanner>, content: Arc<ContentCache>) -> Self {
        Self { registry, lifecycle, scanner, content }
    }

    async fn parent(&self, parent_id: &str) -> Result<Book> {
        self.registry
            .get_book(parent_id)
            .await
            .map_err(from_registry)?
            .ok_or_raise(|| ErrorKind::NotFound(parent_id.to_string()))
    }

    /// Virtual books of a parent, in position order.
    #[instrument(skip(self))]
    pub async fn list_virtual_books(&self, parent_id: &str, page: Page) -> Response<Vec<VirtualBook>> {
        tri!(self.parent(parent_id).await);
        Response::Ok(tri!(self.registry.list_by_parent(parent_id, page).await.map_err(from_registry)))
    }

    /// One virtual book with a summary of its parent.
    #[instrument(skip(self))]
    pub async fn get_virtual_book(&self, id: Uuid) -> Response<VirtualBookDetail> {
        let Some(virtual_book) = tri!(self.registry.get(id).await.map_err(from_registry)) else {
            return Response::NotFound(id.to_string());
        };
        let parent = tri!(self.parent(&virtual_book.parent_id).await);
        Response::Ok(VirtualBookDetail { virtual_book, parent: parent.into() })
    }

    /// Queue re-processing of a parent. The work runs on a background task.
    #[instrument(skip(self))]
    pub async fn reprocess(&self, parent_id: &str) -> Response<()> {
        tri!(self.parent(parent_id).await);
        let scanner = self.scanner.clone();
        let id = parent_id.to_string();
        tokio::spawn(async move {
            match scanner.process_book(&id).await {
                Ok(outcome) => tracing::debug!(book = %id, status = ?outcome.status, "Re-processed book"),
                Err(err) => tracing::warn!(book = %id, error = ?err, "Re-processing failed"),
            }
        });
        Response::Accepted
    }

    /// Delete every virtual book of a parent, and their artifacts.
    #[instrument(skip(self))]
    pub async fn delete_virtual_books(&self, parent_id: &str) -> Response<()> {
        tri!(self.lifecycle.delete_virtual_books(parent_id).await);
        Response::NoContent
    }

    /// The materialized archive of a virtual book.
    #[instrument(skip(self))]
    pub async fn get_content(&self, id: Uuid) -> Response<Content> {
        Response::Ok(tri!(self.content.get_content(id).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Harness;
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case(ErrorKind::NotFound("x".into()), 404)]
    #[case(ErrorKind::Unprocessable("a.xhtml".into()), 422)]
    #[case(ErrorKind::Timeout(Duration::from_secs(60)), 504)]
    #[case(ErrorKind::CacheStorage, 503)]
    #[case(ErrorKind::ParseError, 500)]
    fn test_error_status(#[case] kind: ErrorKind, #[case] status: u16) {
        assert_eq!(Response::<()>::from_error(&Error::from(kind)).status(), status);
    }

    #[tokio::test]
    async fn test_list_and_show() {
        let harness = Harness::new().await;
        let book = harness.add_omnibus("omnibus.epub", 3).await;
        let ids = harness.process(&book).await;
        let api = harness.api();

        let listed = api.list_virtual_books(&book, Page::new(1, 10)).await.ok().unwrap();
        assert_eq!(listed.iter().map(|vb| vb.id).collect::<Vec<_>>(), ids[1..].to_vec());

        let detail = api.get_virtual_book(ids[0]).await.ok().unwrap();
        assert_eq!(detail.parent.id, book);
        assert_eq!(detail.parent.state, BookState::Omnibus { virtual_books: 3 });
        assert_eq!(api.get_virtual_book(Uuid::new_v4()).await.status(), 404);
        assert_eq!(api.list_virtual_books("ghost", Page::default()).await.status(), 404);
    }

    #[tokio::test]
    async fn test_content_of_deleted_parent_is_not_found() {
        let harness = Harness::new().await;
        let book = harness.add_omnibus("omnibus.epub", 2).await;
        let ids = harness.process(&book).await;
        let api = harness.api();
        assert_eq!(api.get_content(ids[1]).await.status(), 200);

        harness.lifecycle.delete_parent(&book).await.unwrap();
        assert!(api.list_virtual_books(&book, Page::default()).await.ok().is_none());
        assert_eq!(api.get_content(ids[1]).await.status(), 404);
    }

    #[tokio::test]
    async fn test_delete_virtual_books_is_no_content() {
        let harness = Harness::new().await;
        let book = harness.add_omnibus("omnibus.epub", 2).await;
        harness.process(&book).await;
        let api = harness.api();
        assert_eq!(api.delete_virtual_books(&book).await.status(), 204);
        assert!(api.list_virtual_books(&book, Page::default()).await.ok().unwrap().is_empty());
        assert_eq!(api.delete_virtual_books("ghost").await.status(), 404);
    }

    #[tokio::test]
    async fn test_reprocess_runs_in_the_background() {
        let harness = Harness::new().await;
        let book = harness.add_omnibus("omnibus.epub", 4).await;
        let api = harness.api();
        assert_eq!(api.reprocess(&book).await.status(), 202);
        assert_eq!(api.reprocess("ghost").await.status(), 404);

        let mut listed = api.list_virtual_books(&book, Page::default()).await.ok().unwrap();
        for _ in 0..100 {
            if !listed.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            listed = api.list_virtual_books(&book, Page::default()).await.ok().unwrap();
        }
        assert_eq!(listed.len(), 4);
    }
}
