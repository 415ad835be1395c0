//! SQLite-backed registry.

use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::BTreeMap;
use tracing::instrument;
use uuid::Uuid;
use vellum_extract::models::{PatternTag, Work};

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{Book, BookState, Page, Replacement, VirtualBook, plan_replacement};
use crate::registry::{Registry, group_by_parent};
use crate::rows::{BookRow, VirtualBookRow, state_columns};
use crate::timestamp::{self, to_millis};

/// [`Registry`] stored in the SQLite database.
///
/// # Relationships
///
/// - A book has zero or more virtual books (only omnibus books have any).
/// - `(parent_id, position)` is unique; positions are not unique across
///   parents.
/// - Deleting a book cascades to its virtual books (`ON DELETE CASCADE`).
#[derive(Debug, Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}
impl From<&Database> for SqliteRegistry {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl SqliteRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Start a transaction holding the write lock from its first statement,
    /// so concurrent writers queue on `busy_timeout` instead of failing when
    /// a read would have to be upgraded.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool.begin_with("BEGIN IMMEDIATE").await.or_raise(|| ErrorKind::Database)
    }
}

fn books(rows: Vec<BookRow>) -> Result<Vec<Book>> {
    rows.into_iter().map(Book::try_from).collect()
}

fn virtual_books(rows: Vec<VirtualBookRow>) -> Result<Vec<VirtualBook>> {
    rows.into_iter().map(VirtualBook::try_from).collect()
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn get_book(&self, id: &str) -> Result<Option<Book>> {
        let row: Option<BookRow> = sqlx::query_as(include_str!("../queries/get_book.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Book::try_from).transpose()
    }

    async fn list_books(&self, page: Page) -> Result<Vec<Book>> {
        let rows: Vec<BookRow> = sqlx::query_as(include_str!("../queries/list_books.sql"))
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        books(rows)
    }

    #[instrument(skip_all, fields(book = %book.id))]
    async fn upsert_book(&self, book: &Book) -> Result<()> {
        let row = BookRow::try_from(book)?;
        sqlx::query(include_str!("../queries/upsert_book.sql"))
            .bind(row.id)
            .bind(row.path)
            .bind(row.media_type)
            .bind(row.title)
            .bind(row.sort_title)
            .bind(row.authors)
            .bind(row.language)
            .bind(row.publisher)
            .bind(row.size)
            .bind(row.modified_at)
            .bind(row.state)
            .bind(row.state_count)
            .bind(row.last_error)
            .bind(row.pattern)
            .bind(row.processed_at)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_book(&self, id: &str) -> Result<Vec<Uuid>> {
        let mut tx = self.begin_write().await?;
        let rows: Vec<VirtualBookRow> = sqlx::query_as(include_str!("../queries/all_by_parent.sql"))
            .bind(id)
            .fetch_all(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let result = sqlx::query(include_str!("../queries/delete_book.sql"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::ParentNotFound(id.to_string()));
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        let removed = virtual_books(rows)?.into_iter().map(|vb| vb.id).collect::<Vec<_>>();
        tracing::debug!(virtual_books = removed.len(), "Deleted book");
        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn record_outcome(&self, id: &str, state: &BookState, pattern: Option<PatternTag>) -> Result<()> {
        let (state, state_count, last_error) = state_columns(state);
        let result = sqlx::query(include_str!("../queries/record_outcome.sql"))
            .bind(id)
            .bind(state)
            .bind(state_count)
            .bind(last_error)
            .bind(pattern.map(|p| p.to_string()))
            .bind(to_millis(timestamp::now(), "processed at")?)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::ParentNotFound(id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self, works), fields(works = works.len()))]
    async fn replace_for_parent(&self, parent_id: &str, works: &[Work]) -> Result<Replacement> {
        let mut tx = self.begin_write().await?;
        let parent: Option<BookRow> = sqlx::query_as(include_str!("../queries/get_book.sql"))
            .bind(parent_id)
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let parent = Book::try_from(parent.ok_or_raise(|| ErrorKind::ParentNotFound(parent_id.to_string()))?)?;
        let existing: Vec<VirtualBookRow> = sqlx::query_as(include_str!("../queries/all_by_parent.sql"))
            .bind(parent_id)
            .fetch_all(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let replacement = plan_replacement(&parent, virtual_books(existing)?, works, timestamp::now())?;

        // Removals first, so that new rows can take over freed positions.
        for id in &replacement.removed {
            sqlx::query(include_str!("../queries/delete_virtual_book.sql"))
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        for vb in &replacement.virtual_books {
            let row = VirtualBookRow::try_from(vb)?;
            sqlx::query(include_str!("../queries/upsert_virtual_book.sql"))
                .bind(row.id)
                .bind(row.parent_id)
                .bind(row.title)
                .bind(row.sort_title)
                .bind(row.position)
                .bind(row.position_sort)
                .bind(row.kind)
                .bind(row.anchor)
                .bind(row.locator)
                .bind(row.size)
                .bind(row.parent_modified_at)
                .bind(row.metadata)
                .bind(row.media_type)
                .bind(row.created_at)
                .bind(row.modified_at)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::debug!(
            virtual_books = replacement.virtual_books.len(),
            removed = replacement.removed.len(),
            reanchored = replacement.reanchored.len(),
            "Replaced virtual books",
        );
        Ok(replacement)
    }

    async fn get(&self, id: Uuid) -> Result<Option<VirtualBook>> {
        let row: Option<VirtualBookRow> = sqlx::query_as(include_str!("../queries/get_virtual_book.sql"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(VirtualBook::try_from).transpose()
    }

    async fn list_by_parent(&self, parent_id: &str, page: Page) -> Result<Vec<VirtualBook>> {
        let rows: Vec<VirtualBookRow> = sqlx::query_as(include_str!("../queries/list_by_parent.sql"))
            .bind(parent_id)
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        virtual_books(rows)
    }

    async fn list_by_parents(&self, parent_ids: &[String]) -> Result<BTreeMap<String, Vec<VirtualBook>>> {
        if parent_ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let ids = serde_json::to_string(parent_ids).or_raise(|| ErrorKind::InvalidData("parent ids"))?;
        let rows: Vec<VirtualBookRow> = sqlx::query_as(include_str!("../queries/list_by_parents.sql"))
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(group_by_parent(virtual_books(rows)?))
    }

    #[instrument(skip(self))]
    async fn delete_by_parent(&self, parent_id: &str) -> Result<Vec<Uuid>> {
        let ids: Vec<(String,)> = sqlx::query_as(include_str!("../queries/delete_by_parent.sql"))
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        ids.into_iter().map(|(id,)| Uuid::parse_str(&id).or_raise(|| ErrorKind::InvalidData("id"))).collect()
    }
}
