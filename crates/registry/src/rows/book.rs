use exn::{OptionExt, ResultExt};
use std::path::PathBuf;
use vellum_extract::models::PatternTag;

use crate::error::{Error, ErrorKind};
use crate::models::{Book, BookState};
use crate::timestamp::{from_millis, to_millis};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BookRow {
    pub(crate) id: String,
    pub(crate) path: String,
    pub(crate) media_type: String,
    pub(crate) title: String,
    pub(crate) sort_title: String,
    pub(crate) authors: String,
    pub(crate) language: Option<String>,
    pub(crate) publisher: Option<String>,
    pub(crate) size: i64,
    pub(crate) modified_at: i64,
    pub(crate) state: String,
    pub(crate) state_count: i64,
    pub(crate) last_error: Option<String>,
    pub(crate) pattern: Option<String>,
    pub(crate) processed_at: Option<i64>,
}

/// Column triple (`state`, `state_count`, `last_error`) for a state.
pub(crate) fn state_columns(state: &BookState) -> (&'static str, i64, Option<String>) {
    match state {
        BookState::Omnibus { virtual_books } => (state.as_str(), i64::from(*virtual_books), None),
        BookState::Failed { error } => (state.as_str(), 0, Some(error.clone())),
        _ => (state.as_str(), 0, None),
    }
}

fn state_from_columns(state: &str, count: i64, error: Option<String>) -> Result<BookState, Error> {
    Ok(match state {
        "unprocessed" => BookState::Unprocessed,
        "not_omnibus" => BookState::NotOmnibus,
        "omnibus" => BookState::Omnibus {
            virtual_books: u32::try_from(count).or_raise(|| ErrorKind::InvalidData("state count"))?,
        },
        "failed" => BookState::Failed { error: error.unwrap_or_default() },
        _ => exn::bail!(ErrorKind::InvalidData("state")),
    })
}

impl TryFrom<&Book> for BookRow {
    type Error = Error;
    fn try_from(book: &Book) -> Result<Self, Self::Error> {
        let (state, state_count, last_error) = state_columns(&book.state);
        Ok(Self {
            id: book.id.clone(),
            path: book.path.to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string(),
            media_type: book.media_type.clone(),
            title: book.title.clone(),
            sort_title: book.sort_title.clone(),
            authors: serde_json::to_string(&book.authors).or_raise(|| ErrorKind::InvalidData("authors"))?,
            language: book.language.clone(),
            publisher: book.publisher.clone(),
            size: i64::try_from(book.size).or_raise(|| ErrorKind::InvalidData("size"))?,
            modified_at: to_millis(book.modified_at, "modified at")?,
            state: state.to_string(),
            state_count,
            last_error,
            pattern: book.pattern.map(|p| p.to_string()),
            processed_at: book.processed_at.map(|t| to_millis(t, "processed at")).transpose()?,
        })
    }
}

impl TryFrom<BookRow> for Book {
    type Error = Error;
    fn try_from(row: BookRow) -> Result<Self, Self::Error> {
        Ok(Self {
            state: state_from_columns(&row.state, row.state_count, row.last_error)?,
            id: row.id,
            path: PathBuf::from(row.path),
            media_type: row.media_type,
            title: row.title,
            sort_title: row.sort_title,
            authors: serde_json::from_str(&row.authors).or_raise(|| ErrorKind::InvalidData("authors"))?,
            language: row.language,
            publisher: row.publisher,
            size: u64::try_from(row.size).or_raise(|| ErrorKind::InvalidData("size"))?,
            modified_at: from_millis(row.modified_at, "modified at")?,
            pattern: row
                .pattern
                .map(|p| p.parse::<PatternTag>())
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("pattern"))?,
            processed_at: row.processed_at.map(|t| from_millis(t, "processed at")).transpose()?,
        })
    }
}
