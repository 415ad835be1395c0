use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use time::OffsetDateTime;
use vellum_extract::models::PatternTag;

use super::sort_title;

/// Where a book stands with respect to omnibus processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BookState {
    /// Never processed, or changed since it last was.
    Unprocessed,
    NotOmnibus,
    Omnibus { virtual_books: u32 },
    /// Processing failed; the book keeps whatever virtual books it had.
    Failed { error: String },
}
impl BookState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::NotOmnibus => "not_omnibus",
            Self::Omnibus { .. } => "omnibus",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}
impl Display for BookState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Omnibus { virtual_books } => write!(f, "omnibus ({virtual_books} works)"),
            Self::Failed { error } => write!(f, "failed: {error}"),
            state => f.write_str(state.as_str()),
        }
    }
}

/// A file in the library, as the catalog knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    /// Path relative to the library root.
    pub path: PathBuf,
    pub media_type: String,
    pub title: String,
    pub sort_title: String,
    pub authors: Vec<String>,
    pub language: Option<String>,
    pub publisher: Option<String>,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
    #[serde(flatten)]
    pub state: BookState,
    pub pattern: Option<PatternTag>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
}
impl Book {
    /// A new, unprocessed book. The sort title is derived from `title`.
    pub fn new(
        id: impl Into<String>,
        path: impl Into<PathBuf>,
        media_type: impl Into<String>,
        title: impl Into<String>,
        size: u64,
        modified_at: OffsetDateTime,
    ) -> Self {
        let title = title.into();
        Self {
            id: id.into(),
            path: path.into(),
            media_type: media_type.into(),
            sort_title: sort_title(&title),
            title,
            authors: Vec::new(),
            language: None,
            publisher: None,
            size,
            modified_at,
            state: BookState::Unprocessed,
            pattern: None,
            processed_at: None,
        }
    }

    pub fn with_authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn with_publisher(mut self, publisher: Option<String>) -> Self {
        self.publisher = publisher;
        self
    }
}
