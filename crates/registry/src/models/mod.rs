mod book;
mod page;
mod virtual_book;

pub use self::book::{Book, BookState};
pub use self::page::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, Page};
pub(crate) use self::virtual_book::plan_replacement;
pub use self::virtual_book::{Replacement, VirtualBook, VirtualBookMetadata};

const ARTICLES: &[&str] = &["the ", "a ", "an "];

/// Title used for sorting: a leading English article is dropped.
///
/// ```
/// assert_eq!(vellum_registry::models::sort_title("The Long Road"), "Long Road");
/// assert_eq!(vellum_registry::models::sort_title("Anthem"), "Anthem");
/// ```
pub fn sort_title(title: &str) -> String {
    let title = title.trim();
    let lower = title.to_lowercase();
    ARTICLES
        .iter()
        .find(|article| lower.starts_with(*article) && title.len() > article.len())
        .map(|article| title[article.len()..].trim_start().to_string())
        .unwrap_or_else(|| title.to_string())
}
