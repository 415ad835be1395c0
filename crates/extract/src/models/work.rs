use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::sanitize;
use crate::error::{Error, ErrorKind};

/// What kind of sub-book a work is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum WorkKind {
    Novel,
    Novella,
    ShortStory,
    /// Front or back matter bundled with the works (introductions,
    /// afterwords, appendices...).
    Supplement,
    /// Anything that could not be classified more precisely.
    Entry,
}
impl WorkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Novel => "novel",
            Self::Novella => "novella",
            Self::ShortStory => "short_story",
            Self::Supplement => "supplement",
            Self::Entry => "entry",
        }
    }
}
impl FromStr for WorkKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match sanitize(s).as_str() {
            "novel" => Self::Novel,
            "novella" => Self::Novella,
            "shortstory" | "story" => Self::ShortStory,
            "supplement" => Self::Supplement,
            "entry" => Self::Entry,
            _ => exn::bail!(ErrorKind::InvalidValue { field: "work kind", value: s.to_string() }),
        })
    }
}
impl Display for WorkKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// A logical sub-book detected inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Work {
    pub title: String,
    /// 1-based order within the container.
    pub position: u32,
    /// Resource path of the work's first content document, optionally
    /// followed by `#fragment`.
    pub anchor: String,
    pub kind: WorkKind,
}
impl Work {
    pub fn new(title: impl Into<String>, position: u32, anchor: impl Into<String>, kind: WorkKind) -> Self {
        Self { title: title.into(), position, anchor: anchor.into(), kind }
    }

    /// The content document the anchor points into.
    pub fn document(&self) -> &str {
        vellum_container::path::split_fragment(&self.anchor).0
    }
}
