use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::sanitize;
use crate::error::{Error, ErrorKind};

/// Which rule recognized a container as an omnibus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PatternTag {
    /// Several EPUBs merged into one, each keeping its own directory.
    MergedVolumes,
    /// The title names a bundle and the entries land in distinct documents.
    TitleKeyword,
    /// Generic rule: enough entries, each in its own content document.
    DistinctDocuments,
}
impl PatternTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MergedVolumes => "merged_volumes",
            Self::TitleKeyword => "title_keyword",
            Self::DistinctDocuments => "distinct_documents",
        }
    }
}
impl FromStr for PatternTag {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match sanitize(s).as_str() {
            "mergedvolumes" => Self::MergedVolumes,
            "titlekeyword" => Self::TitleKeyword,
            "distinctdocuments" => Self::DistinctDocuments,
            _ => exn::bail!(ErrorKind::InvalidValue { field: "pattern tag", value: s.to_string() }),
        })
    }
}
impl Display for PatternTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a parsed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub is_omnibus: bool,
    pub pattern: Option<PatternTag>,
}
impl Classification {
    pub const NOT_OMNIBUS: Self = Self { is_omnibus: false, pattern: None };

    pub fn omnibus(pattern: PatternTag) -> Self {
        Self { is_omnibus: true, pattern: Some(pattern) }
    }
}

/// Result of classifying raw archive bytes.
///
/// Unparseable input is never an error here: it classifies as not an omnibus
/// and carries the parse failure alongside so callers can record it.
#[derive(Debug)]
pub struct Detection {
    pub classification: Classification,
    pub error: Option<Error>,
}
impl Detection {
    pub fn is_omnibus(&self) -> bool {
        self.classification.is_omnibus
    }
}
