use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use time::OffsetDateTime;
use uuid::Uuid;
use vellum_extract::models::{Work, WorkKind};

use super::{Book, sort_title};
use crate::error::{ErrorKind, Result};

/// Bibliographic fields a virtual book inherits from its parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualBookMetadata {
    pub authors: Vec<String>,
    pub language: Option<String>,
    pub publisher: Option<String>,
}

/// A work inside an omnibus book, exposed as a book of its own.
///
/// The id is stable across re-processing as long as a work keeps its
/// position within the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualBook {
    pub id: Uuid,
    pub parent_id: String,
    pub title: String,
    pub sort_title: String,
    pub position: u32,
    /// Sorts the virtual book directly after its parent, in position order.
    pub position_sort: String,
    pub kind: WorkKind,
    pub anchor: String,
    /// Parent path, `#`, anchor.
    pub locator: String,
    /// Inherited from the parent; the artifact does not exist yet.
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub parent_modified_at: OffsetDateTime,
    pub metadata: VirtualBookMetadata,
    pub media_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
}
impl VirtualBook {
    /// Project `work` onto a virtual book of `parent`.
    pub fn project(parent: &Book, work: &Work, id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            id,
            parent_id: parent.id.clone(),
            title: work.title.clone(),
            sort_title: sort_title(&work.title),
            position: work.position,
            position_sort: format!("{} {:04}", parent.sort_title, work.position),
            kind: work.kind,
            anchor: work.anchor.clone(),
            locator: format!("{}#{}", parent.path.to_string_lossy(), work.anchor),
            size: parent.size,
            parent_modified_at: parent.modified_at,
            metadata: VirtualBookMetadata {
                authors: parent.authors.clone(),
                language: parent.language.clone(),
                publisher: parent.publisher.clone(),
            },
            media_type: parent.media_type.clone(),
            created_at: now,
            modified_at: now,
        }
    }

    /// The work this virtual book was projected from.
    pub fn work(&self) -> Work {
        Work::new(self.title.clone(), self.position, self.anchor.clone(), self.kind)
    }

    /// Equal apart from timestamps.
    fn same_fields(&self, other: &Self) -> bool {
        let strip = |vb: &Self| Self {
            created_at: OffsetDateTime::UNIX_EPOCH,
            modified_at: OffsetDateTime::UNIX_EPOCH,
            ..vb.clone()
        };
        strip(self) == strip(other)
    }
}

/// The outcome of replacing a parent's virtual books.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replacement {
    /// Every virtual book the parent now has, in position order.
    pub virtual_books: Vec<VirtualBook>,
    /// Ids that no longer exist.
    pub removed: Vec<Uuid>,
    /// Ids that were kept but now point at a different anchor.
    pub reanchored: Vec<Uuid>,
}
impl Replacement {
    /// Ids whose materialized artifacts no longer match their virtual book.
    pub fn stale_artifacts(&self) -> impl Iterator<Item = &Uuid> {
        self.removed.iter().chain(&self.reanchored)
    }
}

/// Match `works` against the `existing` virtual books of `parent` by
/// position: a matching position keeps its id and is updated in place,
/// unmatched works get fresh ids, and unmatched existing rows are removed.
pub(crate) fn plan_replacement(
    parent: &Book,
    existing: Vec<VirtualBook>,
    works: &[Work],
    now: OffsetDateTime,
) -> Result<Replacement> {
    let mut positions = HashSet::new();
    if works.iter().any(|work| !positions.insert(work.position)) {
        exn::bail!(ErrorKind::InvalidData("duplicate work position"));
    }
    let mut by_position: HashMap<u32, VirtualBook> = existing.into_iter().map(|vb| (vb.position, vb)).collect();
    let mut replacement = Replacement::default();
    for work in works {
        let vb = match by_position.remove(&work.position) {
            Some(current) => {
                let mut updated = VirtualBook::project(parent, work, current.id, now);
                updated.created_at = current.created_at;
                if updated.same_fields(&current) {
                    updated.modified_at = current.modified_at;
                }
                if updated.anchor != current.anchor {
                    replacement.reanchored.push(current.id);
                }
                updated
            },
            None => VirtualBook::project(parent, work, Uuid::new_v4(), now),
        };
        replacement.virtual_books.push(vb);
    }
    replacement.removed = by_position.into_values().map(|vb| vb.id).collect();
    replacement.removed.sort();
    replacement.virtual_books.sort_by_key(|vb| vb.position);
    Ok(replacement)
}
