use exn::ResultExt;
use uuid::Uuid;
use vellum_extract::models::WorkKind;

use crate::error::{Error, ErrorKind};
use crate::models::VirtualBook;
use crate::timestamp::{from_millis, to_millis};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct VirtualBookRow {
    pub(crate) id: String,
    pub(crate) parent_id: String,
    pub(crate) title: String,
    pub(crate) sort_title: String,
    pub(crate) position: i64,
    pub(crate) position_sort: String,
    pub(crate) kind: String,
    pub(crate) anchor: String,
    pub(crate) locator: String,
    pub(crate) size: i64,
    pub(crate) parent_modified_at: i64,
    pub(crate) metadata: String,
    pub(crate) media_type: String,
    pub(crate) created_at: i64,
    pub(crate) modified_at: i64,
}

impl TryFrom<&VirtualBook> for VirtualBookRow {
    type Error = Error;
    fn try_from(vb: &VirtualBook) -> Result<Self, Self::Error> {
        Ok(Self {
            id: vb.id.to_string(),
            parent_id: vb.parent_id.clone(),
            title: vb.title.clone(),
            sort_title: vb.sort_title.clone(),
            position: i64::from(vb.position),
            position_sort: vb.position_sort.clone(),
            kind: vb.kind.to_string(),
            anchor: vb.anchor.clone(),
            locator: vb.locator.clone(),
            size: i64::try_from(vb.size).or_raise(|| ErrorKind::InvalidData("size"))?,
            parent_modified_at: to_millis(vb.parent_modified_at, "parent modified at")?,
            metadata: serde_json::to_string(&vb.metadata).or_raise(|| ErrorKind::InvalidData("metadata"))?,
            media_type: vb.media_type.clone(),
            created_at: to_millis(vb.created_at, "created at")?,
            modified_at: to_millis(vb.modified_at, "modified at")?,
        })
    }
}

impl TryFrom<VirtualBookRow> for VirtualBook {
    type Error = Error;
    fn try_from(row: VirtualBookRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::parse_str(&row.id).or_raise(|| ErrorKind::InvalidData("id"))?,
            parent_id: row.parent_id,
            title: row.title,
            sort_title: row.sort_title,
            position: u32::try_from(row.position).or_raise(|| ErrorKind::InvalidData("position"))?,
            position_sort: row.position_sort,
            kind: row.kind.parse::<WorkKind>().or_raise(|| ErrorKind::InvalidData("kind"))?,
            anchor: row.anchor,
            locator: row.locator,
            size: u64::try_from(row.size).or_raise(|| ErrorKind::InvalidData("size"))?,
            parent_modified_at: from_millis(row.parent_modified_at, "parent modified at")?,
            metadata: serde_json::from_str(&row.metadata).or_raise(|| ErrorKind::InvalidData("metadata"))?,
            media_type: row.media_type,
            created_at: from_millis(row.created_at, "created at")?,
            modified_at: from_millis(row.modified_at, "modified at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Book;
    use time::OffsetDateTime;
    use vellum_extract::models::Work;

    #[test]
    fn test_model_row_model() {
        let parent = Book::new("b1", "a.epub", "application/epub+zip", "A", 1, OffsetDateTime::UNIX_EPOCH)
            .with_language(Some("en".into()));
        let work = Work::new("Tales of the Inn", 2, "text/b2.xhtml", WorkKind::ShortStory);
        let vb = VirtualBook::project(&parent, &work, Uuid::new_v4(), crate::timestamp::now());
        let row = VirtualBookRow::try_from(&vb).unwrap();
        assert_eq!(row.kind, "short_story");
        assert_eq!(VirtualBook::try_from(row).unwrap(), vb);
    }

    #[test]
    fn test_invalid_kind_is_rejected() {
        let parent = Book::new("b1", "a.epub", "application/epub+zip", "A", 1, OffsetDateTime::UNIX_EPOCH);
        let work = Work::new("One", 1, "one.xhtml", WorkKind::Entry);
        let mut row = VirtualBookRow::try_from(&VirtualBook::project(&parent, &work, Uuid::nil(), OffsetDateTime::UNIX_EPOCH)).unwrap();
        row.kind = "poem".into();
        let err = VirtualBook::try_from(row).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData("kind"));
    }
}
