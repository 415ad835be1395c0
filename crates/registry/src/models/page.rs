/// Page size used when none is given.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;
/// Largest page a caller can ask for.
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Offset pagination for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}
impl Default for Page {
    fn default() -> Self {
        Self { offset: 0, limit: DEFAULT_PAGE_LIMIT }
    }
}
impl Page {
    /// Create a page, clamping the limit to `1..=MAX_PAGE_LIMIT`.
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit: limit.clamp(1, MAX_PAGE_LIMIT) }
    }

    /// The page directly after this one.
    pub fn next(&self) -> Self {
        Self { offset: self.offset.saturating_add(self.limit), limit: self.limit }
    }
}
