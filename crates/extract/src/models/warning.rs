use derive_more::Display;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum WarningReason {
    /// The reference points at a resource the source does not contain.
    #[display("missing resource")]
    Missing,
    /// The reference climbs out of the package.
    #[display("outside the package")]
    OutsidePackage,
    /// The reference chain is longer than the configured bound.
    #[display("reference depth exceeded")]
    DepthExceeded,
}

/// A reference that could not be carried into the extracted archive.
/// Extraction continues without it.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display("{document}: {reference} ({reason})")]
pub struct ResourceWarning {
    /// Path of the document the reference was found in.
    pub document: String,
    /// The reference as written in the document.
    pub reference: String,
    pub reason: WarningReason,
}
