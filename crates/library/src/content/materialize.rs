use tracing::instrument;
use vellum_extract::ExtractionService;
use vellum_extract::models::Work;

use crate::error::{Result, from_extract};

/// Turns a parent archive into the standalone archive of one work.
///
/// Called on a blocking thread, at most once at a time per virtual book.
pub trait Materializer: Send + Sync {
    fn materialize(&self, work: &Work, source: &[u8]) -> Result<Vec<u8>>;
}

/// EPUB read, work extraction and deterministic EPUB write.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpubMaterializer {
    service: ExtractionService,
}
impl EpubMaterializer {
    pub fn new(service: ExtractionService) -> Self {
        Self { service }
    }
}
impl Materializer for EpubMaterializer {
    #[instrument(level = "debug", skip_all, fields(anchor = %work.anchor))]
    fn materialize(&self, work: &Work, source: &[u8]) -> Result<Vec<u8>> {
        let (bytes, warnings) = self.service.extract_bytes(work, source).map_err(from_extract)?;
        for warning in &warnings {
            tracing::warn!(
                document = %warning.document,
                reference = %warning.reference,
                reason = %warning.reason,
                "Unresolved reference in extracted work",
            );
        }
        Ok(bytes)
    }
}
