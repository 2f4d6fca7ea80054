use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to open PDF: {0}")]
    OpenError(String),
    #[error("failed to extract text: {0}")]
    ExtractionError(String),
    #[error("PDF support is not available in this build")]
    Unsupported,
}

/// Trait for PDF text extraction backends.
///
/// Documents linked from the gazette are fetched into memory, so
/// implementors work on the raw bytes rather than a file path. Field
/// parsing of the returned text lives in `gazette_parsing::FieldExtractor`.
pub trait PdfBackend: Send + Sync {
    /// Extract the full text content of a PDF document.
    fn extract_text(&self, bytes: &[u8]) -> Result<String, BackendError>;
}

/// Backend used when no PDF engine is compiled in. Every call fails, which
/// makes the resolver fall back to the page text.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledPdfBackend;

impl PdfBackend for DisabledPdfBackend {
    fn extract_text(&self, _bytes: &[u8]) -> Result<String, BackendError> {
        Err(BackendError::Unsupported)
    }
}
