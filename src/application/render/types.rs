use thiserror::Error;

/// Rendering request passed into the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Name of the source document, used in logs and failure reports.
    pub document: String,
    /// Source markdown text.
    pub markdown: String,
}

impl RenderRequest {
    pub fn new(document: impl Into<String>, markdown: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            markdown: markdown.into(),
        }
    }
}

/// Structured errors surfaced by the rendering pipeline. Parse-shape and
/// typesetting problems degrade in-band instead of appearing here; these are
/// reserved for faults that abort a document.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("syntax highlighting failed: {language}: {message}")]
    Highlighting { language: String, message: String },
    #[error("document processing failed: {message}")]
    Document { message: String },
    #[error("snippet evaluation aborted: {message}")]
    Evaluation { message: String },
}
