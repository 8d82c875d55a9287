//! Markdown rendering pipeline.
//!
//! The pipeline is intentionally kept pure: it accepts markdown input,
//! produces deterministic HTML output, and surfaces structured errors.
//! Fallible work that should not abort a document (typesetting, snippet
//! evaluation, highlighting) degrades in-band inside the rendered markup.

mod service;
mod types;

pub use service::{
    DemoOptions, FoglioRenderService, RenderConfigError, RenderPipelineConfig, RunOptions,
    configure_render_service, fence, highlight, payload, render_service, sandbox,
};
pub use types::{RenderError, RenderRequest};
