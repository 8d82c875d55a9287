mod codeblock;
mod demo;
pub mod fence;
pub mod highlight;
mod math;
pub mod payload;
mod run;
pub mod sandbox;

use std::sync::Arc;

use markdown_it::MarkdownIt;
use once_cell::sync::{Lazy, OnceCell};
use thiserror::Error;

use crate::application::render::types::{RenderError, RenderRequest};

pub use demo::DemoOptions;
pub use run::RunOptions;

/// Markdown-it based rendering pipeline with KaTeX typesetting, Syntect
/// highlighting and build-time snippet execution.
pub struct FoglioRenderService {
    parser: MarkdownIt,
    run_options: RunOptions,
}

impl FoglioRenderService {
    /// Construct a renderer from the globally configured pipeline settings.
    fn new() -> Self {
        Self::with_config(active_render_config())
    }

    /// Construct a renderer with explicit pipeline settings, bypassing the
    /// global configuration.
    pub fn with_config(config: RenderPipelineConfig) -> Self {
        let mut parser = MarkdownIt::new();
        markdown_it::plugins::cmark::add(&mut parser);
        markdown_it::plugins::html::add(&mut parser);
        markdown_it::plugins::extra::strikethrough::add(&mut parser);
        markdown_it::plugins::extra::linkify::add(&mut parser);
        markdown_it::plugins::extra::tables::add(&mut parser);
        markdown_it::plugins::extra::typographer::add(&mut parser);
        markdown_it::plugins::extra::smartquotes::add(&mut parser);
        math::add(&mut parser);
        // The demo pass must register before the line-numbering pass so demo
        // fences are claimed first.
        demo::add(&mut parser, config.demo);
        codeblock::add(&mut parser);

        Self {
            parser,
            run_options: config.run,
        }
    }

    /// Render a markdown document to HTML.
    ///
    /// Embedded `js run` fences are executed first, so their results are
    /// frozen into the text before tokenization; everything after that is
    /// synchronous.
    pub async fn render(&self, request: &RenderRequest) -> Result<String, RenderError> {
        let preprocessed = run::preprocess(&request.markdown, &self.run_options).await?;
        Ok(self.render_html(&preprocessed))
    }

    fn render_html(&self, markdown: &str) -> String {
        self.parser.parse(markdown).render()
    }
}

static RENDER_SERVICE: Lazy<Arc<FoglioRenderService>> =
    Lazy::new(|| Arc::new(FoglioRenderService::new()));

/// Access the shared render service instance, initialised on first use.
pub fn render_service() -> Arc<FoglioRenderService> {
    Arc::clone(&RENDER_SERVICE)
}

impl Default for FoglioRenderService {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderPipelineConfig {
    pub run: RunOptions,
    pub demo: DemoOptions,
}

impl From<&crate::config::RenderSettings> for RenderPipelineConfig {
    fn from(settings: &crate::config::RenderSettings) -> Self {
        Self {
            run: RunOptions {
                timeout_ms: settings.run_timeout_ms.get(),
                allow_require: settings.run_allow_require,
                badge: settings.run_badge.clone(),
            },
            demo: DemoOptions {
                flag: settings.demo_flag.clone(),
                badge: settings.demo_badge.clone(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderConfigError {
    #[error("render service already configured")]
    AlreadyConfigured,
}

static RENDER_PIPELINE_CONFIG: OnceCell<RenderPipelineConfig> = OnceCell::new();

/// Install the pipeline settings the shared service will pick up on first
/// use. Must be called before [`render_service`] and at most once.
pub fn configure_render_service(config: RenderPipelineConfig) -> Result<(), RenderConfigError> {
    RENDER_PIPELINE_CONFIG
        .set(config)
        .map_err(|_| RenderConfigError::AlreadyConfigured)
}

fn active_render_config() -> RenderPipelineConfig {
    RENDER_PIPELINE_CONFIG.get().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renders_plain_markdown() {
        let service = FoglioRenderService::with_config(RenderPipelineConfig::default());
        let request = RenderRequest::new("doc.md", "Hello *world*.\n");
        let html = service
            .render(&request)
            .await
            .expect("render should succeed");
        assert_eq!(html.trim(), "<p>Hello <em>world</em>.</p>");
    }

    #[tokio::test]
    async fn commonmark_extensions_are_installed() {
        let service = FoglioRenderService::with_config(RenderPipelineConfig::default());
        let request = RenderRequest::new(
            "doc.md",
            "A | B\n--- | ---\n1 | 2\n\n~~gone~~ and https://example.com\n",
        );
        let html = service
            .render(&request)
            .await
            .expect("render should succeed");
        assert!(html.contains("<table>"), "html: {html}");
        assert!(html.contains("<s>gone</s>"), "html: {html}");
        assert!(
            html.contains("<a href=\"https://example.com\""),
            "html: {html}"
        );
    }

    #[tokio::test]
    async fn math_rules_are_installed() {
        let service = FoglioRenderService::with_config(RenderPipelineConfig::default());
        let request = RenderRequest::new("doc.md", "Inline $a+b$ math.\n");
        let html = service
            .render(&request)
            .await
            .expect("render should succeed");
        assert!(html.contains("katex"), "html: {html}");
    }

    #[tokio::test]
    async fn pipeline_config_reaches_the_extensions() {
        let config = RenderPipelineConfig {
            run: RunOptions {
                badge: "custom js".to_string(),
                ..RunOptions::default()
            },
            demo: DemoOptions {
                flag: "show".to_string(),
                badge: "preview".to_string(),
            },
        };
        let service = FoglioRenderService::with_config(config);
        let request = RenderRequest::new(
            "doc.md",
            "```js run\n1 + 1\n```\n\n```html show\n<b>x</b>\n```\n",
        );
        let html = service
            .render(&request)
            .await
            .expect("render should succeed");
        assert!(html.contains("<js-run "), "html: {html}");
        assert!(html.contains("badge=\"custom js\""), "html: {html}");
        assert!(html.contains("<html-demo"), "html: {html}");
        assert!(html.contains("badge=\"preview\""), "html: {html}");
    }

    #[test]
    fn configure_render_service_rejects_reconfiguration() {
        let first = configure_render_service(RenderPipelineConfig::default());
        assert!(first.is_ok());
        let second = configure_render_service(RenderPipelineConfig::default());
        assert!(matches!(second, Err(RenderConfigError::AlreadyConfigured)));
    }
}
