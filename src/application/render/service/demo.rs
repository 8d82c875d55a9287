//! `html demo` fences rendered as an embeddable preview element.
//!
//! A fence whose info string names `html` or `xml` plus the configured demo
//! flag is replaced by a single `<html-demo>` element carrying the encoded
//! raw source and its highlighted markup. Every other fence is left for the
//! remaining fence passes.

use markdown_it::parser::core::CoreRule;
use markdown_it::parser::extset::MarkdownItExt;
use markdown_it::plugins::cmark::block::fence::CodeFence;
use markdown_it::{MarkdownIt, Node, NodeValue, Renderer};

use crate::config::{DEFAULT_DEMO_BADGE, DEFAULT_DEMO_FLAG};

use super::fence::FenceInfo;
use super::highlight;
use super::payload;

/// Settings for the demo fence pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoOptions {
    /// Info-string flag that marks a fence as a demo.
    pub flag: String,
    /// Display label carried on the emitted element.
    pub badge: String,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            flag: DEFAULT_DEMO_FLAG.to_string(),
            badge: DEFAULT_DEMO_BADGE.to_string(),
        }
    }
}

impl MarkdownItExt for DemoOptions {}

/// Installs the demo pass; must be installed before the line-numbering fence
/// pass so that demo fences are claimed first.
pub(super) fn add(md: &mut MarkdownIt, options: DemoOptions) {
    md.ext.insert(options);
    md.add_rule::<HtmlDemoPass>();
}

/// `<html-demo src code badge>` element.
#[derive(Debug)]
pub struct HtmlDemo {
    pub src: String,
    pub code: String,
    pub badge: String,
}

impl NodeValue for HtmlDemo {
    fn render(&self, _: &Node, fmt: &mut dyn Renderer) {
        fmt.cr();
        fmt.open(
            "html-demo",
            &[
                ("src", self.src.clone()),
                ("code", self.code.clone()),
                ("badge", self.badge.clone()),
            ],
        );
        fmt.close("html-demo");
        fmt.cr();
    }
}

pub struct HtmlDemoPass;

impl CoreRule for HtmlDemoPass {
    fn run(root: &mut Node, md: &MarkdownIt) {
        let options = md.ext.get::<DemoOptions>().cloned().unwrap_or_default();
        // Parsed flags are lowercased, so the configured one must be too.
        let flag = options.flag.to_ascii_lowercase();
        root.walk_mut(|node, _| {
            let Some(fence) = node.cast::<CodeFence>() else {
                return;
            };
            let info = FenceInfo::parse(&fence.info);
            if info.lang != "html" && info.lang != "xml" {
                return;
            }
            if !info.has_flag(&flag) {
                return;
            }
            let source = fence
                .content
                .strip_suffix('\n')
                .unwrap_or(&fence.content)
                .to_string();
            let markup = highlight::highlight("html", &source);
            node.replace(HtmlDemo {
                src: payload::encode(&source),
                code: payload::encode(&markup),
                badge: options.badge.clone(),
            });
        });
    }
}
