//! Line-numbered rendering for ordinary code fences.
//!
//! Replaces every fence the demo and run extensions did not claim with a
//! highlighted block whose lines are individually wrapped, so stylesheets
//! can number them. Claim detection is the same coarse info-string scan the
//! extensions use, keeping the three passes disjoint.

use markdown_it::parser::core::CoreRule;
use markdown_it::plugins::cmark::block::fence::CodeFence;
use markdown_it::{MarkdownIt, Node, NodeValue, Renderer};

use super::fence::{self, FenceInfo};
use super::highlight;

const LINE_OPEN: &str = "<span class=\"line\">";

/// Installs the line-numbering fence pass.
pub(super) fn add(md: &mut MarkdownIt) {
    md.add_rule::<LinedCodePass>();
}

/// `<pre class="code-with-lines">` block of per-line highlighted markup.
#[derive(Debug)]
pub struct LinedCode {
    pub lang: String,
    pub markup: String,
}

impl NodeValue for LinedCode {
    fn render(&self, _: &Node, fmt: &mut dyn Renderer) {
        let class = if self.lang.is_empty() {
            "hljs".to_string()
        } else {
            format!("hljs language-{}", self.lang)
        };
        fmt.cr();
        fmt.open("pre", &[("class", "code-with-lines".to_string())]);
        fmt.open("code", &[("class", class)]);
        fmt.text_raw(&self.markup);
        fmt.close("code");
        fmt.close("pre");
        fmt.cr();
    }
}

pub struct LinedCodePass;

impl CoreRule for LinedCodePass {
    fn run(root: &mut Node, _: &MarkdownIt) {
        root.walk_mut(|node, _| {
            let Some(code) = node.cast::<CodeFence>() else {
                return;
            };
            if fence::claimed_by_extension(&code.info) {
                return;
            }
            let info = FenceInfo::parse(&code.info);
            let markup = wrap_line_spans(&highlight::highlight(&info.lang, &code.content));
            node.replace(LinedCode {
                lang: info.lang,
                markup,
            });
        });
    }
}

/// Wraps each line of highlighted markup in a line span, closing and
/// reopening any highlighting spans that straddle the newline so the output
/// stays balanced.
pub(super) fn wrap_line_spans(markup: &str) -> String {
    let mut wrapped = String::with_capacity(markup.len() * 2);
    let mut open_tags: Vec<&str> = Vec::new();
    wrapped.push_str(LINE_OPEN);
    let mut rest = markup;
    while let Some(stop) = rest.find(|c| c == '<' || c == '\n') {
        wrapped.push_str(&rest[..stop]);
        rest = &rest[stop..];
        if let Some(after) = rest.strip_prefix('\n') {
            for _ in &open_tags {
                wrapped.push_str("</span>");
            }
            wrapped.push_str("</span>\n");
            wrapped.push_str(LINE_OPEN);
            for tag in &open_tags {
                wrapped.push_str(tag);
            }
            rest = after;
        } else {
            let end = rest.find('>').map(|at| at + 1).unwrap_or(rest.len());
            wrapped.push_str(&rest[..end]);
            if rest.starts_with("</") {
                open_tags.pop();
            } else {
                open_tags.push(&rest[..end]);
            }
            rest = &rest[end..];
        }
    }
    wrapped.push_str(rest);
    for _ in &open_tags {
        wrapped.push_str("</span>");
    }
    wrapped.push_str("</span>");
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(input: &str) -> String {
        let mut md = MarkdownIt::new();
        markdown_it::plugins::cmark::add(&mut md);
        add(&mut md);
        md.parse(input).render()
    }

    #[test]
    fn wrap_line_spans_balances_spans_across_lines() {
        let wrapped = wrap_line_spans("<span class=\"source\">a\nb</span>");
        assert_eq!(
            wrapped,
            "<span class=\"line\"><span class=\"source\">a</span></span>\n\
             <span class=\"line\"><span class=\"source\">b</span></span>"
        );
    }

    #[test]
    fn wrap_line_spans_keeps_a_trailing_newline_as_an_empty_line() {
        let wrapped = wrap_line_spans("x\n");
        assert_eq!(
            wrapped,
            "<span class=\"line\">x</span>\n<span class=\"line\"></span>"
        );
    }

    #[test]
    fn wrap_line_spans_closes_unterminated_spans() {
        let wrapped = wrap_line_spans("<span class=\"a\">x");
        assert_eq!(
            wrapped,
            "<span class=\"line\"><span class=\"a\">x</span></span>"
        );
    }

    #[test]
    fn fences_render_with_line_spans() {
        let html = render("```python\nprint('hi')\n```\n");
        assert!(html.contains("<pre class=\"code-with-lines\">"), "html: {html}");
        assert!(html.contains("language-python"), "html: {html}");
        assert!(html.contains(LINE_OPEN), "html: {html}");
        assert!(html.contains("print"), "html: {html}");
    }

    #[test]
    fn language_class_uses_the_parsed_lowercased_token() {
        let html = render("```Rust extra\nfn main() {}\n```\n");
        assert!(html.contains("language-rust"), "html: {html}");
    }

    #[test]
    fn bare_fences_get_only_the_hljs_class() {
        let html = render("```\nplain text\n```\n");
        assert!(html.contains("class=\"hljs\""), "html: {html}");
        assert!(!html.contains("language-"), "html: {html}");
    }

    #[test]
    fn extension_fences_are_left_for_their_own_passes() {
        let html = render("```html demo\n<b>x</b>\n```\n");
        assert!(!html.contains("code-with-lines"), "html: {html}");
        assert!(html.contains("&lt;b&gt;"), "html: {html}");
    }

    #[test]
    fn indented_code_blocks_are_untouched() {
        let html = render("    indented line\n");
        assert!(!html.contains("code-with-lines"), "html: {html}");
        assert!(html.contains("indented line"), "html: {html}");
    }
}
