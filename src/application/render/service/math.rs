//! Inline and display math, typeset through KaTeX at parse time.
//!
//! Both rules capture the rendered markup on the node while parsing, so
//! rendering is a plain lookup. Typesetting failures never abort the parse;
//! the affected span degrades to its raw delimited source text.

use katex::{OptsBuilder, OutputType};
use markdown_it::parser::block::{BlockRule, BlockState};
use markdown_it::parser::inline::{InlineRule, InlineState};
use markdown_it::{MarkdownIt, Node, NodeValue, Renderer};
use tracing::warn;

use crate::application::render::types::RenderError;

/// Installs the inline and block math rules.
pub(super) fn add(md: &mut MarkdownIt) {
    md.inline.add_rule::<InlineMathScanner>();
    md.block.add_rule::<BlockMathScanner>();
}

/// An inline `$...$` span.
#[derive(Debug)]
pub struct InlineMath {
    pub content: String,
    pub marker: &'static str,
    pub rendered: Option<String>,
}

impl NodeValue for InlineMath {
    fn render(&self, _: &Node, fmt: &mut dyn Renderer) {
        match &self.rendered {
            Some(html) => fmt.text_raw(html),
            None => fmt.text(&format!("{m}{c}{m}", m = self.marker, c = self.content)),
        }
    }
}

/// A display `$$ ... $$` block.
#[derive(Debug)]
pub struct BlockMath {
    pub content: String,
    pub marker: &'static str,
    pub rendered: Option<String>,
}

impl NodeValue for BlockMath {
    fn render(&self, _: &Node, fmt: &mut dyn Renderer) {
        fmt.cr();
        match &self.rendered {
            Some(html) => fmt.text_raw(html),
            None => {
                fmt.open("p", &[]);
                fmt.text(&format!("{m}\n{c}\n{m}", m = self.marker, c = self.content));
                fmt.close("p");
            }
        }
        fmt.cr();
    }
}

pub struct InlineMathScanner;

impl InlineRule for InlineMathScanner {
    const MARKER: char = '$';

    fn run(state: &mut InlineState) -> Option<(Node, usize)> {
        let input = &state.src[state.pos..state.pos_max];
        if !input.starts_with('$') {
            return None;
        }
        let close = find_closing_dollar(input)?;
        // A `$$` run belongs to the block rule, never to this one: decline
        // when the span is empty or the closer is followed by another `$`.
        if close == 1 {
            return None;
        }
        if input.as_bytes().get(close + 1) == Some(&b'$') {
            return None;
        }
        let content = input[1..close].to_string();
        let rendered = typeset(&content, false);
        let node = Node::new(InlineMath {
            content,
            marker: "$",
            rendered,
        });
        Some((node, close + 1))
    }
}

/// Byte offset of the next unescaped `$`. A `$` counts as escaped only when
/// the backslash run before it has odd length, so `\$` hides the delimiter
/// while `\\$` (an escaped backslash) does not.
fn find_closing_dollar(input: &str) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut backslashes = 0;
    for (index, &byte) in bytes.iter().enumerate().skip(1) {
        match byte {
            b'\\' => backslashes += 1,
            b'$' if backslashes % 2 == 0 => return Some(index),
            _ => backslashes = 0,
        }
    }
    None
}

pub struct BlockMathScanner;

impl BlockRule for BlockMathScanner {
    fn run(state: &mut BlockState) -> Option<(Node, usize)> {
        let opening = state.get_line(state.line);
        if !opening.starts_with("$$") {
            return None;
        }
        let mut closing = state.line + 1;
        while closing < state.line_max {
            if state.get_line(closing).trim() == "$$" {
                break;
            }
            closing += 1;
        }
        if closing >= state.line_max {
            return None;
        }
        let (content, _) = state.get_lines(state.line + 1, closing, 0, false);
        let rendered = typeset(&content, true);
        let node = Node::new(BlockMath {
            content,
            marker: "$$",
            rendered,
        });
        Some((node, closing + 1 - state.line))
    }
}

fn typeset(literal: &str, display_mode: bool) -> Option<String> {
    match render_math_html(literal, display_mode) {
        Ok(html) => Some(html),
        Err(err) => {
            warn!(
                target = "application::render::math",
                display_mode, "math typesetting failed, emitting raw source: {err}"
            );
            None
        }
    }
}

/// Render a KaTeX expression to HTML, returning an inline (`<span>`) or block (`<div>`) fragment.
pub(crate) fn render_math_html(literal: &str, display_mode: bool) -> Result<String, RenderError> {
    let mut builder = OptsBuilder::default();
    builder.display_mode(display_mode);
    builder.output_type(OutputType::Html);

    let opts = builder.build().map_err(|err| RenderError::Document {
        message: format!("failed to build KaTeX options: {err}"),
    })?;

    katex::render_with_opts(literal, opts).map_err(|err| RenderError::Document {
        message: format!("KaTeX rendering failed: {err}"),
    })
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
    fn inline_math_renders_katex_markup() {
        let html = render("Euler says $a+b$ here.");
        assert!(html.contains("katex"), "html: {html}");
        assert!(!html.contains("$a+b$"), "html: {html}");
    }

    #[test]
    fn dollar_span_with_equals_is_inline_math() {
        let html = render("$x=1$");
        assert!(html.contains("katex"), "html: {html}");
        assert!(!html.contains("$x=1$"), "html: {html}");
    }

    #[test]
    fn double_dollar_run_is_never_captured_inline() {
        let html = render("$$x=1$$");
        assert!(html.contains("$$x=1$$"), "html: {html}");
        assert!(!html.contains("katex"), "html: {html}");
    }

    #[test]
    fn empty_span_stays_literal() {
        let html = render("$$");
        assert!(html.contains("$$"), "html: {html}");
        assert!(!html.contains("katex"), "html: {html}");
    }

    #[test]
    fn escaped_dollars_do_not_open_math() {
        let html = render(r"\$5 and \$6");
        assert!(html.contains("$5 and $6"), "html: {html}");
        assert!(!html.contains("katex"), "html: {html}");
    }

    #[test]
    fn escaped_dollar_inside_a_span_is_not_a_closer() {
        let html = render(r"$a \$ b$");
        assert!(html.contains("katex"), "html: {html}");
    }

    #[test]
    fn backslash_runs_escape_only_when_odd() {
        assert_eq!(find_closing_dollar(r"$a\$b$"), Some(5));
        assert_eq!(find_closing_dollar(r"$a\\$b$"), Some(4));
        assert_eq!(find_closing_dollar(r"$a\\\$b$"), Some(7));
    }

    #[test]
    fn doubled_backslash_does_not_escape_the_closer() {
        let html = render(r"$a\\$ and $b$ later");
        assert!(html.contains("katex"), "html: {html}");
        assert!(!html.contains("$b$"), "html: {html}");
    }

    #[test]
    fn malformed_inline_math_falls_back_to_raw_text() {
        let html = render(r"see $\frac{a}{$ here");
        assert!(html.contains(r"$\frac{a}{$"), "html: {html}");
        assert!(!html.contains("katex"), "html: {html}");
    }

    #[test]
    fn multiple_inline_spans_render_independently() {
        let html = render("a $b$ c $d$ e");
        assert!(html.matches("katex").count() >= 2, "html: {html}");
    }

    #[test]
    fn block_math_renders_display_markup() {
        let html = render("$$\nc = a + b\n$$\n");
        assert!(html.contains("katex-display"), "html: {html}");
    }

    #[test]
    fn block_content_spans_multiple_source_lines() {
        let html = render("$$\na +\nb\n$$\n");
        assert!(html.contains("katex-display"), "html: {html}");
        assert!(!html.contains("$$"), "html: {html}");
    }

    #[test]
    fn block_opening_line_extras_are_discarded() {
        let html = render("$$ teaser\nx\n$$\n");
        assert!(html.contains("katex-display"), "html: {html}");
        assert!(!html.contains("teaser"), "html: {html}");
    }

    #[test]
    fn unterminated_block_stays_literal() {
        let html = render("$$\nc = a + b\n");
        assert!(html.contains("$$"), "html: {html}");
        assert!(html.contains("c = a + b"), "html: {html}");
        assert!(!html.contains("katex"), "html: {html}");
    }

    #[test]
    fn malformed_block_math_degrades_to_a_paragraph() {
        let html = render("$$\n\\frac{a}{\n$$\n");
        assert!(html.contains("<p>$$\n\\frac{a}{\n$$</p>"), "html: {html}");
        assert!(!html.contains("katex"), "html: {html}");
    }

    #[test]
    fn typeset_modes_differ_in_display_class() {
        let inline = render_math_html("a+b", false).expect("inline should typeset");
        let block = render_math_html("a+b", true).expect("display should typeset");
        assert!(!inline.contains("katex-display"));
        assert!(block.contains("katex-display"));
    }
}
