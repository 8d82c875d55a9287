//! Syntax highlighting with a never-fail fallback chain.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use syntect::{
    html::{ClassStyle, ClassedHTMLGenerator},
    parsing::{SyntaxReference, SyntaxSet},
    util::LinesWithEndings,
};
use tracing::warn;

use crate::application::render::types::RenderError;

use super::payload::escape_html;

/// Class-only output; colour themes stay in CSS.
const HIGHLIGHT_CLASS_STYLE: ClassStyle = ClassStyle::Spaced;

static SYNTAX_SET: Lazy<SyntaxSet> = Lazy::new(SyntaxSet::load_defaults_newlines);

/// Highlights `code`, degrading from the named grammar to first-line
/// detection to escaped plain text. Always returns markup.
pub fn highlight(language: &str, code: &str) -> String {
    let syntax_set = &*SYNTAX_SET;
    if let Some(syntax) = find_syntax(syntax_set, language) {
        match classed_markup(syntax_set, syntax, language, code) {
            Ok(markup) => return markup,
            Err(err) => warn!(
                target = "application::render::highlight",
                language, "highlighting failed, trying detection: {err}"
            ),
        }
    }
    let first_line = code.lines().next().unwrap_or_default();
    if let Some(syntax) = syntax_set.find_syntax_by_first_line(first_line) {
        match classed_markup(syntax_set, syntax, language, code) {
            Ok(markup) => return markup,
            Err(err) => warn!(
                target = "application::render::highlight",
                language, "detected-grammar highlighting failed, escaping instead: {err}"
            ),
        }
    }
    escape_html(code)
}

fn classed_markup(
    syntax_set: &SyntaxSet,
    syntax: &SyntaxReference,
    language: &str,
    code: &str,
) -> Result<String, RenderError> {
    // The line parser expects newline-terminated lines.
    let code = newline_terminated(code);
    let mut generator =
        ClassedHTMLGenerator::new_with_class_style(syntax, syntax_set, HIGHLIGHT_CLASS_STYLE);
    for line in LinesWithEndings::from(code.as_ref()) {
        generator
            .parse_html_for_line_which_includes_newline(line)
            .map_err(|err| RenderError::Highlighting {
                language: language.to_string(),
                message: err.to_string(),
            })?;
    }
    Ok(generator.finalize())
}

fn find_syntax<'a>(syntax_set: &'a SyntaxSet, token: &str) -> Option<&'a SyntaxReference> {
    let lowercase = token.to_ascii_lowercase();
    syntax_set
        .find_syntax_by_token(&lowercase)
        .or_else(|| syntax_set.find_syntax_by_name(&lowercase))
        .or_else(|| syntax_set.find_syntax_by_extension(&lowercase))
}

fn newline_terminated(code: &str) -> Cow<'_, str> {
    if code.ends_with('\n') {
        Cow::Borrowed(code)
    } else {
        Cow::Owned(format!("{code}\n"))
    }
}
