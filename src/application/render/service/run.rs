//! Build-time execution of `js run` fences.
//!
//! Runs before tokenization as a text-to-text pass, so evaluation happens
//! exactly once and its results are frozen into the markup the parser sees.
//! Matched fences become `<js-run>` elements; everything else, including
//! fences in other languages, passes through byte-for-byte. Snippets are
//! evaluated sequentially in document order.

use std::ops::Range;

use tokio::task;
use tracing::warn;

use crate::application::render::types::RenderError;
use crate::config::{DEFAULT_RUN_BADGE, DEFAULT_RUN_TIMEOUT_MS};

use super::fence::FenceInfo;
use super::highlight;
use super::payload::{self, escape_html};
use super::sandbox::{self, EvalOptions};

/// Settings for the run preprocessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Wall-clock budget per snippet in milliseconds.
    pub timeout_ms: u64,
    /// Expose `require` to snippets; trusted content only.
    pub allow_require: bool,
    /// Display label carried on the emitted element.
    pub badge: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_RUN_TIMEOUT_MS,
            allow_require: false,
            badge: DEFAULT_RUN_BADGE.to_string(),
        }
    }
}

/// Replaces every `js run` fence in `source` with an evaluated `<js-run>`
/// element, reproducing all other text verbatim.
pub(super) async fn preprocess(source: &str, options: &RunOptions) -> Result<String, RenderError> {
    let mut output = String::with_capacity(source.len());
    let mut cursor = 0;
    while let Some(found) = next_fence(source, cursor) {
        let info = FenceInfo::parse(&source[found.info.clone()]);
        let runnable = (info.lang == "js" || info.lang == "javascript") && info.has_flag("run");
        if !runnable {
            output.push_str(&source[cursor..found.end]);
            cursor = found.end;
            continue;
        }
        output.push_str(&source[cursor..found.start]);
        let body = &source[found.body.clone()];
        let result = evaluate_snippet(body.to_string(), options).await?;
        if let Some(error) = &result.error {
            warn!(
                target = "application::render::run",
                "embedded snippet failed: {error}"
            );
        }
        push_js_run_tag(&mut output, body, &result, &options.badge);
        cursor = found.end;
    }
    output.push_str(&source[cursor..]);
    Ok(output)
}

struct RawFence {
    start: usize,
    info: Range<usize>,
    body: Range<usize>,
    end: usize,
}

/// Finds the next backtick fence at or after `from`. The info string is the
/// non-empty remainder of the opening line; the earliest `\n` + triple
/// backtick closes the body. Tilde fences are out of scope. A candidate that
/// cannot close resumes the scan one byte later, so overlapping backtick
/// runs behave like a lazy regex search.
fn next_fence(source: &str, mut from: usize) -> Option<RawFence> {
    while from < source.len() {
        let start = source[from..].find("```")? + from;
        let info_start = start + 3;
        let info_len = source[info_start..].find('\n')?;
        if info_len == 0 {
            from = start + 1;
            continue;
        }
        let body_start = info_start + info_len + 1;
        let Some(close) = source[body_start..].find("\n```") else {
            from = start + 1;
            continue;
        };
        let body_end = body_start + close;
        return Some(RawFence {
            start,
            info: info_start..info_start + info_len,
            body: body_start..body_end,
            end: body_end + 4,
        });
    }
    None
}

/// Evaluation blocks on the JavaScript engine, so it runs on the blocking
/// pool. Only a panicked or cancelled worker surfaces as an error; snippet
/// failures stay inside the result.
async fn evaluate_snippet(
    body: String,
    options: &RunOptions,
) -> Result<sandbox::EvaluationResult, RenderError> {
    let eval = EvalOptions {
        timeout_ms: options.timeout_ms,
        allow_require: options.allow_require,
    };
    task::spawn_blocking(move || sandbox::evaluate(&body, &eval))
        .await
        .map_err(|err| RenderError::Evaluation {
            message: err.to_string(),
        })
}

fn push_js_run_tag(
    output: &mut String,
    body: &str,
    result: &sandbox::EvaluationResult,
    badge: &str,
) {
    let logs =
        serde_json::to_string(&result.logs).expect("serialising captured logs should succeed");
    output.push_str("<js-run src=\"");
    output.push_str(&payload::encode(body));
    output.push_str("\" code=\"");
    output.push_str(&payload::encode(&highlight::highlight("javascript", body)));
    output.push_str("\" logs=\"");
    output.push_str(&payload::encode(&logs));
    if let Some(value) = &result.value {
        let json = serde_json::to_string(value).expect("serialising snippet value should succeed");
        output.push_str("\" value=\"");
        output.push_str(&payload::encode(&json));
    }
    if let Some(error) = &result.error {
        let json = serde_json::to_string(error).expect("serialising snippet error should succeed");
        output.push_str("\" error=\"");
        output.push_str(&payload::encode(&json));
    }
    output.push_str("\" badge=\"");
    output.push_str(&escape_html(badge));
    output.push_str("\"></js-run>\n");
}
