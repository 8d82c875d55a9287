//! QuickJS evaluation sandbox for executable snippets.
//!
//! Every call builds a fresh runtime and context, so snippets cannot observe
//! one another or the host. The only injected capabilities are a capturing
//! `console` and, when enabled, a CommonJS-style `require`. All failures
//! (thrown values, timeouts, unserialisable results) are reported inside the
//! returned [`EvaluationResult`]; [`evaluate`] never panics and never returns
//! an error to the caller.

use std::cell::RefCell;
use std::fs;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rquickjs::prelude::{Coerced, Func, Rest};
use rquickjs::promise::Promise;
use rquickjs::{Context, Ctx, Exception, FromJs, Function, Object, Runtime, Value};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::DEFAULT_RUN_TIMEOUT_MS;

const MEMORY_LIMIT_BYTES: usize = 64 * 1024 * 1024;
// Evaluation runs on tokio blocking threads with 2 MiB native stacks; the
// engine limit must stay well inside that.
const STACK_LIMIT_BYTES: usize = 1024 * 1024;

/// Options for a single evaluation.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Wall-clock budget in milliseconds, covering promise settlement too.
    pub timeout_ms: u64,
    /// Expose `require`/`module`/`exports` to the snippet. Modules are read
    /// from disk relative to the working directory; trusted content only.
    pub allow_require: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_RUN_TIMEOUT_MS,
            allow_require: false,
        }
    }
}

/// Outcome of one snippet evaluation.
///
/// `value` carries the JSON form of the completion value and is absent when
/// the snippet completed with something JSON has no value for (`undefined`,
/// a function). `error` is present exactly when the snippet failed; captured
/// `logs` survive a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Evaluates one JavaScript snippet, reporting the outcome in-band.
pub fn evaluate(code: &str, options: &EvalOptions) -> EvaluationResult {
    let logs = Rc::new(RefCell::new(Vec::new()));
    let (value, error) = match run_snippet(code, options, &logs) {
        Ok(outcome) => outcome,
        Err(err) => (None, Some(format!("sandbox initialisation failed: {err}"))),
    };
    let logs = logs.borrow().clone();
    EvaluationResult { logs, value, error }
}

fn run_snippet(
    code: &str,
    options: &EvalOptions,
    logs: &Rc<RefCell<Vec<String>>>,
) -> rquickjs::Result<(Option<serde_json::Value>, Option<String>)> {
    let runtime = Runtime::new()?;
    runtime.set_memory_limit(MEMORY_LIMIT_BYTES);
    runtime.set_max_stack_size(STACK_LIMIT_BYTES);

    let deadline = now_ms().saturating_add(options.timeout_ms);
    let armed = Arc::new(AtomicU64::new(deadline));
    let guard = Arc::clone(&armed);
    runtime.set_interrupt_handler(Some(Box::new(move || {
        now_ms() >= guard.load(Ordering::Relaxed)
    })));

    let context = Context::full(&runtime)?;
    context.with(|ctx| {
        install_console(&ctx, logs)?;
        if options.allow_require {
            install_require(&ctx)?;
        }
        Ok::<_, rquickjs::Error>(())
    })?;

    let source = wrap_snippet(code);
    let timeout_ms = options.timeout_ms;
    let outcome = context.with(|ctx| {
        let completion = match ctx.eval::<Value, _>(source.as_str()) {
            Ok(completion) => completion,
            Err(_) => return (None, Some(failure_text(&ctx, deadline, timeout_ms))),
        };
        let settled = if is_thenable(&completion) {
            match settle(&ctx, completion) {
                Ok(settled) => settled,
                Err(rquickjs::Error::WouldBlock) => {
                    return (None, Some(timeout_text(timeout_ms)));
                }
                Err(_) => return (None, Some(failure_text(&ctx, deadline, timeout_ms))),
            }
        } else {
            completion
        };
        (serialize_completion(&ctx, settled), None)
    });
    Ok(outcome)
}

/// `await` outside an async context is a syntax error, so snippets using it
/// get an async wrapper. Everything else runs directly as a script, which
/// makes the final expression statement the completion value.
fn wrap_snippet(code: &str) -> String {
    if contains_await(code) {
        format!("(async()=>{{ {code}\n}})()")
    } else {
        code.to_string()
    }
}

/// Word-boundary scan for the `await` keyword, without pulling in a regex
/// engine for one pattern.
fn contains_await(code: &str) -> bool {
    let bytes = code.as_bytes();
    let mut from = 0;
    while let Some(found) = code[from..].find("await") {
        let start = from + found;
        let end = start + "await".len();
        let bounded_left = start == 0 || !is_word_byte(bytes[start - 1]);
        let bounded_right = end == bytes.len() || !is_word_byte(bytes[end]);
        if bounded_left && bounded_right {
            return true;
        }
        from = start + 1;
    }
    false
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn install_console(ctx: &Ctx<'_>, logs: &Rc<RefCell<Vec<String>>>) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;
    let sink = Rc::clone(logs);
    console.set(
        "log",
        Func::from(move |args: Rest<Value>| {
            let line = console_line(&args.0);
            sink.borrow_mut().push(line);
        }),
    )?;
    let sink = Rc::clone(logs);
    console.set(
        "info",
        Func::from(move |args: Rest<Value>| {
            let line = console_line(&args.0);
            sink.borrow_mut().push(line);
        }),
    )?;
    let sink = Rc::clone(logs);
    console.set(
        "warn",
        Func::from(move |args: Rest<Value>| {
            let line = format!("[warn] {}", console_line(&args.0));
            sink.borrow_mut().push(line);
        }),
    )?;
    let sink = Rc::clone(logs);
    console.set(
        "error",
        Func::from(move |args: Rest<Value>| {
            let line = format!("[error] {}", console_line(&args.0));
            sink.borrow_mut().push(line);
        }),
    )?;
    ctx.globals().set("console", console)
}

/// Formats one console call. The context comes from the first argument, so a
/// zero-argument call becomes an empty line. Formatting may run user code
/// (`toJSON`, property getters) that logs again, so callers must not hold
/// the sink borrowed across this call.
fn console_line(args: &[Value<'_>]) -> String {
    match args.first() {
        Some(first) => format_arguments(first.ctx(), args),
        None => String::new(),
    }
}

fn format_arguments<'js>(ctx: &Ctx<'js>, args: &[Value<'js>]) -> String {
    let parts: Vec<String> = args.iter().map(|arg| format_argument(ctx, arg)).collect();
    parts.join(" ")
}

/// Strings pass through verbatim, everything else goes through JSON, and
/// values JSON has no representation for become empty strings, the way
/// `Array.prototype.join` renders them.
fn format_argument<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> String {
    if let Some(text) = value.as_string() {
        return text.to_string().unwrap_or_default();
    }
    match ctx.json_stringify(value.clone()) {
        Ok(Some(json)) => json.to_string().unwrap_or_default(),
        Ok(None) => String::new(),
        Err(_) => {
            let _ = ctx.catch();
            match Coerced::<String>::from_js(ctx, value.clone()) {
                Ok(Coerced(text)) => text,
                Err(_) => {
                    let _ = ctx.catch();
                    String::new()
                }
            }
        }
    }
}

const REQUIRE_BOOTSTRAP: &str = r#"
globalThis.module = { exports: {} };
globalThis.exports = globalThis.module.exports;
globalThis.require = function require(path) {
    var source = globalThis.__foglio_read_module(String(path));
    var loaded = { exports: {} };
    var factory = new Function("module", "exports", "require", source);
    factory(loaded, loaded.exports, globalThis.require);
    return loaded.exports;
};
"#;

fn install_require(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let reader = Func::from(|ctx: Ctx, path: String| -> rquickjs::Result<String> {
        fs::read_to_string(&path).map_err(|err| {
            Exception::throw_message(&ctx, &format!("cannot load module {path:?}: {err}"))
        })
    });
    ctx.globals().set("__foglio_read_module", reader)?;
    ctx.eval::<(), _>(REQUIRE_BOOTSTRAP)
}

fn is_thenable(value: &Value<'_>) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    object
        .get::<_, Value>("then")
        .map(|then| then.is_function())
        .unwrap_or(false)
}

/// Drives a thenable to settlement through the engine job queue.
/// `Promise.resolve` upgrades bare thenables to native promises first.
fn settle<'js>(ctx: &Ctx<'js>, completion: Value<'js>) -> rquickjs::Result<Value<'js>> {
    let resolve: Function = ctx.eval("Promise.resolve.bind(Promise)")?;
    let promise: Promise = resolve.call((completion,))?;
    promise.finish::<Value>()
}

fn serialize_completion<'js>(ctx: &Ctx<'js>, completion: Value<'js>) -> Option<serde_json::Value> {
    match ctx.json_stringify(completion) {
        Ok(Some(json)) => {
            let text = json.to_string().ok()?;
            match serde_json::from_str(&text) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(
                        target = "application::render::sandbox",
                        "completion value produced unparseable JSON, omitting it: {err}"
                    );
                    None
                }
            }
        }
        Ok(None) => None,
        Err(_) => {
            let _ = ctx.catch();
            warn!(
                target = "application::render::sandbox",
                "completion value is not JSON-serialisable, omitting it"
            );
            None
        }
    }
}

fn timeout_text(timeout_ms: u64) -> String {
    format!("Timed out after {timeout_ms}ms")
}

/// A failed evaluation counts as a timeout once the deadline has passed; the
/// interrupt handler only surfaces an uninformative engine exception.
fn failure_text<'js>(ctx: &Ctx<'js>, deadline: u64, timeout_ms: u64) -> String {
    let thrown = ctx.catch();
    if now_ms() >= deadline {
        return timeout_text(timeout_ms);
    }
    describe_thrown(ctx, thrown)
}

/// Prefers the exception's own message and stack, then string coercion of
/// whatever was thrown.
fn describe_thrown<'js>(ctx: &Ctx<'js>, thrown: Value<'js>) -> String {
    if let Some(exception) = thrown.as_exception() {
        return exception.to_string();
    }
    match Coerced::<String>::from_js(ctx, thrown) {
        Ok(Coerced(text)) => text,
        Err(_) => {
            let _ = ctx.catch();
            String::from("uncaught value")
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
