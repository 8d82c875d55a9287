use std::{io, path::Path, process};

use foglio::{
    application::{
        error::AppError,
        render::{
            RenderPipelineConfig, RenderRequest, configure_render_service, payload, render_service,
        },
    },
    config,
    infra::{error::InfraError, telemetry},
};
use tokio::fs;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Render(config::RenderArgs::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    configure_render_service(RenderPipelineConfig::from(&settings.render))
        .map_err(|err| AppError::unexpected(err.to_string()))?;

    match command {
        config::Command::Render(args) => run_render(args).await,
        config::Command::Check(args) => run_check(args).await,
    }
}

async fn run_render(args: config::RenderArgs) -> Result<(), AppError> {
    let request = read_markdown(args.input.as_deref()).await?;

    info!(
        target = "foglio::render",
        document = %request.document,
        "Starting render"
    );

    let html = render_service().render(&request).await?;

    match &args.output {
        Some(path) => {
            fs::write(path, html.as_bytes()).await.map_err(|err| {
                AppError::unexpected(format!("failed to write `{}`: {err}", path.display()))
            })?;
            info!(
                target = "foglio::render",
                document = %request.document,
                output = %path.display(),
                "Render completed"
            );
        }
        None => {
            print!("{html}");
            info!(
                target = "foglio::render",
                document = %request.document,
                "Render completed"
            );
        }
    }

    Ok(())
}

async fn run_check(args: config::CheckArgs) -> Result<(), AppError> {
    let request = read_markdown(args.input.as_deref()).await?;

    info!(
        target = "foglio::check",
        document = %request.document,
        "Starting check"
    );

    let html = render_service().render(&request).await?;
    let snippets = html.match_indices("<js-run ").count();
    let failures = snippet_failures(&html);

    if !failures.is_empty() {
        for failure in &failures {
            error!(
                target = "foglio::check",
                document = %request.document,
                error = %failure,
                "snippet evaluation failed"
            );
        }
        return Err(AppError::validation(format!(
            "{}: {} of {} snippet(s) failed to evaluate",
            request.document,
            failures.len(),
            snippets,
        )));
    }

    info!(
        target = "foglio::check",
        document = %request.document,
        snippets,
        "Check completed"
    );
    Ok(())
}

async fn read_markdown(input: Option<&Path>) -> Result<RenderRequest, AppError> {
    match input {
        Some(path) => {
            let markdown = fs::read_to_string(path).await.map_err(|err| {
                AppError::unexpected(format!("failed to read `{}`: {err}", path.display()))
            })?;
            Ok(RenderRequest::new(path.display().to_string(), markdown))
        }
        None => {
            let markdown = io::read_to_string(io::stdin())
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            Ok(RenderRequest::new("<stdin>", markdown))
        }
    }
}

/// Collect the decoded `error` attributes of every `<js-run>` element in the
/// rendered document. Snippet failures are emitted in-band by the render
/// pipeline, so checking a document means rendering it and inspecting the
/// output.
fn snippet_failures(html: &str) -> Vec<String> {
    let mut failures = Vec::new();

    for (start, _) in html.match_indices("<js-run ") {
        let Some(tag_len) = html[start..].find('>') else {
            continue;
        };
        let tag = &html[start..start + tag_len];
        let Some(attr_start) = tag.find(" error=\"") else {
            continue;
        };
        let encoded_start = attr_start + " error=\"".len();
        let Some(encoded_len) = tag[encoded_start..].find('"') else {
            continue;
        };
        let encoded = &tag[encoded_start..encoded_start + encoded_len];
        match decode_error_attribute(encoded) {
            Some(message) => failures.push(message),
            None => failures.push("unreadable error payload".to_string()),
        }
    }

    failures
}

fn decode_error_attribute(encoded: &str) -> Option<String> {
    let json = payload::decode(encoded).ok()?;
    serde_json::from_str::<String>(&json).ok()
}
