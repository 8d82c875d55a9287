//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU64, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "foglio";
pub(crate) const DEFAULT_RUN_TIMEOUT_MS: u64 = 2_000;
pub(crate) const DEFAULT_RUN_BADGE: &str = "js (built)";
pub(crate) const DEFAULT_DEMO_FLAG: &str = "demo";
pub(crate) const DEFAULT_DEMO_BADGE: &str = "html";

/// Command-line arguments for the Foglio binary.
#[derive(Debug, Parser)]
#[command(name = "foglio", version, about = "Foglio markdown pipeline")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FOGLIO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render a markdown document to HTML.
    Render(RenderArgs),
    /// Evaluate a document's executable fences and report failures.
    Check(CheckArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: PipelineOverrides,

    /// Input markdown file; reads stdin when omitted.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: Option<PathBuf>,

    /// Output HTML file; writes stdout when omitted.
    #[arg(
        short = 'o',
        long = "output",
        value_name = "FILE",
        value_hint = ValueHint::FilePath
    )]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub overrides: PipelineOverrides,

    /// Input markdown file; reads stdin when omitted.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PipelineOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the per-snippet evaluation budget in milliseconds.
    #[arg(long = "run-timeout-ms", value_name = "MILLIS")]
    pub run_timeout_ms: Option<u64>,

    /// Expose `require` to executed snippets; trusted content only.
    #[arg(
        long = "run-allow-require",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub run_allow_require: Option<bool>,

    /// Override the badge label on executed-snippet elements.
    #[arg(long = "run-badge", value_name = "LABEL")]
    pub run_badge: Option<String>,

    /// Override the fence flag that marks HTML demos.
    #[arg(long = "demo-flag", value_name = "FLAG")]
    pub demo_flag: Option<String>,

    /// Override the badge label on demo elements.
    #[arg(long = "demo-badge", value_name = "LABEL")]
    pub demo_badge: Option<String>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub run_timeout_ms: NonZeroU64,
    pub run_allow_require: bool,
    pub run_badge: String,
    pub demo_flag: String,
    pub demo_badge: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("FOGLIO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Render(args)) => raw.apply_overrides(&args.overrides),
        Some(Command::Check(args)) => raw.apply_overrides(&args.overrides),
        None => raw.apply_overrides(&PipelineOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    render: RawRenderSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &PipelineOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(timeout) = overrides.run_timeout_ms {
            self.render.run_timeout_ms = Some(timeout);
        }
        if let Some(allow) = overrides.run_allow_require {
            self.render.run_allow_require = Some(allow);
        }
        if let Some(badge) = overrides.run_badge.as_ref() {
            self.render.run_badge = Some(badge.clone());
        }
        if let Some(flag) = overrides.demo_flag.as_ref() {
            self.render.demo_flag = Some(flag.clone());
        }
        if let Some(badge) = overrides.demo_badge.as_ref() {
            self.render.demo_badge = Some(badge.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, render } = raw;

        let logging = build_logging_settings(logging)?;
        let render = build_render_settings(render)?;

        Ok(Self { logging, render })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let timeout_value = render.run_timeout_ms.unwrap_or(DEFAULT_RUN_TIMEOUT_MS);
    let run_timeout_ms = NonZeroU64::new(timeout_value)
        .ok_or_else(|| LoadError::invalid("render.run_timeout_ms", "must be greater than zero"))?;

    let run_allow_require = render.run_allow_require.unwrap_or(false);

    let run_badge = render
        .run_badge
        .unwrap_or_else(|| DEFAULT_RUN_BADGE.to_string());

    let demo_flag = render
        .demo_flag
        .unwrap_or_else(|| DEFAULT_DEMO_FLAG.to_string());
    if demo_flag.trim().is_empty() {
        return Err(LoadError::invalid(
            "render.demo_flag",
            "flag must not be empty",
        ));
    }

    let demo_badge = render
        .demo_badge
        .unwrap_or_else(|| DEFAULT_DEMO_BADGE.to_string());

    Ok(RenderSettings {
        run_timeout_ms,
        run_allow_require,
        run_badge,
        demo_flag,
        demo_badge,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    run_timeout_ms: Option<u64>,
    run_allow_require: Option<bool>,
    run_badge: Option<String>,
    demo_flag: Option<String>,
    demo_badge: Option<String>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
