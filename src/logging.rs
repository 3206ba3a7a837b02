// SPDX-License-Identifier: Apache-2.0
use std::env;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Registry, fmt::MakeWriter, layer::SubscriberExt};

pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Output format of the process-wide subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Bunyan JSON lines, one object per event.
    #[default]
    Json,
    /// Human readable console output for development.
    Pretty,
}

impl LogFormat {
    /// Read `LOG_FORMAT`; anything but `pretty` selects JSON.
    pub fn from_env() -> Self {
        match env::var(LOG_FORMAT_ENV) {
            Ok(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

fn env_filter(name: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("{}=info,actix_web=info", name)))
}

/// Install the global subscriber for `format`, writing to stdout.
pub fn init(name: &str, format: LogFormat) -> Result<(), SetGlobalDefaultError> {
    match format {
        LogFormat::Json => init_tracing(name, std::io::stdout),
        LogFormat::Pretty => init_console_tracing(name),
    }
}

/// Bunyan-formatted JSON subscriber.
pub fn init_tracing<Sink>(name: &str, sink: Sink) -> Result<(), SetGlobalDefaultError>
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    // Skip setting LogTracer if it's already been set
    let _ = LogTracer::init();

    let subscriber = Registry::default()
        .with(env_filter(name))
        .with(JsonStorageLayer)
        .with(BunyanFormattingLayer::new(name.into(), sink));

    set_global_default(subscriber)?;
    tracing::info!("Tracing initialized with Bunyan formatter");
    Ok(())
}

/// Readable console subscriber for local runs.
pub fn init_console_tracing(name: &str) -> Result<(), SetGlobalDefaultError> {
    let _ = LogTracer::init();

    let subscriber = tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(env_filter(name))
        .finish();

    set_global_default(subscriber)?;
    tracing::info!("Console tracing initialized");
    Ok(())
}
