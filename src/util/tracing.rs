use clap::ValueEnum;
use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub type TracingResult<T> = core::result::Result<T, TracingErr>;

#[derive(Debug, Error)]
pub enum TracingErr {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error(transparent)]
    Init(#[from] TryInitError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[value(alias = "logfmt")]
    Text,
    Json,
}

/// `RUST_LOG` wins over `--log.level` when set.
fn env_filter(level: &str) -> TracingResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(format!("{level},tower_http={level}"))?),
    }
}

pub fn build_subscriber(level: &str, format: LogFormat) -> TracingResult<()> {
    let registry = tracing_subscriber::registry().with(env_filter(level)?);

    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()?,
    }

    Ok(())
}
