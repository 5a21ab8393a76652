use crate::config::TelemetryConfig;
use std::env;
use std::fmt;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

/// Variable whose directives replace `BALANCE_LOG_LEVEL` when set.
const FILTER_ENV: &str = "RUST_LOG";

#[derive(Debug)]
pub enum TelemetryError {
    /// A filter directive that could not be parsed, with where it came from.
    Filter {
        origin: &'static str,
        directives: String,
        source: ParseError,
    },
    Subscriber(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::Filter {
                origin, directives, ..
            } => write!(f, "{origin} holds an unusable log filter '{directives}'"),
            TelemetryError::Subscriber(err) => {
                write!(f, "balancing logs could not be installed: {err}")
            }
        }
    }
}

impl std::error::Error for TelemetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TelemetryError::Filter { source, .. } => Some(source),
            TelemetryError::Subscriber(err) => Some(&**err),
        }
    }
}

/// Builds the filter for a run. A non-blank `RUST_LOG` wins; otherwise the
/// configured level applies. A malformed `RUST_LOG` is an error rather than
/// being silently ignored.
pub fn filter_for(
    config: &TelemetryConfig,
    overrides: Option<&str>,
) -> Result<EnvFilter, TelemetryError> {
    match overrides.map(str::trim).filter(|value| !value.is_empty()) {
        Some(directives) => parse_filter(FILTER_ENV, directives),
        None => parse_filter("BALANCE_LOG_LEVEL", config.log_level.trim()),
    }
}

fn parse_filter(origin: &'static str, directives: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directives).map_err(|source| TelemetryError::Filter {
        origin,
        directives: directives.to_string(),
        source,
    })
}

/// Installs the global subscriber: compact lines on stderr, so stdout stays
/// free for summaries and JSON.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let overrides = env::var(FILTER_ENV).ok();
    let filter = filter_for(config, overrides.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(TelemetryError::Subscriber)
}
