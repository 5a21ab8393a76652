use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::balancing::{BalanceError, Period, SelectionError};
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Selection(SelectionError),
    Balance(BalanceError),
    /// A period range stopped early; earlier periods were still written.
    RunAborted { period: Period, reason: String },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Selection(err) => write!(f, "invalid selection: {}", err),
            AppError::Balance(err) => write!(f, "balancing error: {}", err),
            AppError::RunAborted { period, reason } => {
                write!(f, "run aborted at {}: {}", period, reason)
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Selection(err) => Some(err),
            AppError::Balance(err) => Some(err),
            AppError::RunAborted { .. } => None,
        }
    }
}

impl AppError {
    /// Process exit code: 2 for bad input from the caller, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) | AppError::Selection(_) => 2,
            AppError::Balance(BalanceError::Selection(_)) => 2,
            AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Balance(_)
            | AppError::RunAborted { .. } => 1,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SelectionError> for AppError {
    fn from(value: SelectionError) -> Self {
        Self::Selection(value)
    }
}

impl From<BalanceError> for AppError {
    fn from(value: BalanceError) -> Self {
        Self::Balance(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn selection_errors_map_to_usage_exit_code() {
        let error = AppError::from(SelectionError::BlankFacility);
        assert_eq!(error.exit_code(), 2);
        assert!(error.to_string().starts_with("invalid selection"));

        let nested = AppError::from(BalanceError::Selection(SelectionError::BlankFacility));
        assert_eq!(nested.exit_code(), 2);
    }

    #[test]
    fn balance_errors_keep_their_source() {
        let error = AppError::from(BalanceError::MissingColumn {
            column: "Volume".to_string(),
        });
        assert_eq!(error.exit_code(), 1);
        let source = error.source().expect("source present");
        assert_eq!(source.to_string(), "required column 'Volume' is missing");
    }
}
