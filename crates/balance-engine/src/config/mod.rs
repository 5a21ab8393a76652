use crate::workflows::balancing::domain::MAX_PRECISION;
use crate::workflows::balancing::{BalancePolicy, BoundaryMode, YearBounds};
use chrono::{Datelike, Local};
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Distinguishes runtime behavior for different stages of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the balancing tool.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub telemetry: TelemetryConfig,
    pub balancing: BalancingConfig,
    pub inputs: InputConfig,
    pub periods: PeriodConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("BALANCE_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let log_level = env::var("BALANCE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let tolerance = match env::var("BALANCE_TOLERANCE") {
            Ok(value) => match value.trim().parse::<f64>() {
                Ok(parsed) => check_tolerance(parsed)?,
                Err(_) => return Err(ConfigError::InvalidTolerance { value }),
            },
            Err(_) => 0.05,
        };

        let boundary = match env::var("BALANCE_BOUNDARY") {
            Ok(value) => {
                BoundaryMode::parse(&value).ok_or(ConfigError::InvalidBoundary { value })?
            }
            Err(_) => BoundaryMode::default(),
        };

        let precision = parse_number("BALANCE_PRECISION", 2)?;
        if precision > MAX_PRECISION {
            return Err(ConfigError::InvalidPrecision { value: precision });
        }

        let data_dir = PathBuf::from(env::var("BALANCE_DATA_DIR").unwrap_or_else(|_| ".".to_string()));
        let factor_table = env::var("BALANCE_FACTOR_TABLE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("activityCodeFactors.csv"));
        let rules = env::var("BALANCE_RULES")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let min_year = parse_number("BALANCE_MIN_YEAR", 2008)?;
        let reporting_lag = parse_number("BALANCE_REPORTING_LAG", 2)?;

        Ok(Self {
            environment,
            telemetry: TelemetryConfig { log_level },
            balancing: BalancingConfig {
                tolerance,
                boundary,
                precision,
            },
            inputs: InputConfig {
                data_dir,
                factor_table,
                rules,
            },
            periods: PeriodConfig {
                min_year,
                reporting_lag,
            },
        })
    }
}

/// Accepts a finite, non-negative tolerance. Shared by env loading and CLI
/// overrides.
pub fn check_tolerance(tolerance: f64) -> Result<f64, ConfigError> {
    if tolerance.is_finite() && tolerance >= 0.0 {
        Ok(tolerance)
    } else {
        Err(ConfigError::InvalidTolerance {
            value: tolerance.to_string(),
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        Err(_) => Ok(default),
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Classification settings shared by every run.
#[derive(Debug, Clone, Copy)]
pub struct BalancingConfig {
    pub tolerance: f64,
    pub boundary: BoundaryMode,
    pub precision: u32,
}

impl BalancingConfig {
    pub fn policy(&self) -> BalancePolicy {
        BalancePolicy {
            tolerance: self.tolerance,
            boundary: self.boundary,
            precision: self.precision,
        }
    }
}

/// Where period files, the factor table and optional rules live.
#[derive(Debug, Clone)]
pub struct InputConfig {
    pub data_dir: PathBuf,
    pub factor_table: PathBuf,
    pub rules: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct PeriodConfig {
    pub min_year: i32,
    /// Months between a production month and its publication.
    pub reporting_lag: u32,
}

impl PeriodConfig {
    /// Accepted years run from `min_year` through the current year.
    pub fn year_bounds(&self) -> YearBounds {
        YearBounds {
            min: self.min_year,
            max: Local::now().date_naive().year(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidTolerance { value: String },
    InvalidBoundary { value: String },
    InvalidNumber { key: &'static str, value: String },
    InvalidPrecision { value: u32 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidTolerance { value } => write!(
                f,
                "BALANCE_TOLERANCE must be a finite, non-negative number (got '{value}')"
            ),
            ConfigError::InvalidBoundary { value } => write!(
                f,
                "BALANCE_BOUNDARY must be 'inclusive' or 'exclusive' (got '{value}')"
            ),
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a whole number (got '{value}')")
            }
            ConfigError::InvalidPrecision { value } => write!(
                f,
                "BALANCE_PRECISION must be at most {MAX_PRECISION} (got {value})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
