use balance_engine::config::{check_tolerance, AppConfig};
use balance_engine::error::AppError;
use balance_engine::telemetry;
use balance_engine::workflows::balancing::report::views::BalanceSummaryView;
use balance_engine::workflows::balancing::{
    month_year_iter, read_factor_table, write_outcome, BalanceError, BalanceOutcome,
    BalancePipeline, BoundaryMode, ColumnMapping, CsvDirectorySource, FacilityAllowList,
    MissingFactor, Period, PeriodRangeRunner, PeriodReport, PeriodStatus, PipelineOptions,
    ReportScope, RuleSet, RunReport, RunSelection,
};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "petrinex-balance",
    about = "Check that facility volumes from monthly production reports net out to zero",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Balance a single volumetric CSV file
    Balance(BalanceArgs),
    /// Balance every monthly file in a period range and consolidate the results
    Range(RangeArgs),
    /// List the periods a range covers
    Periods(PeriodsArgs),
}

#[derive(Args, Debug, Default, Clone)]
struct PolicyArgs {
    /// Override the configured tolerance
    #[arg(long, value_parser = parse_tolerance)]
    tolerance: Option<f64>,
    /// Whether a sum equal to the tolerance is balanced (inclusive|exclusive)
    #[arg(long, value_parser = parse_boundary)]
    boundary: Option<BoundaryMode>,
    /// Activity factor table (defaults to the configured path)
    #[arg(long)]
    factors: Option<PathBuf>,
    /// Exclusion rule CSV replacing the built-in defaults
    #[arg(long)]
    rules: Option<PathBuf>,
    /// Run a second pass that drops the nulled FLARE/ENTGAS rows
    #[arg(long)]
    rebalance: bool,
    /// Drop rows whose cleaned volume is zero before balancing
    #[arg(long)]
    drop_zero_volume: bool,
    /// Only write rows of facilities that did not balance
    #[arg(long)]
    unbalanced_only: bool,
    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct BalanceArgs {
    /// Volumetric CSV file to balance
    input: PathBuf,
    /// Where to write the balanced rows
    #[arg(long)]
    output: Option<PathBuf>,
    /// Restrict the run to these facilities (repeatable)
    #[arg(long = "facility")]
    facilities: Vec<String>,
    #[command(flatten)]
    policy: PolicyArgs,
}

#[derive(Args, Debug)]
struct RangeArgs {
    /// First period (YYYY-MM)
    #[arg(long, value_parser = parse_month_year)]
    start: MonthYear,
    /// Last period (YYYY-MM); defaults to the latest published month
    #[arg(long, value_parser = parse_month_year)]
    end: Option<MonthYear>,
    /// Directory holding Vol_YYYY-MM-AB.CSV files
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Consolidated output file
    #[arg(long, default_value = "PlantDataBalancedMaster.csv")]
    output: PathBuf,
    /// Restrict the run to these facilities (repeatable)
    #[arg(long = "facility")]
    facilities: Vec<String>,
    #[command(flatten)]
    policy: PolicyArgs,
}

#[derive(Args, Debug)]
struct PeriodsArgs {
    /// First period (YYYY-MM)
    #[arg(long, value_parser = parse_month_year)]
    start: MonthYear,
    /// Last period (YYYY-MM)
    #[arg(long, value_parser = parse_month_year)]
    end: MonthYear,
}

/// An unvalidated `(month, year)` pair as typed by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MonthYear {
    month: u32,
    year: i32,
}

impl MonthYear {
    fn pair(self) -> (u32, i32) {
        (self.month, self.year)
    }
}

#[derive(Debug, Serialize)]
struct BalanceResponse {
    input: PathBuf,
    records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<PathBuf>,
    summary: BalanceSummaryView,
}

#[derive(Debug, Serialize)]
struct RangeResponse {
    start: Period,
    end: Period,
    output: PathBuf,
    rows_written: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    consolidation_error: Option<String>,
    periods: Vec<PeriodReport>,
    summaries: Vec<PeriodSummary>,
}

#[derive(Debug, Serialize)]
struct PeriodSummary {
    period: Period,
    summary: BalanceSummaryView,
}

fn main() -> ExitCode {
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("application error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Balance(args) => run_balance(args),
        Command::Range(args) => run_range(args),
        Command::Periods(args) => run_periods(args),
    }
}

fn parse_month_year(raw: &str) -> Result<MonthYear, String> {
    let invalid = || format!("failed to parse '{raw}' as YYYY-MM");
    let (year, month) = raw.trim().split_once('-').ok_or_else(invalid)?;
    Ok(MonthYear {
        month: month.parse().map_err(|_| invalid())?,
        year: year.parse().map_err(|_| invalid())?,
    })
}

fn parse_boundary(raw: &str) -> Result<BoundaryMode, String> {
    BoundaryMode::parse(raw).ok_or_else(|| format!("'{raw}' is not inclusive or exclusive"))
}

fn parse_tolerance(raw: &str) -> Result<f64, String> {
    let tolerance = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("'{raw}' is not a number"))?;
    check_tolerance(tolerance).map_err(|err| err.to_string())
}

fn load_config() -> Result<AppConfig, AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    Ok(config)
}

fn pipeline_options(config: &AppConfig, args: &PolicyArgs) -> Result<PipelineOptions, AppError> {
    let mut policy = config.balancing.policy();
    if let Some(tolerance) = args.tolerance {
        policy.tolerance = check_tolerance(tolerance)?;
    }
    if let Some(boundary) = args.boundary {
        policy.boundary = boundary;
    }

    let rules = match args.rules.as_ref().or(config.inputs.rules.as_ref()) {
        Some(path) => RuleSet::from_path(path)?,
        None => RuleSet::initial_defaults(),
    };

    Ok(PipelineOptions {
        policy,
        columns: ColumnMapping::default(),
        rules,
        rebalance_rules: args.rebalance.then(RuleSet::rebalance_defaults),
        drop_zero_volume: args.drop_zero_volume,
        scope: if args.unbalanced_only {
            ReportScope::UnbalancedOnly
        } else {
            ReportScope::All
        },
    })
}

fn factor_path<'a>(config: &'a AppConfig, args: &'a PolicyArgs) -> &'a Path {
    args.factors
        .as_deref()
        .unwrap_or(config.inputs.factor_table.as_path())
}

/// Latest published period: the current month minus the reporting lag.
fn default_end(reporting_lag: u32) -> MonthYear {
    let latest = Period::from_date(Local::now().date_naive()).minus_months(reporting_lag);
    MonthYear {
        month: latest.month(),
        year: latest.year(),
    }
}

fn run_balance(args: BalanceArgs) -> Result<(), AppError> {
    let config = load_config()?;
    let options = pipeline_options(&config, &args.policy)?;
    let scope = options.scope;
    let factors = read_factor_table(factor_path(&config, &args.policy))?;
    let allow_list = if args.facilities.is_empty() {
        None
    } else {
        Some(FacilityAllowList::new(&args.facilities)?)
    };

    info!(?config.environment, input = %args.input.display(), "balancing single file");
    let run = BalancePipeline::new(options).run_path(&args.input, &factors, allow_list.as_ref())?;

    if let Some(output) = &args.output {
        write_outcome(output, &run.outcome, scope)?;
    }

    if args.policy.json {
        let response = BalanceResponse {
            input: args.input.clone(),
            records: run.outcome.records.len(),
            output: args.output.clone(),
            summary: run.outcome.summary().to_view(&run.missing_factors),
        };
        print_json(&response)?;
    } else {
        render_outcome(&run.outcome, &run.missing_factors);
        if let Some(output) = &args.output {
            println!("\nOutput written to {}", output.display());
        }
    }

    Ok(())
}

fn run_range(args: RangeArgs) -> Result<(), AppError> {
    let config = load_config()?;
    let end = args
        .end
        .unwrap_or_else(|| default_end(config.periods.reporting_lag));
    let selection = RunSelection::new(
        args.start.pair(),
        end.pair(),
        &args.facilities,
        config.periods.year_bounds(),
    )?;

    let options = pipeline_options(&config, &args.policy)?;
    let scope = options.scope;
    let factors = read_factor_table(factor_path(&config, &args.policy))?;
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| config.inputs.data_dir.clone());
    let stage_dir = match args.output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    info!(
        ?config.environment,
        start = %selection.range.start(),
        end = %selection.range.end(),
        data_dir = %data_dir.display(),
        "balancing period range"
    );
    let runner = PeriodRangeRunner::new(
        BalancePipeline::new(options),
        factors,
        CsvDirectorySource::new(data_dir, ColumnMapping::default()),
    )
    .with_stage_dir(stage_dir);

    let mut report = runner.run(&selection);
    let consolidated = report.write_consolidated(&args.output, scope);

    if args.policy.json {
        let response = RangeResponse {
            start: selection.range.start(),
            end: selection.range.end(),
            output: args.output.clone(),
            rows_written: consolidated.as_ref().copied().unwrap_or(0),
            consolidation_error: consolidated.as_ref().err().map(ToString::to_string),
            periods: report.periods.clone(),
            summaries: report
                .results
                .iter()
                .map(|result| PeriodSummary {
                    period: result.period,
                    summary: result.outcome.summary().to_view(&result.missing_factors),
                })
                .collect(),
        };
        print_json(&response)?;
    } else {
        let (statuses, closing) = range_lines(&selection, &report, &consolidated, &args.output);
        for line in statuses {
            println!("{line}");
        }
        for result in &report.results {
            println!("\n{}", result.period);
            render_outcome(&result.outcome, &result.missing_factors);
        }
        println!("\n{closing}");
    }

    consolidated?;

    let aborted = report.periods.iter().find_map(|period| match &period.status {
        PeriodStatus::Aborted { reason } => Some((period.period, reason.clone())),
        _ => None,
    });
    match aborted {
        Some((period, reason)) => Err(AppError::RunAborted { period, reason }),
        None => Ok(()),
    }
}

fn run_periods(args: PeriodsArgs) -> Result<(), AppError> {
    let periods = month_year_iter(args.start.month, args.start.year, args.end.month, args.end.year)?;
    for period in periods {
        println!("{} {}", period.month(), period.year());
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{rendered}");
    Ok(())
}

/// Per-period status lines and the closing consolidation line. Statuses are
/// listed even when consolidation failed.
fn range_lines(
    selection: &RunSelection,
    report: &RunReport,
    consolidated: &Result<usize, BalanceError>,
    output: &Path,
) -> (Vec<String>, String) {
    let mut statuses = vec![format!(
        "Periods {} -> {}",
        selection.range.start(),
        selection.range.end()
    )];
    statuses.extend(
        report
            .periods
            .iter()
            .map(|period| format!("- {}", describe_period(period))),
    );

    let closing = match consolidated {
        Ok(0) => "No period produced records; nothing was written.".to_string(),
        Ok(rows) => format!("{rows} rows consolidated into {}", output.display()),
        Err(err) => format!("Consolidation into {} failed: {err}", output.display()),
    };
    (statuses, closing)
}

fn describe_period(report: &PeriodReport) -> String {
    match &report.status {
        PeriodStatus::Succeeded {
            records,
            facilities,
            unbalanced,
        } => format!(
            "{}: {} records, {} facilities, {} unbalanced",
            report.period, records, facilities, unbalanced
        ),
        PeriodStatus::Skipped { reason } => format!("{}: skipped ({})", report.period, reason),
        PeriodStatus::Empty => format!("{}: no matching records", report.period),
        PeriodStatus::Aborted { reason } => format!("{}: aborted ({})", report.period, reason),
    }
}

fn render_outcome(outcome: &BalanceOutcome, missing: &[MissingFactor]) {
    let summary = outcome.summary();
    let precision = outcome.policy.precision as usize;

    for line in summary.headline() {
        println!("{line}");
    }

    if !summary.unbalanced.is_empty() {
        println!("\nUnbalanced facilities (tolerance {})", outcome.policy.tolerance);
        for facility in &summary.unbalanced {
            println!(
                "- {}: {:.precision$} across {} records",
                facility.facility_id,
                outcome.policy.round(facility.sum_balance),
                facility.record_count
            );
        }
    }

    if !missing.is_empty() {
        println!("\nActivities without a factor (balanced at zero)");
        for activity in missing {
            println!("- {}: {} records", activity.activity_id, activity.records);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use balance_engine::config::{
        AppEnvironment, BalancingConfig, InputConfig, PeriodConfig, TelemetryConfig,
    };
    use balance_engine::workflows::balancing::{BalancePolicy, RulePolicy, YearBounds};

    fn config() -> AppConfig {
        AppConfig {
            environment: AppEnvironment::Test,
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
            },
            balancing: BalancingConfig {
                tolerance: 0.05,
                boundary: BoundaryMode::Inclusive,
                precision: 2,
            },
            inputs: InputConfig {
                data_dir: PathBuf::from("."),
                factor_table: PathBuf::from("activityCodeFactors.csv"),
                rules: None,
            },
            periods: PeriodConfig {
                min_year: 2008,
                reporting_lag: 2,
            },
        }
    }

    #[test]
    fn month_year_accepts_padded_and_plain_months() {
        assert_eq!(
            parse_month_year("2022-03"),
            Ok(MonthYear {
                month: 3,
                year: 2022
            })
        );
        assert_eq!(parse_month_year(" 2021-12 ").map(MonthYear::pair), Ok((12, 2021)));
        assert!(parse_month_year("March 2022").is_err());
        assert!(parse_month_year("2022-xx").is_err());
    }

    #[test]
    fn out_of_range_month_is_left_to_selection_validation() {
        let parsed = parse_month_year("2022-13").expect("parses as numbers");
        assert_eq!(parsed.month, 13);
    }

    #[test]
    fn flags_override_configured_policy() {
        let args = PolicyArgs {
            tolerance: Some(1.0),
            boundary: Some(BoundaryMode::Exclusive),
            rebalance: true,
            unbalanced_only: true,
            ..PolicyArgs::default()
        };
        let options = pipeline_options(&config(), &args).expect("options");
        assert_eq!(
            options.policy,
            BalancePolicy {
                tolerance: 1.0,
                boundary: BoundaryMode::Exclusive,
                precision: 2,
            }
        );
        assert_eq!(options.scope, ReportScope::UnbalancedOnly);
        let extra = options.rebalance_rules.expect("rebalance enabled");
        assert!(extra
            .rules()
            .iter()
            .all(|rule| rule.policy == RulePolicy::Drop));
    }

    #[test]
    fn defaults_follow_configuration() {
        let options = pipeline_options(&config(), &PolicyArgs::default()).expect("options");
        assert_eq!(options.policy, BalancePolicy::default());
        assert!(options.rebalance_rules.is_none());
        assert!(!options.drop_zero_volume);
        assert_eq!(
            factor_path(&config(), &PolicyArgs::default()),
            Path::new("activityCodeFactors.csv")
        );
    }

    #[test]
    fn tolerance_flag_rejects_negative_and_non_finite_values() {
        assert_eq!(parse_tolerance("0.5"), Ok(0.5));
        assert!(parse_tolerance("-1").is_err());
        assert!(parse_tolerance("NaN").is_err());
        assert!(parse_tolerance("inf").is_err());
        assert!(parse_tolerance("loose").is_err());

        for tolerance in [-1.0, f64::NAN] {
            let args = PolicyArgs {
                tolerance: Some(tolerance),
                ..PolicyArgs::default()
            };
            let error = pipeline_options(&config(), &args).expect_err("invalid tolerance");
            assert!(matches!(error, AppError::Config(_)));
        }
    }

    #[test]
    fn period_statuses_are_listed_when_consolidation_fails() {
        let selection = RunSelection::new(
            (1, 2022),
            (2, 2022),
            &[],
            YearBounds {
                min: 2008,
                max: 2030,
            },
        )
        .expect("selection");
        let mut report = RunReport::default();
        report.periods.push(PeriodReport {
            period: Period::new(2022, 1).expect("period"),
            status: PeriodStatus::Succeeded {
                records: 4,
                facilities: 2,
                unbalanced: 1,
            },
        });
        report.periods.push(PeriodReport {
            period: Period::new(2022, 2).expect("period"),
            status: PeriodStatus::Empty,
        });
        let failed = Err(BalanceError::LayoutMismatch {
            period: Period::new(2022, 2).expect("period"),
        });

        let (statuses, closing) =
            range_lines(&selection, &report, &failed, Path::new("out/master.csv"));
        assert_eq!(
            statuses,
            vec![
                "Periods 2022-01 -> 2022-02".to_string(),
                "- 2022-01: 4 records, 2 facilities, 1 unbalanced".to_string(),
                "- 2022-02: no matching records".to_string(),
            ]
        );
        assert!(closing.starts_with("Consolidation into out/master.csv failed: "));

        let (_, closing) = range_lines(&selection, &report, &Ok(7), Path::new("master.csv"));
        assert_eq!(closing, "7 rows consolidated into master.csv");
        let (_, closing) = range_lines(&selection, &report, &Ok(0), Path::new("master.csv"));
        assert_eq!(closing, "No period produced records; nothing was written.");
    }

    #[test]
    fn default_end_trails_today_by_reporting_lag() {
        let today = Period::from_date(Local::now().date_naive());
        let end = default_end(2);
        let end = Period::new(end.year, end.month).expect("valid period");
        assert!(end < today);
        assert_eq!(end.next().next(), today);
    }

    #[test]
    fn period_statuses_render_as_single_lines() {
        let period = Period::new(2022, 2).expect("period");
        let skipped = PeriodReport {
            period,
            status: PeriodStatus::Skipped {
                reason: "input file not found: Vol_2022-02-AB.CSV".to_string(),
            },
        };
        assert_eq!(
            describe_period(&skipped),
            "2022-02: skipped (input file not found: Vol_2022-02-AB.CSV)"
        );
        let empty = PeriodReport {
            period,
            status: PeriodStatus::Empty,
        };
        assert_eq!(describe_period(&empty), "2022-02: no matching records");
    }
}
