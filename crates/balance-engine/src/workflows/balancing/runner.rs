use super::compute::BalanceOutcome;
use super::domain::{ColumnLayout, ColumnMapping, RawBatch, ReportScope};
use super::normalizer::MissingFactor;
use super::output::{write_rows, StagedOutputs};
use super::parser::{read_records, FactorTable};
use super::period::Period;
use super::pipeline::BalancePipeline;
use super::report::views::BalanceRowView;
use super::selection::RunSelection;
use super::BalanceError;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Supplies the raw records of one reporting period.
pub trait PeriodSource {
    fn load(&self, period: Period) -> Result<RawBatch, BalanceError>;
}

/// Reads `Vol_{YYYY}-{MM}-AB.CSV` files from a single directory.
#[derive(Debug, Clone)]
pub struct CsvDirectorySource {
    dir: PathBuf,
    columns: ColumnMapping,
}

impl CsvDirectorySource {
    pub fn new<P: Into<PathBuf>>(dir: P, columns: ColumnMapping) -> Self {
        Self {
            dir: dir.into(),
            columns,
        }
    }

    pub fn path_for(&self, period: Period) -> PathBuf {
        self.dir.join(format!("Vol_{}-AB.CSV", period.stamp()))
    }
}

impl PeriodSource for CsvDirectorySource {
    fn load(&self, period: Period) -> Result<RawBatch, BalanceError> {
        read_records(&self.path_for(period), &self.columns)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeriodStatus {
    Succeeded {
        records: usize,
        facilities: usize,
        unbalanced: usize,
    },
    /// Input file absent; the run moved on.
    Skipped { reason: String },
    /// Nothing left after filtering and the allow-list.
    Empty,
    /// Fatal error; no later period was attempted.
    Aborted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodReport {
    pub period: Period,
    #[serde(flatten)]
    pub status: PeriodStatus,
}

#[derive(Debug, Clone)]
pub struct PeriodResult {
    pub period: Period,
    pub outcome: BalanceOutcome,
    pub missing_factors: Vec<MissingFactor>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub periods: Vec<PeriodReport>,
    pub results: Vec<PeriodResult>,
    staged: Option<StagedOutputs>,
}

impl RunReport {
    pub fn aborted(&self) -> bool {
        self.periods
            .iter()
            .any(|report| matches!(report.status, PeriodStatus::Aborted { .. }))
    }

    pub fn status_of(&self, period: Period) -> Option<&PeriodStatus> {
        self.periods
            .iter()
            .find(|report| report.period == period)
            .map(|report| &report.status)
    }

    pub fn staged_files(&self) -> &[PathBuf] {
        self.staged
            .as_ref()
            .map(|staged| staged.files())
            .unwrap_or(&[])
    }

    pub fn record_count(&self) -> usize {
        self.results
            .iter()
            .map(|result| result.outcome.records.len())
            .sum()
    }

    /// Rows of every computed period, concatenated in period order. `None`
    /// when no period produced records.
    pub fn consolidated_rows(
        &self,
        scope: ReportScope,
    ) -> Result<Option<(ColumnLayout, Vec<BalanceRowView>)>, BalanceError> {
        let Some(first) = self.results.first() else {
            return Ok(None);
        };

        let mut rows = Vec::with_capacity(self.record_count());
        for result in &self.results {
            if result.outcome.layout.columns != first.outcome.layout.columns {
                return Err(BalanceError::LayoutMismatch {
                    period: result.period,
                });
            }
            rows.extend(result.outcome.rows(scope));
        }

        Ok(Some((first.outcome.layout.clone(), rows)))
    }

    /// Writes the consolidated file and then removes staged period files.
    /// Returns the number of rows written; nothing is written when no period
    /// produced records.
    pub fn write_consolidated(
        &mut self,
        path: &Path,
        scope: ReportScope,
    ) -> Result<usize, BalanceError> {
        let Some((layout, rows)) = self.consolidated_rows(scope)? else {
            warn!(path = %path.display(), "no period produced records, nothing consolidated");
            return Ok(0);
        };
        let precision = self
            .results
            .first()
            .map(|result| result.outcome.policy.precision)
            .unwrap_or_default();

        write_rows(File::create(path)?, &layout, &rows, precision)?;
        info!(path = %path.display(), rows = rows.len(), "consolidated output written");

        if let Some(staged) = self.staged.take() {
            let removed = staged.cleanup(path)?;
            info!(removed, "staged period outputs removed");
        }
        Ok(rows.len())
    }
}

/// Runs one pipeline over every period of a selection.
#[derive(Debug)]
pub struct PeriodRangeRunner<S> {
    pipeline: BalancePipeline,
    factors: FactorTable,
    source: S,
    stage_dir: Option<PathBuf>,
}

impl<S: PeriodSource> PeriodRangeRunner<S> {
    pub fn new(pipeline: BalancePipeline, factors: FactorTable, source: S) -> Self {
        Self {
            pipeline,
            factors,
            source,
            stage_dir: None,
        }
    }

    /// Writes each period's result to `dir` as it completes.
    pub fn with_stage_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.stage_dir = Some(dir.into());
        self
    }

    pub fn run(&self, selection: &RunSelection) -> RunReport {
        let mut report = RunReport {
            staged: self.stage_dir.clone().map(StagedOutputs::new),
            ..RunReport::default()
        };
        let scope = self.pipeline.options().scope;

        for period in selection.range {
            let status = match self.run_period(period, selection) {
                Ok(Some(result)) => {
                    let summary = result.outcome.summary();
                    let status = PeriodStatus::Succeeded {
                        records: result.outcome.records.len(),
                        facilities: summary.total(),
                        unbalanced: summary.unbalanced.len(),
                    };
                    let staged = match report.staged.as_mut() {
                        Some(staged) => staged.stage(period, &result.outcome, scope).map(|_| ()),
                        None => Ok(()),
                    };
                    match staged {
                        Ok(()) => {
                            report.results.push(result);
                            status
                        }
                        Err(err) => PeriodStatus::Aborted {
                            reason: err.to_string(),
                        },
                    }
                }
                Ok(None) => {
                    info!(%period, "no records left for period");
                    PeriodStatus::Empty
                }
                Err(err) if err.is_missing_input() => {
                    warn!(%period, error = %err, "period input missing, skipping");
                    PeriodStatus::Skipped {
                        reason: err.to_string(),
                    }
                }
                Err(err) => PeriodStatus::Aborted {
                    reason: err.to_string(),
                },
            };

            let stop = matches!(status, PeriodStatus::Aborted { .. });
            if let PeriodStatus::Aborted { reason } = &status {
                error!(%period, reason = %reason, "period failed, stopping run");
            }
            report.periods.push(PeriodReport { period, status });
            if stop {
                break;
            }
        }

        info!(
            periods = report.periods.len(),
            computed = report.results.len(),
            records = report.record_count(),
            "period range finished"
        );
        report
    }

    fn run_period(
        &self,
        period: Period,
        selection: &RunSelection,
    ) -> Result<Option<PeriodResult>, BalanceError> {
        let batch = self.source.load(period)?;
        info!(%period, records = batch.records.len(), "period loaded");

        let run = self
            .pipeline
            .run(batch, &self.factors, selection.facilities.as_ref())?;
        if run.outcome.is_empty() {
            return Ok(None);
        }
        Ok(Some(PeriodResult {
            period,
            outcome: run.outcome,
            missing_factors: run.missing_factors,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::balancing::parser::parse_records;
    use crate::workflows::balancing::selection::YearBounds;
    use std::collections::HashMap;
    use std::fs;
    use std::io::Cursor;

    const HEADER: &str = "ProductionMonth,ReportingFacilityID,ActivityID,ProductID,Volume\n";

    const BOUNDS: YearBounds = YearBounds {
        min: 2008,
        max: 2030,
    };

    struct MemorySource {
        files: HashMap<Period, String>,
    }

    impl PeriodSource for MemorySource {
        fn load(&self, period: Period) -> Result<RawBatch, BalanceError> {
            match self.files.get(&period) {
                Some(text) => parse_records(Cursor::new(text.clone()), &ColumnMapping::default()),
                None => Err(BalanceError::MissingInput {
                    path: PathBuf::from(format!("Vol_{}-AB.CSV", period.stamp())),
                }),
            }
        }
    }

    fn period(year: i32, month: u32) -> Period {
        Period::new(year, month).expect("period")
    }

    fn factors() -> FactorTable {
        FactorTable::from_entries([("REC", 1.0), ("DISP", -1.0)]).expect("factors")
    }

    fn runner(files: HashMap<Period, String>) -> PeriodRangeRunner<MemorySource> {
        PeriodRangeRunner::new(BalancePipeline::default(), factors(), MemorySource { files })
    }

    fn selection(facilities: &[String]) -> RunSelection {
        RunSelection::new((1, 2022), (3, 2022), facilities, BOUNDS).expect("selection")
    }

    #[test]
    fn missing_period_is_skipped_and_run_continues() {
        let mut files = HashMap::new();
        files.insert(
            period(2022, 1),
            format!("{HEADER}2022-01,F1,REC,GAS,10\n2022-01,F1,DISP,GAS,10\n"),
        );
        files.insert(period(2022, 3), format!("{HEADER}2022-03,F2,REC,GAS,4\n"));

        let report = runner(files).run(&selection(&[]));

        assert_eq!(report.periods.len(), 3);
        assert!(matches!(
            report.status_of(period(2022, 2)),
            Some(PeriodStatus::Skipped { .. })
        ));
        assert_eq!(
            report.status_of(period(2022, 3)),
            Some(&PeriodStatus::Succeeded {
                records: 1,
                facilities: 1,
                unbalanced: 1,
            })
        );
        assert_eq!(report.results.len(), 2);
        assert!(!report.aborted());
    }

    #[test]
    fn allow_list_without_matches_marks_period_empty() {
        let mut files = HashMap::new();
        files.insert(period(2022, 1), format!("{HEADER}2022-01,F1,REC,GAS,10\n"));
        files.insert(period(2022, 2), format!("{HEADER}2022-02,F2,REC,GAS,10\n"));
        files.insert(period(2022, 3), format!("{HEADER}2022-03,F1,REC,GAS,10\n"));

        let report = runner(files).run(&selection(&["f2".to_string()]));

        assert_eq!(report.status_of(period(2022, 1)), Some(&PeriodStatus::Empty));
        assert_eq!(report.status_of(period(2022, 3)), Some(&PeriodStatus::Empty));
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].period, period(2022, 2));
    }

    #[test]
    fn malformed_period_aborts_but_keeps_earlier_results() {
        let mut files = HashMap::new();
        files.insert(period(2022, 1), format!("{HEADER}2022-01,F1,REC,GAS,10\n"));
        files.insert(period(2022, 2), format!("{HEADER}2022-02,F1,REC,GAS,ten\n"));
        files.insert(period(2022, 3), format!("{HEADER}2022-03,F1,REC,GAS,10\n"));

        let report = runner(files).run(&selection(&[]));

        assert!(report.aborted());
        assert_eq!(report.periods.len(), 2);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.status_of(period(2022, 3)), None);
    }

    #[test]
    fn consolidated_rows_follow_period_order() {
        let mut files = HashMap::new();
        files.insert(period(2022, 1), format!("{HEADER}2022-01,F9,REC,GAS,900\n"));
        files.insert(period(2022, 2), format!("{HEADER}2022-02,F1,REC,GAS,1\n"));

        let report = runner(files).run(&selection(&[]));
        let (layout, rows) = report
            .consolidated_rows(ReportScope::All)
            .expect("layouts agree")
            .expect("rows present");

        assert_eq!(layout.columns.len(), 5);
        let months: Vec<&str> = rows.iter().map(|row| row.fields[0].as_str()).collect();
        assert_eq!(months, vec!["2022-01", "2022-02"]);
    }

    #[test]
    fn differing_layouts_refuse_consolidation() {
        let mut files = HashMap::new();
        files.insert(period(2022, 1), format!("{HEADER}2022-01,F1,REC,GAS,10\n"));
        files.insert(
            period(2022, 2),
            "ReportingFacilityID,ActivityID,ProductID,Volume\nF1,REC,GAS,10\n".to_string(),
        );

        let report = runner(files).run(&selection(&[]));
        let error = report
            .consolidated_rows(ReportScope::All)
            .expect_err("layout mismatch");
        assert!(matches!(
            error,
            BalanceError::LayoutMismatch { period: p } if p == period(2022, 2)
        ));
    }

    #[test]
    fn staged_files_are_removed_after_consolidation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = dir.path().join("data");
        fs::create_dir(&data).expect("data dir");
        fs::write(
            data.join("Vol_2022-01-AB.CSV"),
            format!("{HEADER}2022-01,F1,REC,GAS,\"1,234\"\n"),
        )
        .expect("write period");
        fs::write(
            data.join("Vol_2022-03-AB.CSV"),
            format!("{HEADER}2022-03,F2,REC,GAS,5\n2022-03,F2,DISP,GAS,5\n"),
        )
        .expect("write period");

        let source = CsvDirectorySource::new(&data, ColumnMapping::default());
        assert!(source
            .path_for(period(2022, 1))
            .ends_with("Vol_2022-01-AB.CSV"));

        let runner = PeriodRangeRunner::new(BalancePipeline::default(), factors(), source)
            .with_stage_dir(dir.path());
        let mut report = runner.run(&selection(&[]));

        let staged: Vec<PathBuf> = report.staged_files().to_vec();
        assert_eq!(staged.len(), 2);
        assert!(staged.iter().all(|path| path.exists()));

        let output = dir.path().join("PlantDataBalancedMaster.csv");
        let written = report
            .write_consolidated(&output, ReportScope::All)
            .expect("consolidated");
        assert_eq!(written, 3);
        assert!(staged.iter().all(|path| !path.exists()));

        let text = fs::read_to_string(&output).expect("read output");
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("2022-01,F1,REC,GAS,1234,1,1234.00,1234.00,Unbalanced"));
    }

    #[test]
    fn consolidated_output_survives_when_named_like_a_staged_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("Vol_2022-01-AB.CSV"),
            format!("{HEADER}2022-01,F1,REC,GAS,10\n"),
        )
        .expect("write period");

        let runner = PeriodRangeRunner::new(
            BalancePipeline::default(),
            factors(),
            CsvDirectorySource::new(dir.path(), ColumnMapping::default()),
        )
        .with_stage_dir(dir.path());
        let selection =
            RunSelection::new((1, 2022), (1, 2022), &[], BOUNDS).expect("selection");
        let mut report = runner.run(&selection);

        let output = dir.path().join("PlantDataBalancedMaster2022-01.csv");
        let written = report
            .write_consolidated(&output, ReportScope::All)
            .expect("consolidated");
        assert_eq!(written, 1);
        assert!(output.exists());
        let text = fs::read_to_string(&output).expect("read output");
        assert!(text.contains("2022-01,F1,REC,GAS,10,1,10.00,10.00,Unbalanced"));
    }
}
