mod compute;
pub mod domain;
mod exclusion;
mod normalizer;
mod output;
mod parser;
pub mod period;
mod pipeline;
mod rebalance;
pub mod report;
mod runner;
pub mod selection;

use std::path::PathBuf;
use thiserror::Error;

pub use compute::{compute_balances, BalanceComputer, BalanceOutcome, BalancedRecord};
pub use domain::{
    BalancePolicy, BoundaryMode, Classification, ColumnLayout, ColumnMapping, FacilityBalance,
    RawBatch, RawRecord, Record, RecordSet, ReportScope,
};
pub use exclusion::{
    apply_exclusions, compute_inclusion_mask, ExclusionFilter, ExclusionRule, FilterOutcome,
    RulePolicy, RuleSet,
};
pub use normalizer::{clean_volume, normalize, MissingFactor, NormalizedBatch};
pub use output::{write_outcome, write_rows, StagedOutputs};
pub use parser::{
    open_input, parse_factor_table, parse_records, read_factor_table, read_records, FactorTable,
};
pub use period::{month_year_iter, Period, PeriodIter, PeriodRange};
pub use pipeline::{BalancePipeline, PipelineOptions, PipelineRun, PipelineStage};
pub use rebalance::rebalance;
pub use runner::{
    CsvDirectorySource, PeriodRangeRunner, PeriodReport, PeriodResult, PeriodSource,
    PeriodStatus, RunReport,
};
pub use selection::{FacilityAllowList, RunSelection, SelectionError, YearBounds};

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("row {row}: {column} value '{value}' is not numeric after cleaning")]
    DataFormat {
        row: u64,
        column: String,
        value: String,
    },
    #[error("row {row}: expected {expected} cells, found {found}")]
    RaggedRow {
        row: u64,
        expected: usize,
        found: usize,
    },
    #[error("required column '{column}' is missing")]
    MissingColumn { column: String },
    #[error("activity '{activity}' appears more than once in the factor table")]
    DuplicateFactor { activity: String },
    #[error("rule row {row}: {reason}")]
    InvalidRule { row: u64, reason: String },
    #[error("columns of {period} differ from earlier periods")]
    LayoutMismatch { period: Period },
    #[error("input file not found: {}", path.display())]
    MissingInput { path: PathBuf },
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("invalid CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to read or write balancing data: {0}")]
    Io(#[from] std::io::Error),
}

impl BalanceError {
    /// True for the one failure a multi-period run recovers from.
    pub fn is_missing_input(&self) -> bool {
        matches!(self, Self::MissingInput { .. })
    }
}
