use super::compute::BalanceOutcome;
use super::domain::{ColumnLayout, ReportScope};
use super::period::Period;
use super::report::views::BalanceRowView;
use super::BalanceError;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const COMPUTED_COLUMNS: [&str; 4] = ["Factor", "Balance", "sumBalance", "Unbalanced/Balanced"];

/// Writes the header and rows as CSV. Balances are printed to `precision`
/// decimals.
pub fn write_rows<W: Write>(
    writer: W,
    layout: &ColumnLayout,
    rows: &[BalanceRowView],
    precision: u32,
) -> Result<(), BalanceError> {
    let precision = precision as usize;
    let mut csv_writer = csv::Writer::from_writer(writer);

    let header = layout
        .columns
        .iter()
        .map(String::as_str)
        .chain(COMPUTED_COLUMNS);
    csv_writer.write_record(header)?;

    for row in rows {
        let computed = [
            row.factor.to_string(),
            format!("{:.precision$}", row.balance),
            format!("{:.precision$}", row.sum_balance),
            row.classification.label().to_string(),
        ];
        csv_writer.write_record(row.fields.iter().map(String::as_str).chain(computed.iter().map(String::as_str)))?;
    }

    csv_writer.flush()?;
    Ok(())
}

/// Writes one balanced result to `path`, returning the number of rows.
pub fn write_outcome(
    path: &Path,
    outcome: &BalanceOutcome,
    scope: ReportScope,
) -> Result<usize, BalanceError> {
    let rows = outcome.rows(scope);
    let file = File::create(path)?;
    write_rows(file, &outcome.layout, &rows, outcome.policy.precision)?;
    info!(path = %path.display(), rows = rows.len(), "balanced output written");
    Ok(rows.len())
}

/// Per-period result files kept on disk until the consolidated file exists.
#[derive(Debug)]
pub struct StagedOutputs {
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl StagedOutputs {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
        }
    }

    pub fn path_for(&self, period: Period) -> PathBuf {
        self.dir
            .join(format!("PlantDataBalancedMaster{}.csv", period.stamp()))
    }

    pub fn stage(
        &mut self,
        period: Period,
        outcome: &BalanceOutcome,
        scope: ReportScope,
    ) -> Result<PathBuf, BalanceError> {
        let path = self.path_for(period);
        write_outcome(&path, outcome, scope)?;
        self.files.push(path.clone());
        Ok(path)
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Removes every staged file except `keep`, returning how many were
    /// removed. `keep` is the consolidated output, which may share a staged
    /// file's name.
    pub fn cleanup(self, keep: &Path) -> Result<usize, BalanceError> {
        let keep = fs::canonicalize(keep).unwrap_or_else(|_| keep.to_path_buf());
        let mut removed = 0;
        for file in &self.files {
            let same = fs::canonicalize(file)
                .map(|file| file == keep)
                .unwrap_or(false);
            if same {
                debug!(path = %file.display(), "staged output is the consolidated file, kept");
                continue;
            }
            fs::remove_file(file)?;
            debug!(path = %file.display(), "staged output removed");
            removed += 1;
        }
        Ok(removed)
    }
}
