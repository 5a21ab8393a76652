use super::domain::{ColumnLayout, ColumnMapping, RawBatch, RawRecord};
use super::BalanceError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

/// Activity code to signed conversion factor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactorTable {
    factors: HashMap<String, f64>,
}

impl FactorTable {
    /// Builds a table, rejecting an activity listed twice.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, BalanceError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut factors = HashMap::new();
        for (activity, factor) in entries {
            let activity = activity.into();
            if factors.contains_key(&activity) {
                return Err(BalanceError::DuplicateFactor { activity });
            }
            factors.insert(activity, factor);
        }
        Ok(Self { factors })
    }

    pub fn get(&self, activity_id: &str) -> Option<f64> {
        self.factors.get(activity_id).copied()
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}

/// Opens an input file, mapping an absent file to `MissingInput`.
pub fn open_input(path: &Path) -> Result<File, BalanceError> {
    File::open(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => BalanceError::MissingInput {
            path: path.to_path_buf(),
        },
        _ => BalanceError::Io(err),
    })
}

pub fn read_records(path: &Path, mapping: &ColumnMapping) -> Result<RawBatch, BalanceError> {
    parse_records(open_input(path)?, mapping)
}

pub fn read_factor_table(path: &Path) -> Result<FactorTable, BalanceError> {
    parse_factor_table(open_input(path)?)
}

/// Parses a record file. Rows shorter than the header are padded with blank
/// cells; longer rows are rejected.
pub fn parse_records<R: Read>(reader: R, mapping: &ColumnMapping) -> Result<RawBatch, BalanceError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(clean_header)
        .collect();
    let layout = ColumnLayout::resolve(&headers, mapping)?;

    let mut records = Vec::new();
    for (index, row) in csv_reader.records().enumerate() {
        let row = row?;
        let line = index as u64 + 1;
        if row.len() > layout.columns.len() {
            return Err(BalanceError::RaggedRow {
                row: line,
                expected: layout.columns.len(),
                found: row.len(),
            });
        }

        let mut fields: Vec<String> = row.iter().map(str::to_string).collect();
        fields.resize(layout.columns.len(), String::new());
        let volume = Some(fields[layout.volume].clone()).filter(|value| !value.is_empty());

        records.push(RawRecord {
            row: line,
            facility_id: fields[layout.facility].clone(),
            activity_id: fields[layout.activity].clone(),
            product_id: fields[layout.product].clone(),
            volume,
            fields,
        });
    }

    Ok(RawBatch { layout, records })
}

#[derive(Debug, Deserialize)]
struct FactorRow {
    #[serde(rename = "ActivityID")]
    activity_id: String,
    #[serde(rename = "Factor")]
    factor: String,
}

pub fn parse_factor_table<R: Read>(reader: R) -> Result<FactorTable, BalanceError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut entries = Vec::new();

    for (index, row) in csv_reader.deserialize::<FactorRow>().enumerate() {
        let row = row?;
        let factor = row
            .factor
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| BalanceError::DataFormat {
                row: index as u64 + 1,
                column: "Factor".to_string(),
                value: row.factor.clone(),
            })?;
        entries.push((row.activity_id, factor));
    }

    FactorTable::from_entries(entries)
}

// Exports sometimes start with a byte-order mark glued to the first header.
fn clean_header(value: &str) -> String {
    value.replace(['\u{feff}', '\u{200b}'], "").trim().to_string()
}
