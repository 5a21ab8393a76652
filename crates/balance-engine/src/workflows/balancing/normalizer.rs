use super::domain::{RawBatch, Record, RecordSet};
use super::parser::FactorTable;
use super::BalanceError;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Marker the registry prints in place of a volume that was not reported.
const NOT_REPORTED: &str = "***";

/// An activity with no entry in the factor table. Its records balance at zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingFactor {
    pub activity_id: String,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    pub records: RecordSet,
    pub missing_factors: Vec<MissingFactor>,
}

/// Cleans one volume cell. `None` means the cell is not numeric after cleaning.
pub fn clean_volume(raw: Option<&str>) -> Option<f64> {
    let Some(raw) = raw else {
        return Some(0.0);
    };

    let cleaned = raw.replace(',', "").replace(NOT_REPORTED, "0");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Some(0.0);
    }

    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Cleans volumes and joins every record to its activity factor.
///
/// Any unparseable volume fails the whole batch. Records whose activity has
/// no factor are kept with a factor of zero and reported in
/// [`NormalizedBatch::missing_factors`].
pub fn normalize(batch: RawBatch, factors: &FactorTable) -> Result<NormalizedBatch, BalanceError> {
    let RawBatch { layout, records } = batch;
    let mut missing: BTreeMap<String, usize> = BTreeMap::new();
    let mut normalized = Vec::with_capacity(records.len());

    for raw in records {
        let volume =
            clean_volume(raw.volume.as_deref()).ok_or_else(|| BalanceError::DataFormat {
                row: raw.row,
                column: layout.volume_column().to_string(),
                value: raw.volume.clone().unwrap_or_default(),
            })?;

        let factor = match factors.get(&raw.activity_id) {
            Some(factor) => factor,
            None => {
                *missing.entry(raw.activity_id.clone()).or_default() += 1;
                0.0
            }
        };

        normalized.push(Record {
            facility_id: raw.facility_id,
            activity_id: raw.activity_id,
            product_id: raw.product_id,
            volume,
            factor,
            mask: 1,
            fields: raw.fields,
        });
    }

    let missing_factors: Vec<MissingFactor> = missing
        .into_iter()
        .map(|(activity_id, records)| {
            warn!(activity = %activity_id, records, "no balancing factor; records contribute zero");
            MissingFactor {
                activity_id,
                records,
            }
        })
        .collect();

    info!(
        records = normalized.len(),
        missing_factors = missing_factors.len(),
        "volumes cleaned and factors joined"
    );

    Ok(NormalizedBatch {
        records: RecordSet {
            layout,
            records: normalized,
        },
        missing_factors,
    })
}
