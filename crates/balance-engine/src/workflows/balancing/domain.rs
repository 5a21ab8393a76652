use serde::{Deserialize, Serialize};
use std::fmt;

use super::BalanceError;

/// Column names of the four fields the engine reads from a record file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub facility: String,
    pub activity: String,
    pub product: String,
    pub volume: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            facility: "ReportingFacilityID".to_string(),
            activity: "ActivityID".to_string(),
            product: "ProductID".to_string(),
            volume: "Volume".to_string(),
        }
    }
}

/// Header of a record file with the positions of the required columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    pub columns: Vec<String>,
    pub facility: usize,
    pub activity: usize,
    pub product: usize,
    pub volume: usize,
}

impl ColumnLayout {
    pub fn resolve(headers: &[String], mapping: &ColumnMapping) -> Result<Self, BalanceError> {
        let position = |name: &str| {
            headers
                .iter()
                .position(|header| header == name)
                .ok_or_else(|| BalanceError::MissingColumn {
                    column: name.to_string(),
                })
        };

        Ok(Self {
            facility: position(&mapping.facility)?,
            activity: position(&mapping.activity)?,
            product: position(&mapping.product)?,
            volume: position(&mapping.volume)?,
            columns: headers.to_vec(),
        })
    }

    pub fn volume_column(&self) -> &str {
        &self.columns[self.volume]
    }
}

/// One transaction as read from the file, before any cleaning.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// 1-based data row number, used in error messages.
    pub row: u64,
    pub facility_id: String,
    pub activity_id: String,
    pub product_id: String,
    pub volume: Option<String>,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawBatch {
    pub layout: ColumnLayout,
    pub records: Vec<RawRecord>,
}

/// A cleaned transaction with its activity factor and inclusion mask attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub facility_id: String,
    pub activity_id: String,
    pub product_id: String,
    pub volume: f64,
    pub factor: f64,
    /// 0 when a null rule matched, otherwise 1.
    pub mask: u8,
    /// Every input cell in file order. The volume cell still holds the raw text.
    pub fields: Vec<String>,
}

impl Record {
    pub fn weighted_volume(&self) -> f64 {
        self.volume * self.factor * f64::from(self.mask)
    }
}

/// Records flowing between stages, together with the header they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    pub layout: ColumnLayout,
    pub records: Vec<Record>,
}

impl RecordSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Balanced,
    Unbalanced,
}

impl Classification {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Balanced => "Balanced",
            Self::Unbalanced => "Unbalanced",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether a sum sitting exactly on the tolerance counts as balanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryMode {
    #[default]
    Inclusive,
    Exclusive,
}

impl BoundaryMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inclusive" | "closed" => Some(Self::Inclusive),
            "exclusive" | "open" => Some(Self::Exclusive),
            _ => None,
        }
    }
}

/// Most decimal places `f64` can round to meaningfully.
pub const MAX_PRECISION: u32 = 15;

/// Tolerance and reporting precision used to classify facility sums.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalancePolicy {
    pub tolerance: f64,
    pub boundary: BoundaryMode,
    /// Decimal places applied to reported balances.
    pub precision: u32,
}

impl Default for BalancePolicy {
    fn default() -> Self {
        Self {
            tolerance: 0.05,
            boundary: BoundaryMode::Inclusive,
            precision: 2,
        }
    }
}

impl BalancePolicy {
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            tolerance,
            ..Self::default()
        }
    }

    pub fn classify(&self, sum_balance: f64) -> Classification {
        let within = match self.boundary {
            BoundaryMode::Inclusive => sum_balance.abs() <= self.tolerance,
            BoundaryMode::Exclusive => sum_balance.abs() < self.tolerance,
        };

        if within {
            Classification::Balanced
        } else {
            Classification::Unbalanced
        }
    }

    pub fn round(&self, value: f64) -> f64 {
        let scale = 10f64.powi(self.precision.min(MAX_PRECISION) as i32);
        let rounded = (value * scale).round() / scale;
        // avoid printing "-0.00"
        if rounded == 0.0 {
            0.0
        } else {
            rounded
        }
    }
}

/// Net weighted volume of one facility.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityBalance {
    pub facility_id: String,
    pub sum_balance: f64,
    pub record_count: usize,
    pub policy: BalancePolicy,
}

impl FacilityBalance {
    pub fn classification(&self) -> Classification {
        self.policy.classify(self.sum_balance)
    }

    pub fn is_balanced(&self) -> bool {
        self.classification() == Classification::Balanced
    }
}

/// Which rows of a balanced result end up in the written output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportScope {
    #[default]
    All,
    UnbalancedOnly,
}

impl ReportScope {
    pub fn includes(self, classification: Classification) -> bool {
        match self {
            Self::All => true,
            Self::UnbalancedOnly => classification == Classification::Unbalanced,
        }
    }
}
