use super::super::domain::Classification;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct FacilityBalanceView {
    pub facility_id: String,
    pub sum_balance: f64,
    pub record_count: usize,
    pub classification: Classification,
    pub classification_label: &'static str,
}

/// One output row: the input cells followed by the computed columns,
/// rounded for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BalanceRowView {
    pub fields: Vec<String>,
    pub factor: f64,
    pub balance: f64,
    pub sum_balance: f64,
    pub classification: Classification,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingFactorView {
    pub activity_id: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceSummaryView {
    pub total: usize,
    pub balanced: usize,
    pub unbalanced: usize,
    pub tolerance: f64,
    pub headline: Vec<String>,
    pub unbalanced_facilities: Vec<FacilityBalanceView>,
    pub balanced_facilities: Vec<FacilityBalanceView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_factors: Vec<MissingFactorView>,
}
