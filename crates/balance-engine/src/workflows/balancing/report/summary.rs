use super::super::compute::BalanceOutcome;
use super::super::domain::{BalancePolicy, FacilityBalance, ReportScope};
use super::super::normalizer::MissingFactor;
use super::views::{BalanceRowView, BalanceSummaryView, FacilityBalanceView, MissingFactorView};

/// Balanced/unbalanced breakdown, derived from a [`BalanceOutcome`] on demand.
#[derive(Debug, Clone)]
pub struct BalanceSummary<'a> {
    pub policy: BalancePolicy,
    pub balanced: Vec<&'a FacilityBalance>,
    pub unbalanced: Vec<&'a FacilityBalance>,
}

impl BalanceOutcome {
    pub fn summary(&self) -> BalanceSummary<'_> {
        let (balanced, unbalanced): (Vec<&FacilityBalance>, Vec<&FacilityBalance>) = self
            .facilities
            .iter()
            .partition(|facility| facility.is_balanced());

        BalanceSummary {
            policy: self.policy,
            balanced,
            unbalanced,
        }
    }

    /// Output rows in facility order, rounded to the policy precision.
    pub fn rows(&self, scope: ReportScope) -> Vec<BalanceRowView> {
        let policy = self.policy;
        let volume_index = self.layout.volume;

        self.records
            .iter()
            .filter(|row| scope.includes(self.classification_of(row)))
            .map(|row| {
                let mut fields = row.record.fields.clone();
                if let Some(cell) = fields.get_mut(volume_index) {
                    *cell = row.record.volume.to_string();
                }
                BalanceRowView {
                    fields,
                    factor: row.record.factor,
                    balance: policy.round(row.balance),
                    sum_balance: policy.round(row.sum_balance),
                    classification: self.classification_of(row),
                }
            })
            .collect()
    }
}

impl BalanceSummary<'_> {
    pub fn total(&self) -> usize {
        self.balanced.len() + self.unbalanced.len()
    }

    pub fn all_balanced(&self) -> bool {
        self.unbalanced.is_empty()
    }

    pub fn headline(&self) -> Vec<String> {
        let total = self.total();
        let unbalanced = self.unbalanced.len();
        let balanced = self.balanced.len();

        match total {
            0 => vec!["There are no facilities to balance.".to_string()],
            1 => {
                let verdict = if unbalanced == 0 {
                    "and the facility has been properly balanced."
                } else {
                    "and the facility has not been properly balanced."
                };
                vec![
                    "There is 1 facility in total,".to_string(),
                    verdict.to_string(),
                ]
            }
            _ if unbalanced == 0 => vec![
                format!("There are {total} facilities in total,"),
                "and all facilities have been properly balanced.".to_string(),
            ],
            _ => vec![
                format!("There are {total} facilities in total,"),
                format!(
                    "and {} not been properly balanced.",
                    count_phrase(unbalanced, "has", "have")
                ),
                format!(
                    "Whereas {} been properly balanced.",
                    count_phrase(balanced, "has", "have")
                ),
            ],
        }
    }

    pub fn to_view(&self, missing: &[MissingFactor]) -> BalanceSummaryView {
        let view = |facility: &&FacilityBalance| FacilityBalanceView {
            facility_id: facility.facility_id.clone(),
            sum_balance: self.policy.round(facility.sum_balance),
            record_count: facility.record_count,
            classification: facility.classification(),
            classification_label: facility.classification().label(),
        };

        BalanceSummaryView {
            total: self.total(),
            balanced: self.balanced.len(),
            unbalanced: self.unbalanced.len(),
            tolerance: self.policy.tolerance,
            headline: self.headline(),
            unbalanced_facilities: self.unbalanced.iter().map(view).collect(),
            balanced_facilities: self.balanced.iter().map(view).collect(),
            missing_factors: missing
                .iter()
                .map(|missing| MissingFactorView {
                    activity_id: missing.activity_id.clone(),
                    records: missing.records,
                })
                .collect(),
        }
    }
}

fn count_phrase(count: usize, singular_verb: &str, plural_verb: &str) -> String {
    if count == 1 {
        format!("1 facility {singular_verb}")
    } else {
        format!("{count} facilities {plural_verb}")
    }
}
