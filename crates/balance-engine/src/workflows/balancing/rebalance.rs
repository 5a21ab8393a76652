use super::compute::BalanceOutcome;
use super::domain::RecordSet;
use super::exclusion::{apply_exclusions, ExclusionRule, RulePolicy, RuleSet};
use tracing::info;

/// Prepares a balanced result for a second pass.
///
/// The balance and facility totals are stripped, then every rule in
/// `extra_rules` removes the rows it matches, whatever its tag. Rows that the
/// first pass only nulled can be dropped this way. Masks from the first pass
/// are kept.
pub fn rebalance(outcome: BalanceOutcome, extra_rules: &RuleSet) -> RecordSet {
    let RecordSet { layout, records } = outcome.into_record_set();
    let before = records.len();

    let as_drops = RuleSet::new(
        extra_rules
            .rules()
            .iter()
            .map(|rule| ExclusionRule {
                policy: RulePolicy::Drop,
                ..rule.clone()
            })
            .collect(),
    );
    let records = apply_exclusions(records, &as_drops);

    info!(
        removed = before - records.len(),
        remaining = records.len(),
        "records prepared for rebalance"
    );

    RecordSet { layout, records }
}
