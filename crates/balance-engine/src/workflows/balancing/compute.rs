use super::domain::{
    BalancePolicy, Classification, ColumnLayout, FacilityBalance, Record, RecordSet,
};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// A record with its weighted balance and its facility's total attached.
#[derive(Debug, Clone, PartialEq)]
pub struct BalancedRecord {
    pub record: Record,
    pub balance: f64,
    pub sum_balance: f64,
}

impl BalancedRecord {
    /// Drops the computed columns so a later pass cannot reuse them.
    pub fn into_record(self) -> Record {
        self.record
    }
}

/// Result of one balancing pass, ordered by facility total ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceOutcome {
    pub layout: ColumnLayout,
    pub records: Vec<BalancedRecord>,
    pub facilities: Vec<FacilityBalance>,
    pub policy: BalancePolicy,
}

impl BalanceOutcome {
    pub fn classification_of(&self, record: &BalancedRecord) -> Classification {
        self.policy.classify(record.sum_balance)
    }

    pub fn facility(&self, facility_id: &str) -> Option<&FacilityBalance> {
        self.facilities
            .iter()
            .find(|facility| facility.facility_id == facility_id)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_record_set(self) -> RecordSet {
        RecordSet {
            layout: self.layout,
            records: self
                .records
                .into_iter()
                .map(BalancedRecord::into_record)
                .collect(),
        }
    }
}

/// Weights every record, sums per facility and orders the result so the
/// largest deficits come first and the largest surpluses last.
///
/// Sums are accumulated unrounded; rounding belongs to the report views.
pub fn compute_balances(set: RecordSet, policy: BalancePolicy) -> BalanceOutcome {
    let RecordSet { layout, records } = set;

    let mut totals: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for record in &records {
        let entry = totals.entry(record.facility_id.clone()).or_insert((0.0, 0));
        entry.0 += record.weighted_volume();
        entry.1 += 1;
    }

    let mut facilities: Vec<FacilityBalance> = totals
        .into_iter()
        .map(|(facility_id, (sum_balance, record_count))| FacilityBalance {
            facility_id,
            sum_balance,
            record_count,
            policy,
        })
        .collect();
    facilities.sort_by(|left, right| {
        left.sum_balance
            .total_cmp(&right.sum_balance)
            .then_with(|| left.facility_id.cmp(&right.facility_id))
    });

    let rank: HashMap<&str, (usize, f64)> = facilities
        .iter()
        .enumerate()
        .map(|(index, facility)| (facility.facility_id.as_str(), (index, facility.sum_balance)))
        .collect();

    let mut ranked: Vec<(usize, BalancedRecord)> = records
        .into_iter()
        .map(|record| {
            let (position, sum_balance) = rank
                .get(record.facility_id.as_str())
                .copied()
                .unwrap_or((usize::MAX, 0.0));
            let balance = record.weighted_volume();
            (
                position,
                BalancedRecord {
                    record,
                    balance,
                    sum_balance,
                },
            )
        })
        .collect();
    // stable: input order survives within a facility
    ranked.sort_by_key(|(position, _)| *position);

    let unbalanced = facilities
        .iter()
        .filter(|facility| !facility.is_balanced())
        .count();
    info!(
        facilities = facilities.len(),
        unbalanced,
        tolerance = policy.tolerance,
        "facility balances computed"
    );

    BalanceOutcome {
        layout,
        records: ranked.into_iter().map(|(_, record)| record).collect(),
        facilities,
        policy,
    }
}

/// Holds the policy for repeated passes over the same configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceComputer {
    pub policy: BalancePolicy,
}

impl BalanceComputer {
    pub fn new(policy: BalancePolicy) -> Self {
        Self { policy }
    }

    pub fn compute(&self, set: RecordSet) -> BalanceOutcome {
        compute_balances(set, self.policy)
    }
}
