use super::domain::Record;
use super::parser::open_input;
use super::BalanceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePolicy {
    /// Keep the row but weight it by zero.
    Null,
    /// Remove the row before balancing.
    Drop,
}

impl RulePolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "null" => Some(Self::Null),
            "drop" => Some(Self::Drop),
            _ => None,
        }
    }
}

/// An (activity, product) pair excluded from balancing. `None` on either
/// side matches any value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExclusionRule {
    pub activity: Option<String>,
    pub product: Option<String>,
    pub policy: RulePolicy,
}

impl ExclusionRule {
    pub fn null(activity: &str, product: &str) -> Self {
        Self {
            activity: Some(activity.to_string()),
            product: Some(product.to_string()),
            policy: RulePolicy::Null,
        }
    }

    pub fn drop(activity: &str, product: &str) -> Self {
        Self {
            activity: Some(activity.to_string()),
            product: Some(product.to_string()),
            policy: RulePolicy::Drop,
        }
    }

    pub fn drop_product(product: &str) -> Self {
        Self {
            activity: None,
            product: Some(product.to_string()),
            policy: RulePolicy::Drop,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        let activity_matches = self
            .activity
            .as_deref()
            .map_or(true, |activity| activity == record.activity_id);
        let product_matches = self
            .product
            .as_deref()
            .map_or(true, |product| product == record.product_id);
        activity_matches && product_matches
    }
}

impl fmt::Display for ExclusionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let policy = match self.policy {
            RulePolicy::Null => "null",
            RulePolicy::Drop => "drop",
        };
        write!(
            f,
            "{policy} {}&{}",
            self.activity.as_deref().unwrap_or(WILDCARD),
            self.product.as_deref().unwrap_or(WILDCARD)
        )
    }
}

/// Declarative set of exclusion rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSet {
    rules: Vec<ExclusionRule>,
}

#[derive(Debug, Deserialize)]
struct RuleRow {
    #[serde(rename = "ActivityID", default)]
    activity_id: String,
    #[serde(rename = "ProductID", default)]
    product_id: String,
    #[serde(rename = "Policy")]
    policy: String,
}

impl RuleSet {
    pub fn new(rules: Vec<ExclusionRule>) -> Self {
        Self { rules }
    }

    /// Sand never balances and is removed; flared entrained gas is kept for
    /// audit but carries no weight.
    pub fn initial_defaults() -> Self {
        Self::new(vec![
            ExclusionRule::drop_product("SAND"),
            ExclusionRule::null("FLARE", "ENTGAS"),
        ])
    }

    /// Second pass: flared entrained gas rows are removed outright.
    pub fn rebalance_defaults() -> Self {
        Self::new(vec![ExclusionRule::drop("FLARE", "ENTGAS")])
    }

    pub fn from_path(path: &Path) -> Result<Self, BalanceError> {
        Self::from_reader(open_input(path)?)
    }

    /// Reads `ActivityID,ProductID,Policy` rows; `*` or blank is a wildcard.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, BalanceError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut rules = Vec::new();

        for (index, row) in csv_reader.deserialize::<RuleRow>().enumerate() {
            let row = row?;
            let line = index as u64 + 1;
            let policy = RulePolicy::parse(&row.policy).ok_or_else(|| BalanceError::InvalidRule {
                row: line,
                reason: format!("policy '{}' must be 'null' or 'drop'", row.policy),
            })?;
            let activity = concrete(row.activity_id);
            let product = concrete(row.product_id);
            if activity.is_none() && product.is_none() {
                return Err(BalanceError::InvalidRule {
                    row: line,
                    reason: "activity and product cannot both be wildcards".to_string(),
                });
            }

            rules.push(ExclusionRule {
                activity,
                product,
                policy,
            });
        }

        Ok(Self { rules })
    }

    pub fn with_rule(mut self, rule: ExclusionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn null_rules(&self) -> impl Iterator<Item = &ExclusionRule> {
        self.rules
            .iter()
            .filter(|rule| rule.policy == RulePolicy::Null)
    }

    pub fn drop_rules(&self) -> impl Iterator<Item = &ExclusionRule> {
        self.rules
            .iter()
            .filter(|rule| rule.policy == RulePolicy::Drop)
    }

    /// Product of the null-rule indicators for one record.
    pub fn mask_for(&self, record: &Record) -> u8 {
        self.null_rules()
            .map(|rule| u8::from(!rule.matches(record)))
            .product()
    }

    fn drops(&self, record: &Record) -> bool {
        self.drop_rules().any(|rule| rule.matches(record))
    }
}

fn concrete(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == WILDCARD {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Removes every record matched by a drop rule.
pub fn apply_exclusions(records: Vec<Record>, rules: &RuleSet) -> Vec<Record> {
    records
        .into_iter()
        .filter(|record| !rules.drops(record))
        .collect()
}

/// Multiplies each record's mask by the null-rule indicators. A mask only
/// ever stays put or falls to zero.
pub fn compute_inclusion_mask(mut records: Vec<Record>, rules: &RuleSet) -> Vec<Record> {
    for record in &mut records {
        record.mask *= rules.mask_for(record);
    }
    records
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub records: Vec<Record>,
    pub dropped: usize,
    pub nulled: usize,
}

/// Applies a rule set's drop rules, then its null rules.
pub struct ExclusionFilter<'a> {
    rules: &'a RuleSet,
}

impl<'a> ExclusionFilter<'a> {
    pub fn new(rules: &'a RuleSet) -> Self {
        Self { rules }
    }

    pub fn apply(&self, records: Vec<Record>) -> FilterOutcome {
        let before = records.len();
        let kept = apply_exclusions(records, self.rules);
        let dropped = before - kept.len();

        let already_nulled = kept.iter().filter(|record| record.mask == 0).count();
        let records = compute_inclusion_mask(kept, self.rules);
        let nulled = records.iter().filter(|record| record.mask == 0).count() - already_nulled;

        for rule in self.rules.rules() {
            debug!(%rule, "exclusion rule applied");
        }

        FilterOutcome {
            records,
            dropped,
            nulled,
        }
    }
}
