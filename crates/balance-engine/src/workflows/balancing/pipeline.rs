use super::compute::{BalanceComputer, BalanceOutcome};
use super::domain::{BalancePolicy, ColumnMapping, RawBatch, RecordSet, ReportScope};
use super::exclusion::{ExclusionFilter, RuleSet};
use super::normalizer::{normalize, MissingFactor};
use super::parser::{read_records, FactorTable};
use super::rebalance::rebalance;
use super::selection::FacilityAllowList;
use super::BalanceError;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// States a batch passes through in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Raw,
    Normalized,
    Filtered,
    Balanced,
    Rebalanced,
    Final,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub policy: BalancePolicy,
    pub columns: ColumnMapping,
    pub rules: RuleSet,
    /// Extra rules for a second pass; `None` skips the rebalance.
    pub rebalance_rules: Option<RuleSet>,
    pub drop_zero_volume: bool,
    pub scope: ReportScope,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            policy: BalancePolicy::default(),
            columns: ColumnMapping::default(),
            rules: RuleSet::initial_defaults(),
            rebalance_rules: None,
            drop_zero_volume: false,
            scope: ReportScope::All,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub outcome: BalanceOutcome,
    pub missing_factors: Vec<MissingFactor>,
    pub trail: Vec<PipelineStage>,
}

impl PipelineRun {
    pub fn final_stage(&self) -> Option<PipelineStage> {
        self.trail.last().copied()
    }
}

/// One balancing configuration, reusable across periods.
#[derive(Debug, Clone, Default)]
pub struct BalancePipeline {
    options: PipelineOptions,
}

impl BalancePipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Reads a record file and runs it. A missing file is an error here.
    pub fn run_path(
        &self,
        path: &Path,
        factors: &FactorTable,
        allow_list: Option<&FacilityAllowList>,
    ) -> Result<PipelineRun, BalanceError> {
        let batch = read_records(path, &self.options.columns)?;
        info!(path = %path.display(), records = batch.records.len(), "record file loaded");
        self.run(batch, factors, allow_list)
    }

    pub fn run(
        &self,
        batch: RawBatch,
        factors: &FactorTable,
        allow_list: Option<&FacilityAllowList>,
    ) -> Result<PipelineRun, BalanceError> {
        let mut trail = vec![PipelineStage::Raw];

        let normalized = normalize(batch, factors)?;
        let missing_factors = normalized.missing_factors;
        let RecordSet {
            layout,
            mut records,
        } = normalized.records;
        trail.push(PipelineStage::Normalized);

        if let Some(allow_list) = allow_list {
            records.retain(|record| allow_list.contains(&record.facility_id));
            debug!(kept = records.len(), "restricted to facility allow-list");
        }
        if self.options.drop_zero_volume {
            records.retain(|record| record.volume != 0.0);
        }

        let filtered = ExclusionFilter::new(&self.options.rules).apply(records);
        info!(
            kept = filtered.records.len(),
            dropped = filtered.dropped,
            nulled = filtered.nulled,
            "exclusion rules applied"
        );
        trail.push(PipelineStage::Filtered);

        let computer = BalanceComputer::new(self.options.policy);
        let mut outcome = computer.compute(RecordSet {
            layout,
            records: filtered.records,
        });
        trail.push(PipelineStage::Balanced);

        if let Some(extra_rules) = &self.options.rebalance_rules {
            let prepared = rebalance(outcome, extra_rules);
            trail.push(PipelineStage::Rebalanced);
            outcome = computer.compute(prepared);
        }
        trail.push(PipelineStage::Final);

        Ok(PipelineRun {
            outcome,
            missing_factors,
            trail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::balancing::domain::Classification;
    use crate::workflows::balancing::parser::parse_records;
    use std::io::Cursor;

    const PLANT_CSV: &str = "ProductionMonth,ReportingFacilityID,ActivityID,ProductID,Volume,Energy\n\
2022-12,ABGP0001,REC,GAS,\"1,000\",0\n\
2022-12,ABGP0001,DISP,GAS,900,0\n\
2022-12,ABGP0001,FLARE,ENTGAS,100,0\n\
2022-12,ABGP0001,PROD,SAND,***,0\n\
2022-12,ABBT0002,REC,OIL,50,0\n\
2022-12,ABBT0002,DISP,OIL,50.03,0\n\
2022-12,ABBT0003,REC,WATER,0,0\n\
2022-12,ABBT0003,UNKNOWN,WATER,12,0\n";

    fn factors() -> FactorTable {
        FactorTable::from_entries([("REC", 1.0), ("DISP", -1.0), ("FLARE", -1.0), ("PROD", 1.0)])
            .expect("factors")
    }

    fn batch() -> RawBatch {
        parse_records(Cursor::new(PLANT_CSV), &ColumnMapping::default()).expect("parse")
    }

    #[test]
    fn default_pipeline_nulls_flare_and_drops_sand() {
        let run = BalancePipeline::default()
            .run(batch(), &factors(), None)
            .expect("pipeline runs");

        assert_eq!(run.outcome.records.len(), 7);
        let plant = run.outcome.facility("ABGP0001").expect("plant present");
        assert_eq!(plant.sum_balance, 100.0);
        assert_eq!(plant.classification(), Classification::Unbalanced);

        let battery = run.outcome.facility("ABBT0002").expect("battery present");
        assert!((battery.sum_balance + 0.03).abs() < 1e-9);
        assert!(battery.is_balanced());

        assert_eq!(run.missing_factors.len(), 1);
        assert_eq!(
            run.trail,
            vec![
                PipelineStage::Raw,
                PipelineStage::Normalized,
                PipelineStage::Filtered,
                PipelineStage::Balanced,
                PipelineStage::Final,
            ]
        );
    }

    #[test]
    fn rebalance_pass_removes_nulled_rows_and_recomputes() {
        let pipeline = BalancePipeline::new(PipelineOptions {
            rebalance_rules: Some(RuleSet::rebalance_defaults()),
            ..PipelineOptions::default()
        });
        let run = pipeline.run(batch(), &factors(), None).expect("pipeline runs");

        assert_eq!(run.outcome.records.len(), 6);
        assert_eq!(run.final_stage(), Some(PipelineStage::Final));
        assert!(run.trail.contains(&PipelineStage::Rebalanced));
        assert_eq!(
            run.outcome.facility("ABGP0001").map(|facility| facility.sum_balance),
            Some(100.0)
        );
    }

    #[test]
    fn allow_list_restricts_before_balancing() {
        let allow = FacilityAllowList::new(["abbt0002"]).expect("allow list");
        let run = BalancePipeline::default()
            .run(batch(), &factors(), Some(&allow))
            .expect("pipeline runs");
        assert_eq!(run.outcome.facilities.len(), 1);
        assert_eq!(run.outcome.records.len(), 2);
    }

    #[test]
    fn allow_list_without_matches_yields_empty_outcome() {
        let allow = FacilityAllowList::new(["ABZZ9999"]).expect("allow list");
        let run = BalancePipeline::default()
            .run(batch(), &factors(), Some(&allow))
            .expect("pipeline runs");
        assert!(run.outcome.is_empty());
    }

    #[test]
    fn zero_volume_rows_can_be_dropped() {
        let pipeline = BalancePipeline::new(PipelineOptions {
            drop_zero_volume: true,
            ..PipelineOptions::default()
        });
        let run = pipeline.run(batch(), &factors(), None).expect("pipeline runs");
        let water = run.outcome.facility("ABBT0003").expect("facility present");
        assert_eq!(water.record_count, 1);
    }

    #[test]
    fn missing_record_file_is_fatal_for_single_run() {
        let error = BalancePipeline::default()
            .run_path(Path::new("./Vol_1999-01-AB.CSV"), &factors(), None)
            .expect_err("missing file");
        assert!(error.is_missing_input());
    }
}
