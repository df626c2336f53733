//! Grouped aggregation over user records.
//!
//! A plan is resolved against the bucketizer once, then records are folded
//! into per-group partial aggregates. Partials hold only counts and exact
//! fixed-point sums, so shards can be merged in any order and the derived
//! means and rates match a single-pass run bit for bit.

use std::collections::HashMap;
use std::sync::Arc;

use churn_core::config::AnalysisConfig;
use churn_core::{ChurnError, ChurnResult, Field, FieldValue, UserRecord};
use churn_segmentation::{BucketRule, Bucketizer, Condition};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::plan::{AggregationPlan, GroupBy, MetricKind, SortKey, SortOrder, MAX_PRECISION};
use crate::table::{GroupValue, MetricColumn, MetricValue, ResultRow, ResultTable};

/// Sums are kept in millionths.
const FIXED_SCALE: f64 = 1_000_000.0;

fn to_fixed(value: f64) -> i128 {
    (value * FIXED_SCALE).round() as i128
}

pub(crate) fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

// ─── Partial aggregates ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupAccumulator {
    pub count: u64,
    pub sums: Vec<i128>,
    pub hits: Vec<u64>,
}

impl GroupAccumulator {
    fn merge(&mut self, other: GroupAccumulator) {
        self.count += other.count;
        if self.sums.len() < other.sums.len() {
            self.sums.resize(other.sums.len(), 0);
        }
        for (acc, s) in self.sums.iter_mut().zip(other.sums) {
            *acc += s;
        }
        if self.hits.len() < other.hits.len() {
            self.hits.resize(other.hits.len(), 0);
        }
        for (acc, h) in self.hits.iter_mut().zip(other.hits) {
            *acc += h;
        }
    }
}

/// Per-group counts and sums for one shard of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialAggregate {
    groups: HashMap<Vec<GroupValue>, GroupAccumulator>,
    records_seen: u64,
    records_matched: u64,
}

impl PartialAggregate {
    /// Combines two shards. Associative and commutative.
    pub fn merge(mut self, other: PartialAggregate) -> PartialAggregate {
        self.records_seen += other.records_seen;
        self.records_matched += other.records_matched;
        for (key, acc) in other.groups {
            self.groups.entry(key).or_default().merge(acc);
        }
        self
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn records_seen(&self) -> u64 {
        self.records_seen
    }

    pub fn records_matched(&self) -> u64 {
        self.records_matched
    }

    pub fn group(&self, key: &[GroupValue]) -> Option<&GroupAccumulator> {
        self.groups.get(key)
    }
}

// ─── Prepared plans ─────────────────────────────────────────────────────────

enum ResolvedGroup {
    Field(Field),
    Bucket(BucketRule),
}

impl ResolvedGroup {
    fn value(&self, record: &UserRecord) -> GroupValue {
        match self {
            ResolvedGroup::Field(field) => match record.field(*field) {
                FieldValue::Flag(b) => GroupValue::Flag(b),
                FieldValue::Integer(i) => GroupValue::Integer(i),
                FieldValue::Unsigned(u) => GroupValue::Unsigned(u),
                FieldValue::Text(s) => GroupValue::Label(s),
                FieldValue::Number(n) => GroupValue::Label(n.to_string()),
            },
            ResolvedGroup::Bucket(rule) => GroupValue::Label(rule.classify(record).to_string()),
        }
    }
}

enum Slot {
    Count,
    Hits(usize),
    Sum(usize),
    Rate(usize),
}

/// A plan with bucket rules resolved and every reference checked.
pub struct PreparedPlan {
    filter: Option<Condition>,
    groups: Vec<ResolvedGroup>,
    key_columns: Vec<String>,
    metric_columns: Vec<MetricColumn>,
    slots: Vec<Slot>,
    hit_conditions: Vec<Condition>,
    mean_fields: Vec<Field>,
    sort_metric: Option<usize>,
    order: SortOrder,
    limit: Option<usize>,
}

impl PreparedPlan {
    pub fn columns(&self) -> Vec<&str> {
        self.key_columns
            .iter()
            .map(String::as_str)
            .chain(self.metric_columns.iter().map(|c| c.name.as_str()))
            .collect()
    }

    /// Folds `records` into a fresh partial aggregate.
    pub fn accumulate(&self, records: &[UserRecord]) -> PartialAggregate {
        let mut partial = PartialAggregate {
            records_seen: records.len() as u64,
            ..Default::default()
        };
        for record in records {
            if let Some(filter) = &self.filter {
                if !filter.matches(record) {
                    continue;
                }
            }
            partial.records_matched += 1;

            let key: Vec<GroupValue> = self.groups.iter().map(|g| g.value(record)).collect();
            let acc = partial.groups.entry(key).or_insert_with(|| GroupAccumulator {
                count: 0,
                sums: vec![0; self.mean_fields.len()],
                hits: vec![0; self.hit_conditions.len()],
            });
            acc.count += 1;
            for (sum, field) in acc.sums.iter_mut().zip(&self.mean_fields) {
                *sum += to_fixed(record.numeric(*field).unwrap_or(0.0));
            }
            for (hit, condition) in acc.hits.iter_mut().zip(&self.hit_conditions) {
                if condition.matches(record) {
                    *hit += 1;
                }
            }
        }
        partial
    }

    /// Derives metric values per group and orders the rows.
    pub fn finalize(&self, analysis: &str, partial: PartialAggregate) -> ResultTable {
        let mut rows: Vec<ResultRow> = partial
            .groups
            .into_iter()
            .map(|(key, acc)| {
                let values = self
                    .slots
                    .iter()
                    .zip(&self.metric_columns)
                    .map(|(slot, column)| metric_value(slot, &acc, column.precision))
                    .collect();
                ResultRow { key, values }
            })
            .collect();

        let order = &self.order;
        match self.sort_metric {
            Some(idx) => rows.sort_by(|a, b| {
                let ordering = match (a.values[idx].as_f64(), b.values[idx].as_f64()) {
                    (Some(x), Some(y)) => match order {
                        SortOrder::Ascending => x.total_cmp(&y),
                        SortOrder::Descending => y.total_cmp(&x),
                    },
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                };
                ordering.then_with(|| a.key.cmp(&b.key))
            }),
            None => rows.sort_by(|a, b| match order {
                SortOrder::Ascending => a.key.cmp(&b.key),
                SortOrder::Descending => b.key.cmp(&a.key),
            }),
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }

        ResultTable {
            analysis: analysis.to_string(),
            key_columns: self.key_columns.clone(),
            metric_columns: self.metric_columns.clone(),
            rows,
        }
    }
}

fn metric_value(slot: &Slot, acc: &GroupAccumulator, precision: u32) -> MetricValue {
    match slot {
        Slot::Count => MetricValue::Count(acc.count),
        Slot::Hits(i) => MetricValue::Count(acc.hits[*i]),
        Slot::Sum(_) | Slot::Rate(_) if acc.count == 0 => MetricValue::Missing,
        Slot::Sum(i) => {
            let mean = acc.sums[*i] as f64 / (acc.count as f64 * FIXED_SCALE);
            MetricValue::Decimal(round_to(mean, precision))
        }
        Slot::Rate(i) => MetricValue::Decimal(rate_pct(acc.hits[*i], acc.count, precision)),
    }
}

/// `hits / total * 100` rounded to `precision`. Rounding never reports 0 for
/// a group with hits or 100 for a group with misses.
pub(crate) fn rate_pct(hits: u64, total: u64, precision: u32) -> f64 {
    let rounded = round_to(hits as f64 * 100.0 / total as f64, precision);
    let step = 10f64.powi(-(precision as i32));
    if hits < total && rounded >= 100.0 {
        round_to(100.0 - step, precision)
    } else if hits > 0 && rounded <= 0.0 {
        round_to(step, precision)
    } else {
        rounded
    }
}

// ─── Aggregator ─────────────────────────────────────────────────────────────

pub struct Aggregator {
    bucketizer: Arc<Bucketizer>,
    parallel_threshold: usize,
    shard_size: usize,
}

impl Aggregator {
    pub fn new(bucketizer: Arc<Bucketizer>) -> Self {
        Self::with_config(bucketizer, &AnalysisConfig::default())
    }

    pub fn with_config(bucketizer: Arc<Bucketizer>, config: &AnalysisConfig) -> Self {
        Self {
            bucketizer,
            parallel_threshold: config.parallel_threshold,
            shard_size: config.shard_size.max(1),
        }
    }

    pub fn bucketizer(&self) -> &Bucketizer {
        &self.bucketizer
    }

    /// Resolves bucket rules and checks every field and column reference.
    pub fn prepare(&self, plan: &AggregationPlan) -> ChurnResult<PreparedPlan> {
        if let Some(filter) = &plan.filter {
            filter.validate()?;
        }

        let mut groups = Vec::with_capacity(plan.group_by.len());
        let mut key_columns = Vec::with_capacity(plan.group_by.len());
        for g in &plan.group_by {
            match g {
                GroupBy::Field(field) => {
                    if !field.is_groupable() {
                        return Err(ChurnError::InvalidField(format!(
                            "'{field}' is continuous; group by a bucket rule instead"
                        )));
                    }
                    key_columns.push(field.column_name().to_string());
                    groups.push(ResolvedGroup::Field(*field));
                }
                GroupBy::Bucket(name) => {
                    let rule = self.bucketizer.resolve(name)?;
                    key_columns.push(rule.name.clone());
                    groups.push(ResolvedGroup::Bucket(rule));
                }
            }
        }

        let mut slots = Vec::with_capacity(plan.metrics.len());
        let mut metric_columns = Vec::with_capacity(plan.metrics.len());
        let mut hit_conditions = Vec::new();
        let mut mean_fields = Vec::new();
        for metric in &plan.metrics {
            if key_columns.contains(&metric.name)
                || metric_columns.iter().any(|c: &MetricColumn| c.name == metric.name)
            {
                return Err(ChurnError::InvalidField(format!(
                    "duplicate column '{}'",
                    metric.name
                )));
            }
            let slot = match &metric.kind {
                MetricKind::Count => Slot::Count,
                MetricKind::CountWhere { condition } => {
                    condition.validate()?;
                    hit_conditions.push(condition.clone());
                    Slot::Hits(hit_conditions.len() - 1)
                }
                MetricKind::Rate { condition } => {
                    condition.validate()?;
                    hit_conditions.push(condition.clone());
                    Slot::Rate(hit_conditions.len() - 1)
                }
                MetricKind::Mean { field } => {
                    if !field.is_numeric() {
                        return Err(ChurnError::InvalidField(format!(
                            "cannot average non-numeric field '{field}'"
                        )));
                    }
                    mean_fields.push(*field);
                    Slot::Sum(mean_fields.len() - 1)
                }
            };
            let precision = metric.resolved_precision();
            if precision > MAX_PRECISION {
                return Err(ChurnError::Configuration(format!(
                    "metric '{}' asks for {precision} decimal places; at most {MAX_PRECISION} are supported",
                    metric.name
                )));
            }
            slots.push(slot);
            metric_columns.push(MetricColumn {
                name: metric.name.clone(),
                precision,
            });
        }

        let sort_metric = match &plan.sort.by {
            SortKey::GroupKey => None,
            SortKey::Metric(name) => Some(
                metric_columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| {
                        ChurnError::InvalidField(format!("sort metric '{name}' is not computed"))
                    })?,
            ),
        };

        Ok(PreparedPlan {
            filter: plan.filter.clone(),
            groups,
            key_columns,
            metric_columns,
            slots,
            hit_conditions,
            mean_fields,
            sort_metric,
            order: plan.sort.order.clone(),
            limit: plan.limit,
        })
    }

    /// Folds records into partial aggregates, sharding across the rayon
    /// pool once the input reaches the parallel threshold.
    pub fn partial(&self, prepared: &PreparedPlan, records: &[UserRecord]) -> PartialAggregate {
        if records.len() >= self.parallel_threshold && records.len() > self.shard_size {
            debug!(
                records = records.len(),
                shard_size = self.shard_size,
                "Aggregating in parallel shards"
            );
            records
                .par_chunks(self.shard_size)
                .map(|shard| prepared.accumulate(shard))
                .reduce(PartialAggregate::default, PartialAggregate::merge)
        } else {
            prepared.accumulate(records)
        }
    }

    pub fn aggregate(
        &self,
        analysis: &str,
        plan: &AggregationPlan,
        records: &[UserRecord],
    ) -> ChurnResult<ResultTable> {
        let prepared = self.prepare(plan)?;
        Ok(self.run_prepared(analysis, &prepared, records))
    }

    pub(crate) fn run_prepared(
        &self,
        analysis: &str,
        prepared: &PreparedPlan,
        records: &[UserRecord],
    ) -> ResultTable {
        if records.is_empty() {
            debug!(analysis, "No records; producing empty table");
        }
        let partial = self.partial(prepared, records);
        let matched = partial.records_matched();
        let table = prepared.finalize(analysis, partial);

        metrics::counter!("analytics.records_aggregated").increment(records.len() as u64);
        metrics::counter!("analytics.groups_emitted").increment(table.len() as u64);
        info!(
            analysis,
            records = records.len(),
            matched,
            groups = table.len(),
            "Aggregation complete"
        );
        table
    }
}
