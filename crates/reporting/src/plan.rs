//! Declarative aggregation plans — what to filter, how to group, which
//! metrics to compute, and how to order the result.

use churn_core::Field;
use churn_segmentation::Condition;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// Raw record field; must be groupable.
    Field(Field),
    /// Label produced by the named bucket rule.
    Bucket(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricKind {
    Count,
    CountWhere { condition: Condition },
    Mean { field: Field },
    /// Percentage of group records matching `condition`.
    Rate { condition: Condition },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: MetricKind,
    /// Decimal places kept after rounding. Ignored by count metrics; when
    /// unset, rates keep 2 places, means 1 (2 for skip rate).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

/// Largest precision a plan may request.
pub const MAX_PRECISION: u32 = 9;

impl MetricSpec {
    pub fn count(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Count,
            precision: None,
        }
    }

    pub fn count_where(name: impl Into<String>, condition: Condition) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::CountWhere { condition },
            precision: None,
        }
    }

    pub fn mean(name: impl Into<String>, field: Field, precision: u32) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Mean { field },
            precision: Some(precision),
        }
    }

    pub fn rate(name: impl Into<String>, condition: Condition, precision: u32) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Rate { condition },
            precision: Some(precision),
        }
    }

    pub fn churn_rate(name: impl Into<String>, precision: u32) -> Self {
        Self::rate(name, Condition::is_true(Field::Churned), precision)
    }

    pub fn is_count(&self) -> bool {
        matches!(self.kind, MetricKind::Count | MetricKind::CountWhere { .. })
    }

    /// Decimal places the metric is rounded to.
    pub fn resolved_precision(&self) -> u32 {
        match (&self.kind, self.precision) {
            (MetricKind::Count | MetricKind::CountWhere { .. }, _) => 0,
            (_, Some(precision)) => precision,
            (MetricKind::Rate { .. }, None) => 2,
            (MetricKind::Mean { field: Field::SkipRate }, None) => 2,
            (MetricKind::Mean { .. }, None) => 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Metric(String),
    GroupKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub by: SortKey,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortSpec {
    pub fn metric_desc(name: impl Into<String>) -> Self {
        Self {
            by: SortKey::Metric(name.into()),
            order: SortOrder::Descending,
        }
    }

    pub fn group_key() -> Self {
        Self {
            by: SortKey::GroupKey,
            order: SortOrder::Ascending,
        }
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::group_key()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationPlan {
    /// Applied before partitioning so group denominators only count
    /// matching records.
    #[serde(default)]
    pub filter: Option<Condition>,
    pub group_by: Vec<GroupBy>,
    pub metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub sort: SortSpec,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl AggregationPlan {
    pub fn new(group_by: Vec<GroupBy>, metrics: Vec<MetricSpec>) -> Self {
        Self {
            filter: None,
            group_by,
            metrics,
            sort: SortSpec::default(),
            limit: None,
        }
    }

    pub fn with_filter(mut self, filter: Condition) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sorted_by(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
