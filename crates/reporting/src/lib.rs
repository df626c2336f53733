//! Churn reporting — grouped aggregation, result tables, and the catalog of
//! standing churn analyses.

pub mod aggregate;
pub mod catalog;
pub mod plan;
pub mod table;

pub use aggregate::{Aggregator, PartialAggregate, PreparedPlan};
pub use catalog::{AnalysisCatalog, AnalysisDefinition};
pub use plan::{AggregationPlan, GroupBy, MetricKind, MetricSpec, SortKey, SortOrder, SortSpec};
pub use table::{GroupValue, MetricColumn, MetricValue, ResultRow, ResultTable};
