//! Analysis catalog — the standing churn analyses expressed as plans.

use std::sync::atomic::{AtomicUsize, Ordering};

use churn_core::{ChurnError, ChurnResult, Field, UserRecord};
use churn_segmentation::{ComparisonOperator, Condition};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate::Aggregator;
use crate::plan::{AggregationPlan, GroupBy, MetricSpec, SortSpec};
use crate::table::ResultTable;

pub const ENGAGEMENT_BY_TIER: &str = "engagement_by_tier";
pub const CHURN_RATE_BY_TIER: &str = "churn_rate_by_tier";
pub const CHURNED_VS_RETAINED: &str = "churned_vs_retained";
pub const AD_EXPOSURE_CHURN: &str = "ad_exposure_churn";
pub const OFFLINE_LISTENING_CHURN: &str = "offline_listening_churn";
pub const CHURN_BY_AGE_COUNTRY: &str = "churn_by_age_country";
pub const HIGH_ENGAGEMENT_SEGMENTS: &str = "high_engagement_segments";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDefinition {
    pub name: String,
    pub description: String,
    pub plan: AggregationPlan,
}

impl AnalysisDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        plan: AggregationPlan,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            plan,
        }
    }
}

pub struct AnalysisCatalog {
    definitions: DashMap<String, (usize, AnalysisDefinition)>,
    next_position: AtomicUsize,
}

impl AnalysisCatalog {
    pub fn new() -> Self {
        Self {
            definitions: DashMap::new(),
            next_position: AtomicUsize::new(0),
        }
    }

    /// Catalog seeded with the seven standing analyses.
    pub fn standard() -> Self {
        let catalog = Self::new();
        for def in standard_definitions() {
            catalog.register(def);
        }
        catalog
    }

    /// Adds or replaces a definition. A replaced definition keeps its
    /// position in [`list`](Self::list).
    pub fn register(&self, def: AnalysisDefinition) {
        let position = match self.definitions.get(&def.name) {
            Some(existing) => existing.0,
            None => self.next_position.fetch_add(1, Ordering::Relaxed),
        };
        self.definitions.insert(def.name.clone(), (position, def));
    }

    pub fn get(&self, name: &str) -> Option<AnalysisDefinition> {
        self.definitions.get(name).map(|d| d.1.clone())
    }

    /// Definitions in registration order.
    pub fn list(&self) -> Vec<AnalysisDefinition> {
        let mut entries: Vec<(usize, AnalysisDefinition)> =
            self.definitions.iter().map(|d| d.value().clone()).collect();
        entries.sort_by_key(|(position, _)| *position);
        entries.into_iter().map(|(_, def)| def).collect()
    }

    pub fn run(
        &self,
        name: &str,
        aggregator: &Aggregator,
        records: &[UserRecord],
    ) -> ChurnResult<ResultTable> {
        let def = self
            .get(name)
            .ok_or_else(|| ChurnError::InvalidField(format!("unknown analysis '{name}'")))?;
        aggregator.aggregate(&def.name, &def.plan, records)
    }

    /// Runs the named analyses in the given order. Every plan is prepared
    /// before any record is read, so a bad definition fails the whole run.
    pub fn run_many(
        &self,
        names: &[String],
        aggregator: &Aggregator,
        records: &[UserRecord],
    ) -> ChurnResult<Vec<ResultTable>> {
        let mut prepared = Vec::with_capacity(names.len());
        for name in names {
            let def = self
                .get(name)
                .ok_or_else(|| ChurnError::InvalidField(format!("unknown analysis '{name}'")))?;
            prepared.push((def.name.clone(), aggregator.prepare(&def.plan)?));
        }

        let tables: Vec<ResultTable> = prepared
            .iter()
            .map(|(name, plan)| aggregator.run_prepared(name, plan, records))
            .collect();
        info!(analyses = tables.len(), records = records.len(), "Catalog run complete");
        Ok(tables)
    }

    pub fn run_all(
        &self,
        aggregator: &Aggregator,
        records: &[UserRecord],
    ) -> ChurnResult<Vec<ResultTable>> {
        let names: Vec<String> = self.list().into_iter().map(|d| d.name).collect();
        self.run_many(&names, aggregator, records)
    }
}

impl Default for AnalysisCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn is_free_tier() -> Condition {
    Condition::compare(Field::SubscriptionTier, ComparisonOperator::Equals, "Free")
}

pub fn standard_definitions() -> Vec<AnalysisDefinition> {
    vec![
        AnalysisDefinition::new(
            ENGAGEMENT_BY_TIER,
            "Listening volume and skip behaviour per subscription tier",
            AggregationPlan::new(
                vec![GroupBy::Field(Field::SubscriptionTier)],
                vec![
                    MetricSpec::count("users"),
                    MetricSpec::mean("avg_listening_time", Field::ListeningTime, 1),
                    MetricSpec::mean("avg_songs_per_day", Field::SongsPerDay, 1),
                    MetricSpec::mean("avg_skip_rate", Field::SkipRate, 2),
                ],
            ),
        ),
        AnalysisDefinition::new(
            CHURN_RATE_BY_TIER,
            "Churned users and churn rate per subscription tier",
            AggregationPlan::new(
                vec![GroupBy::Field(Field::SubscriptionTier)],
                vec![
                    MetricSpec::count("total_users"),
                    MetricSpec::count_where("churned_users", Condition::is_true(Field::Churned)),
                    MetricSpec::churn_rate("churn_rate_pct", 2),
                ],
            ),
        ),
        AnalysisDefinition::new(
            CHURNED_VS_RETAINED,
            "Behaviour of churned users compared with retained users",
            AggregationPlan::new(
                vec![GroupBy::Field(Field::Churned)],
                vec![
                    MetricSpec::count("users"),
                    MetricSpec::mean("avg_listening_time", Field::ListeningTime, 1),
                    MetricSpec::mean("avg_songs_per_day", Field::SongsPerDay, 1),
                    MetricSpec::mean("avg_skip_rate", Field::SkipRate, 2),
                    MetricSpec::mean("avg_ads_per_week", Field::AdsPerWeek, 1),
                ],
            ),
        ),
        AnalysisDefinition::new(
            AD_EXPOSURE_CHURN,
            "Churn of Free-tier users by weekly ad exposure",
            AggregationPlan::new(
                vec![GroupBy::Bucket(churn_segmentation::rules::AD_EXPOSURE.to_string())],
                vec![
                    MetricSpec::count("users"),
                    MetricSpec::churn_rate("churn_rate_pct", 2),
                    MetricSpec::mean("avg_listening_time", Field::ListeningTime, 1),
                ],
            )
            .with_filter(is_free_tier())
            .sorted_by(SortSpec::metric_desc("churn_rate_pct")),
        ),
        AnalysisDefinition::new(
            OFFLINE_LISTENING_CHURN,
            "Churn of users with and without offline listening",
            AggregationPlan::new(
                vec![GroupBy::Field(Field::OfflineListening)],
                vec![
                    MetricSpec::count("users"),
                    MetricSpec::churn_rate("churn_rate_pct", 2),
                    MetricSpec::mean("avg_listening_time", Field::ListeningTime, 1),
                ],
            ),
        ),
        AnalysisDefinition::new(
            CHURN_BY_AGE_COUNTRY,
            "Churn rate per country and age group",
            AggregationPlan::new(
                vec![
                    GroupBy::Field(Field::Country),
                    GroupBy::Bucket(churn_segmentation::rules::AGE_GROUP.to_string()),
                ],
                vec![MetricSpec::churn_rate("churn_rate_pct", 2)],
            )
            .sorted_by(SortSpec::metric_desc("churn_rate_pct")),
        ),
        AnalysisDefinition::new(
            HIGH_ENGAGEMENT_SEGMENTS,
            "Retained heavy listeners with low skip rates, by tier and device",
            AggregationPlan::new(
                vec![
                    GroupBy::Field(Field::SubscriptionTier),
                    GroupBy::Field(Field::Device),
                ],
                vec![
                    MetricSpec::count("users"),
                    MetricSpec::mean("avg_listening_time", Field::ListeningTime, 1),
                    MetricSpec::mean("avg_skip_rate", Field::SkipRate, 2),
                ],
            )
            .with_filter(Condition::All(vec![
                Condition::compare(
                    Field::ListeningTime,
                    ComparisonOperator::GreaterThanOrEqual,
                    120,
                ),
                Condition::compare(Field::SkipRate, ComparisonOperator::LessThan, 20),
                Condition::is_false(Field::Churned),
            ]))
            .sorted_by(SortSpec::metric_desc("users")),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use churn_segmentation::Bucketizer;
    use std::sync::Arc;

    fn aggregator() -> Aggregator {
        Aggregator::new(Arc::new(Bucketizer::with_standard_rules()))
    }

    #[test]
    fn test_standard_catalog_order() {
        let names: Vec<String> = AnalysisCatalog::standard()
            .list()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(
            names,
            vec![
                ENGAGEMENT_BY_TIER,
                CHURN_RATE_BY_TIER,
                CHURNED_VS_RETAINED,
                AD_EXPOSURE_CHURN,
                OFFLINE_LISTENING_CHURN,
                CHURN_BY_AGE_COUNTRY,
                HIGH_ENGAGEMENT_SEGMENTS,
            ]
        );
    }

    #[test]
    fn test_standard_plans_prepare() {
        let agg = aggregator();
        for def in standard_definitions() {
            assert!(agg.prepare(&def.plan).is_ok(), "{} failed to prepare", def.name);
        }
    }

    #[test]
    fn test_replacing_keeps_position() {
        let catalog = AnalysisCatalog::standard();
        let mut def = catalog.get(ENGAGEMENT_BY_TIER).unwrap();
        def.description = "updated".into();
        catalog.register(def);
        let listed = catalog.list();
        assert_eq!(listed[0].name, ENGAGEMENT_BY_TIER);
        assert_eq!(listed[0].description, "updated");
        assert_eq!(listed.len(), 7);
    }

    #[test]
    fn test_unknown_analysis() {
        let err = AnalysisCatalog::standard()
            .run("retention_curve", &aggregator(), &[])
            .unwrap_err();
        assert!(matches!(err, ChurnError::InvalidField(_)));
    }

    #[test]
    fn test_bad_definition_fails_whole_run() {
        let catalog = AnalysisCatalog::standard();
        catalog.register(AnalysisDefinition::new(
            "by_tenure",
            "broken",
            AggregationPlan::new(vec![GroupBy::Bucket("tenure".into())], vec![]),
        ));
        assert!(catalog.run_all(&aggregator(), &[]).is_err());
    }

    #[test]
    fn test_definitions_serialize() {
        let defs = standard_definitions();
        let json = serde_json::to_string(&defs).unwrap();
        let back: Vec<AnalysisDefinition> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, defs);
    }
}
