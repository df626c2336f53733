//! Bucketizer — registry of named bucket rules applied to records.

use churn_core::{ChurnError, ChurnResult, UserRecord};
use tracing::debug;

use crate::rules::BucketRule;

pub struct Bucketizer {
    rules: dashmap::DashMap<String, BucketRule>,
}

impl Bucketizer {
    pub fn new() -> Self {
        Self {
            rules: dashmap::DashMap::new(),
        }
    }

    /// Registry preloaded with `age_group` and `ad_exposure`.
    pub fn with_standard_rules() -> Self {
        let bucketizer = Self::new();
        bucketizer.rules.insert(
            crate::rules::AGE_GROUP.to_string(),
            BucketRule::age_group(),
        );
        bucketizer.rules.insert(
            crate::rules::AD_EXPOSURE.to_string(),
            BucketRule::ad_exposure(),
        );
        bucketizer
    }

    /// Registers `rule` under its name, replacing any rule of the same name.
    pub fn register_rule(&self, rule: BucketRule) -> ChurnResult<()> {
        rule.validate()?;
        if let Some(previous) = self.rules.insert(rule.name.clone(), rule) {
            debug!(rule = %previous.name, "Replaced bucket rule");
        }
        Ok(())
    }

    pub fn get_rule(&self, name: &str) -> Option<BucketRule> {
        self.rules.get(name).map(|r| r.clone())
    }

    /// Like [`get_rule`](Self::get_rule) but unknown names are an error.
    pub fn resolve(&self, name: &str) -> ChurnResult<BucketRule> {
        self.get_rule(name)
            .ok_or_else(|| ChurnError::InvalidField(format!("unknown bucket rule '{name}'")))
    }

    pub fn classify(&self, record: &UserRecord, rule_name: &str) -> ChurnResult<String> {
        let rule = self
            .rules
            .get(rule_name)
            .ok_or_else(|| ChurnError::InvalidField(format!("unknown bucket rule '{rule_name}'")))?;
        Ok(rule.classify(record).to_string())
    }

    pub fn list_rules(&self) -> Vec<BucketRule> {
        let mut rules: Vec<BucketRule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }
}

impl Default for Bucketizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BucketRuleBuilder;
    use churn_core::{Field, SubscriptionTier};

    fn record(age: u32, ads: u32) -> UserRecord {
        UserRecord {
            id: 1,
            subscription_tier: SubscriptionTier::Free,
            listening_minutes_per_day: 30.0,
            songs_per_day: 12,
            skip_rate: 25.0,
            ads_per_week: ads,
            offline_listening: false,
            churned: false,
            age,
            country: "BR".into(),
            device: "Mobile".into(),
        }
    }

    #[test]
    fn test_standard_rules_registered() {
        let bucketizer = Bucketizer::with_standard_rules();
        let names: Vec<String> = bucketizer.list_rules().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["ad_exposure", "age_group"]);
        assert_eq!(bucketizer.classify(&record(17, 20), "age_group").unwrap(), "<18");
        assert_eq!(bucketizer.classify(&record(17, 20), "ad_exposure").unwrap(), "High Ads");
    }

    #[test]
    fn test_classify_does_not_mutate_record() {
        let bucketizer = Bucketizer::with_standard_rules();
        let r = record(33, 2);
        let before = r.clone();
        bucketizer.classify(&r, "age_group").unwrap();
        assert_eq!(r, before);
    }

    #[test]
    fn test_unknown_rule() {
        let bucketizer = Bucketizer::new();
        assert!(matches!(
            bucketizer.classify(&record(20, 0), "tenure"),
            Err(ChurnError::InvalidField(_))
        ));
        assert!(bucketizer.resolve("tenure").is_err());
    }

    #[test]
    fn test_register_replaces() {
        let bucketizer = Bucketizer::with_standard_rules();
        let coarse = BucketRuleBuilder::new("age_group", Field::Age)
            .below(30.0, "young")
            .otherwise("older")
            .build()
            .unwrap();
        bucketizer.register_rule(coarse).unwrap();
        assert_eq!(bucketizer.classify(&record(40, 0), "age_group").unwrap(), "older");
        assert_eq!(bucketizer.list_rules().len(), 2);
    }
}
