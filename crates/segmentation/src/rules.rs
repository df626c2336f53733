//! Bucket rules — ordered `(predicate, label)` arms with a mandatory default.

use churn_core::{ChurnError, ChurnResult, Field, FieldValue, UserRecord};
use serde::{Deserialize, Serialize};

use crate::predicates::{Bound, BucketPredicate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketArm {
    pub predicate: BucketPredicate,
    pub label: String,
}

/// Named derived classification over one field. Arms are tried in
/// declaration order and the first match wins; values no arm accepts get
/// `default_label`, so every record receives exactly one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRule {
    pub name: String,
    pub field: Field,
    pub arms: Vec<BucketArm>,
    pub default_label: String,
}

pub const AGE_GROUP: &str = "age_group";
pub const AD_EXPOSURE: &str = "ad_exposure";

impl BucketRule {
    pub fn new(
        name: impl Into<String>,
        field: Field,
        arms: Vec<BucketArm>,
        default_label: impl Into<String>,
    ) -> ChurnResult<Self> {
        let rule = Self {
            name: name.into(),
            field,
            arms,
            default_label: default_label.into(),
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> ChurnResult<()> {
        if self.name.trim().is_empty() {
            return Err(ChurnError::Configuration("bucket rule needs a name".into()));
        }
        if self.default_label.trim().is_empty() {
            return Err(ChurnError::Configuration(format!(
                "bucket rule '{}' needs a default label",
                self.name
            )));
        }
        for (i, arm) in self.arms.iter().enumerate() {
            if arm.label.trim().is_empty() {
                return Err(ChurnError::Configuration(format!(
                    "bucket rule '{}': arm {i} has an empty label",
                    self.name
                )));
            }
            if matches!(arm.predicate, BucketPredicate::Range { .. }) && !self.field.is_numeric() {
                return Err(ChurnError::Configuration(format!(
                    "bucket rule '{}': range arm on non-numeric field '{}'",
                    self.name, self.field
                )));
            }
            arm.predicate.validate().map_err(|e| {
                ChurnError::Configuration(format!("bucket rule '{}' arm {i}: {e}", self.name))
            })?;
        }
        Ok(())
    }

    pub fn classify(&self, record: &UserRecord) -> &str {
        self.classify_value(&record.field(self.field))
    }

    pub fn classify_value(&self, value: &FieldValue) -> &str {
        self.arms
            .iter()
            .find(|arm| arm.predicate.matches(value))
            .map_or(self.default_label.as_str(), |arm| arm.label.as_str())
    }

    /// Distinct labels in declaration order, default last.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::with_capacity(self.arms.len() + 1);
        for label in self
            .arms
            .iter()
            .map(|a| a.label.as_str())
            .chain(std::iter::once(self.default_label.as_str()))
        {
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        labels
    }

    /// Age → `<18`, `18–24`, `25–34`, `35–44`, `45+`.
    pub fn age_group() -> Self {
        Self {
            name: AGE_GROUP.to_string(),
            field: Field::Age,
            arms: vec![
                range_arm(Bound::Unbounded, Bound::Exclusive(18.0), "<18"),
                range_arm(Bound::Inclusive(18.0), Bound::Inclusive(24.0), "18–24"),
                range_arm(Bound::Inclusive(25.0), Bound::Inclusive(34.0), "25–34"),
                range_arm(Bound::Inclusive(35.0), Bound::Inclusive(44.0), "35–44"),
            ],
            default_label: "45+".to_string(),
        }
    }

    /// Weekly ads → `Low Ads` (≤5), `Medium Ads` (6–15), `High Ads` (>15).
    pub fn ad_exposure() -> Self {
        Self {
            name: AD_EXPOSURE.to_string(),
            field: Field::AdsPerWeek,
            arms: vec![
                range_arm(Bound::Unbounded, Bound::Inclusive(5.0), "Low Ads"),
                range_arm(Bound::Inclusive(6.0), Bound::Inclusive(15.0), "Medium Ads"),
            ],
            default_label: "High Ads".to_string(),
        }
    }
}

fn range_arm(lower: Bound, upper: Bound, label: &str) -> BucketArm {
    BucketArm {
        predicate: BucketPredicate::Range { lower, upper },
        label: label.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_age_groups() {
        let rule = BucketRule::age_group();
        let labels: Vec<&str> = [17, 24, 40]
            .iter()
            .map(|a| rule.classify_value(&FieldValue::Integer(*a)))
            .collect();
        assert_eq!(labels, vec!["<18", "18–24", "35–44"]);
        assert_eq!(rule.classify_value(&FieldValue::Integer(25)), "25–34");
        assert_eq!(rule.classify_value(&FieldValue::Integer(45)), "45+");
        assert_eq!(rule.classify_value(&FieldValue::Integer(90)), "45+");
    }

    #[test]
    fn test_ad_exposure_boundaries() {
        let rule = BucketRule::ad_exposure();
        let classify = |n: i64| rule.classify_value(&FieldValue::Integer(n)).to_string();
        assert_eq!(classify(0), "Low Ads");
        assert_eq!(classify(5), "Low Ads");
        assert_eq!(classify(6), "Medium Ads");
        assert_eq!(classify(15), "Medium Ads");
        assert_eq!(classify(16), "High Ads");
    }

    #[test]
    fn test_first_match_wins_on_overlap() {
        let rule = BucketRule::new(
            "overlap",
            Field::Age,
            vec![
                range_arm(Bound::Unbounded, Bound::Inclusive(30.0), "young"),
                range_arm(Bound::Inclusive(20.0), Bound::Inclusive(40.0), "middle"),
            ],
            "old",
        )
        .unwrap();
        assert_eq!(rule.classify_value(&FieldValue::Integer(25)), "young");
        assert_eq!(rule.classify_value(&FieldValue::Integer(35)), "middle");
    }

    #[test]
    fn test_totality_with_no_arms() {
        let rule = BucketRule::new("everyone", Field::Device, vec![], "all").unwrap();
        assert_eq!(rule.classify_value(&FieldValue::Text("Tablet".into())), "all");
    }

    #[test]
    fn test_standard_rules_validate() {
        assert!(BucketRule::age_group().validate().is_ok());
        assert!(BucketRule::ad_exposure().validate().is_ok());
    }

    #[test]
    fn test_missing_default_is_configuration_error() {
        let err = BucketRule::new("ages", Field::Age, vec![], "  ").unwrap_err();
        assert!(matches!(err, ChurnError::Configuration(_)));
    }

    #[test]
    fn test_range_on_text_field_rejected() {
        let err = BucketRule::new(
            "bad",
            Field::Country,
            vec![range_arm(Bound::Unbounded, Bound::Inclusive(1.0), "x")],
            "y",
        )
        .unwrap_err();
        assert!(err.to_string().contains("non-numeric"));
    }

    #[test]
    fn test_labels_are_distinct_and_ordered() {
        let rule = BucketRule::new(
            "region",
            Field::Country,
            vec![
                BucketArm {
                    predicate: BucketPredicate::OneOf { values: vec![json!("DE"), json!("FR")] },
                    label: "EU".into(),
                },
                BucketArm {
                    predicate: BucketPredicate::OneOf { values: vec![json!("IT")] },
                    label: "EU".into(),
                },
            ],
            "Other",
        )
        .unwrap();
        assert_eq!(rule.labels(), vec!["EU", "Other"]);
        assert_eq!(BucketRule::ad_exposure().labels(), vec!["Low Ads", "Medium Ads", "High Ads"]);
    }
}
