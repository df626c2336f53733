//! Bucket rule builder — fluent API for declaring ordered bucket arms.

use churn_core::{ChurnError, ChurnResult, Field};

use crate::predicates::{Bound, BucketPredicate};
use crate::rules::{BucketArm, BucketRule};

pub struct BucketRuleBuilder {
    name: String,
    field: Field,
    arms: Vec<BucketArm>,
    default_label: Option<String>,
}

impl BucketRuleBuilder {
    pub fn new(name: impl Into<String>, field: Field) -> Self {
        Self {
            name: name.into(),
            field,
            arms: Vec::new(),
            default_label: None,
        }
    }

    fn range(mut self, lower: Bound, upper: Bound, label: impl Into<String>) -> Self {
        self.arms.push(BucketArm {
            predicate: BucketPredicate::Range { lower, upper },
            label: label.into(),
        });
        self
    }

    /// `value < limit`
    pub fn below(self, limit: f64, label: impl Into<String>) -> Self {
        self.range(Bound::Unbounded, Bound::Exclusive(limit), label)
    }

    /// `value <= limit`
    pub fn at_most(self, limit: f64, label: impl Into<String>) -> Self {
        self.range(Bound::Unbounded, Bound::Inclusive(limit), label)
    }

    /// `low <= value <= high`
    pub fn between(self, low: f64, high: f64, label: impl Into<String>) -> Self {
        self.range(Bound::Inclusive(low), Bound::Inclusive(high), label)
    }

    /// `value >= limit`
    pub fn at_least(self, limit: f64, label: impl Into<String>) -> Self {
        self.range(Bound::Inclusive(limit), Bound::Unbounded, label)
    }

    /// `value > limit`
    pub fn above(self, limit: f64, label: impl Into<String>) -> Self {
        self.range(Bound::Exclusive(limit), Bound::Unbounded, label)
    }

    pub fn one_of(mut self, values: Vec<serde_json::Value>, label: impl Into<String>) -> Self {
        self.arms.push(BucketArm {
            predicate: BucketPredicate::OneOf { values },
            label: label.into(),
        });
        self
    }

    pub fn otherwise(mut self, label: impl Into<String>) -> Self {
        self.default_label = Some(label.into());
        self
    }

    pub fn build(self) -> ChurnResult<BucketRule> {
        let default_label = self.default_label.ok_or_else(|| {
            ChurnError::Configuration(format!(
                "bucket rule '{}' has no default label",
                self.name
            ))
        })?;
        BucketRule::new(self.name, self.field, self.arms, default_label)
    }
}
