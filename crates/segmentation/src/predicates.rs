//! Predicate types and evaluation logic for record filters and bucket arms.

use churn_core::{ChurnError, ChurnResult, Field, FieldKind, FieldValue, SubscriptionTier, UserRecord};
use serde::{Deserialize, Serialize};

/// Record filter tree used for pre-filters and conditional metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    Compare {
        field: Field,
        operator: ComparisonOperator,
        value: serde_json::Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    InList,
    NotInList,
}

impl Condition {
    pub fn compare(
        field: Field,
        operator: ComparisonOperator,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Condition::Compare {
            field,
            operator,
            value: value.into(),
        }
    }

    pub fn is_true(field: Field) -> Self {
        Self::compare(field, ComparisonOperator::Equals, true)
    }

    pub fn is_false(field: Field) -> Self {
        Self::compare(field, ComparisonOperator::Equals, false)
    }

    pub fn matches(&self, record: &UserRecord) -> bool {
        match self {
            Condition::All(conditions) => conditions.iter().all(|c| c.matches(record)),
            Condition::Any(conditions) => conditions.iter().any(|c| c.matches(record)),
            Condition::Not(inner) => !inner.matches(record),
            Condition::Compare {
                field,
                operator,
                value,
            } => compare_values(&record.field(*field).to_json(), operator, value),
        }
    }

    /// Rejects list operators without a list, ordering operators on
    /// non-numeric fields, and operands whose JSON type can never equal a
    /// value of the field.
    pub fn validate(&self) -> ChurnResult<()> {
        match self {
            Condition::All(conditions) | Condition::Any(conditions) => {
                conditions.iter().try_for_each(Condition::validate)
            }
            Condition::Not(inner) => inner.validate(),
            Condition::Compare {
                field,
                operator,
                value,
            } => match operator {
                ComparisonOperator::InList | ComparisonOperator::NotInList => match value {
                    serde_json::Value::Array(items) => {
                        items.iter().try_for_each(|item| check_operand(*field, item))
                    }
                    _ => Err(ChurnError::Configuration(format!(
                        "{operator:?} on '{field}' needs a list operand"
                    ))),
                },
                ComparisonOperator::GreaterThan
                | ComparisonOperator::GreaterThanOrEqual
                | ComparisonOperator::LessThan
                | ComparisonOperator::LessThanOrEqual
                    if !matches!(field.kind(), FieldKind::Integer | FieldKind::Number) =>
                {
                    Err(ChurnError::Configuration(format!(
                        "{operator:?} on '{field}' needs a numeric field"
                    )))
                }
                _ => check_operand(*field, value),
            },
        }
    }
}

fn check_operand(field: Field, value: &serde_json::Value) -> ChurnResult<()> {
    let kind = field.kind();
    if !kind.accepts(value) {
        return Err(ChurnError::Configuration(format!(
            "'{field}' holds {kind} values; cannot compare with {value}"
        )));
    }
    if field == Field::SubscriptionTier {
        let known = [SubscriptionTier::Free, SubscriptionTier::Premium];
        if !known.iter().any(|t| value.as_str() == Some(t.as_str())) {
            return Err(ChurnError::Configuration(format!(
                "unknown subscription tier {value}"
            )));
        }
    }
    Ok(())
}

pub fn compare_values(
    actual: &serde_json::Value,
    operator: &ComparisonOperator,
    expected: &serde_json::Value,
) -> bool {
    use std::cmp::Ordering;

    match operator {
        ComparisonOperator::Equals => values_equal(actual, expected),
        ComparisonOperator::NotEquals => !values_equal(actual, expected),
        ComparisonOperator::GreaterThan => {
            numeric_cmp(actual, expected).is_some_and(|o| o == Ordering::Greater)
        }
        ComparisonOperator::GreaterThanOrEqual => {
            numeric_cmp(actual, expected).is_some_and(|o| o != Ordering::Less)
        }
        ComparisonOperator::LessThan => {
            numeric_cmp(actual, expected).is_some_and(|o| o == Ordering::Less)
        }
        ComparisonOperator::LessThanOrEqual => {
            numeric_cmp(actual, expected).is_some_and(|o| o != Ordering::Greater)
        }
        ComparisonOperator::InList => expected
            .as_array()
            .is_some_and(|list| list.iter().any(|v| values_equal(actual, v))),
        ComparisonOperator::NotInList => expected
            .as_array()
            .is_none_or(|list| !list.iter().any(|v| values_equal(actual, v))),
    }
}

/// JSON equality, except that `3` and `3.0` are equal.
fn values_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match numeric_cmp(a, b) {
        Some(o) => o == std::cmp::Ordering::Equal,
        None => a == b,
    }
}

fn numeric_cmp(a: &serde_json::Value, b: &serde_json::Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (exact_integer(a), exact_integer(b)) {
        return Some(x.cmp(&y));
    }
    let a_num = a.as_f64()?;
    let b_num = b.as_f64()?;
    a_num.partial_cmp(&b_num)
}

/// Integer view of a JSON number, wide enough for every `i64` and `u64`.
fn exact_integer(value: &serde_json::Value) -> Option<i128> {
    value
        .as_i64()
        .map(i128::from)
        .or_else(|| value.as_u64().map(i128::from))
}

// ─── Bucket predicates ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Unbounded,
    Inclusive(f64),
    Exclusive(f64),
}

/// Test applied to a single field value by one arm of a bucket rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketPredicate {
    Range { lower: Bound, upper: Bound },
    OneOf { values: Vec<serde_json::Value> },
}

impl BucketPredicate {
    pub fn matches(&self, value: &FieldValue) -> bool {
        match self {
            BucketPredicate::Range { lower, upper } => {
                let Some(v) = value.as_f64() else {
                    return false;
                };
                let above_lower = match lower {
                    Bound::Unbounded => true,
                    Bound::Inclusive(b) => v >= *b,
                    Bound::Exclusive(b) => v > *b,
                };
                let below_upper = match upper {
                    Bound::Unbounded => true,
                    Bound::Inclusive(b) => v <= *b,
                    Bound::Exclusive(b) => v < *b,
                };
                above_lower && below_upper
            }
            BucketPredicate::OneOf { values } => {
                let actual = value.to_json();
                values.iter().any(|v| values_equal(&actual, v))
            }
        }
    }

    pub fn validate(&self) -> ChurnResult<()> {
        match self {
            BucketPredicate::Range { lower, upper } => {
                let bound_value = |b: &Bound| match b {
                    Bound::Unbounded => None,
                    Bound::Inclusive(v) | Bound::Exclusive(v) => Some(*v),
                };
                let (lo, hi) = (bound_value(lower), bound_value(upper));
                if lo.is_some_and(f64::is_nan) || hi.is_some_and(f64::is_nan) {
                    return Err(ChurnError::Configuration("range bound is NaN".into()));
                }
                if let (Some(lo), Some(hi)) = (lo, hi) {
                    let both_inclusive =
                        matches!(lower, Bound::Inclusive(_)) && matches!(upper, Bound::Inclusive(_));
                    if lo > hi || (lo == hi && !both_inclusive) {
                        return Err(ChurnError::Configuration(format!(
                            "empty range {lower:?}..{upper:?}"
                        )));
                    }
                }
                Ok(())
            }
            BucketPredicate::OneOf { values } if values.is_empty() => Err(
                ChurnError::Configuration("set membership needs at least one value".into()),
            ),
            BucketPredicate::OneOf { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use churn_core::SubscriptionTier;
    use serde_json::json;

    fn record(tier: SubscriptionTier, listening: f64, skip: f64, churned: bool) -> UserRecord {
        UserRecord {
            id: 1,
            subscription_tier: tier,
            listening_minutes_per_day: listening,
            songs_per_day: 10,
            skip_rate: skip,
            ads_per_week: 3,
            offline_listening: false,
            churned,
            age: 30,
            country: "US".into(),
            device: "Mobile".into(),
        }
    }

    #[test]
    fn test_compare_values_numeric_and_lists() {
        assert!(compare_values(&json!(3), &ComparisonOperator::Equals, &json!(3.0)));
        assert!(compare_values(&json!(120.0), &ComparisonOperator::GreaterThanOrEqual, &json!(120)));
        assert!(!compare_values(&json!("a"), &ComparisonOperator::LessThan, &json!(1)));
        assert!(compare_values(&json!("US"), &ComparisonOperator::InList, &json!(["DE", "US"])));
        assert!(compare_values(&json!("FR"), &ComparisonOperator::NotInList, &json!(["DE", "US"])));
    }

    #[test]
    fn test_condition_tree() {
        let high_engagement = Condition::All(vec![
            Condition::compare(Field::ListeningTime, ComparisonOperator::GreaterThanOrEqual, 120),
            Condition::compare(Field::SkipRate, ComparisonOperator::LessThan, 20),
            Condition::is_false(Field::Churned),
        ]);
        assert!(high_engagement.matches(&record(SubscriptionTier::Premium, 120.0, 19.9, false)));
        assert!(!high_engagement.matches(&record(SubscriptionTier::Premium, 119.9, 5.0, false)));
        assert!(!high_engagement.matches(&record(SubscriptionTier::Premium, 200.0, 20.0, false)));
        assert!(!high_engagement.matches(&record(SubscriptionTier::Premium, 200.0, 5.0, true)));

        let free = Condition::compare(Field::SubscriptionTier, ComparisonOperator::Equals, "Free");
        assert!(free.matches(&record(SubscriptionTier::Free, 1.0, 1.0, false)));
        assert!(Condition::Not(Box::new(free)).matches(&record(SubscriptionTier::Premium, 1.0, 1.0, false)));
    }

    #[test]
    fn test_empty_all_and_any() {
        let r = record(SubscriptionTier::Free, 1.0, 1.0, false);
        assert!(Condition::All(vec![]).matches(&r));
        assert!(!Condition::Any(vec![]).matches(&r));
    }

    #[test]
    fn test_condition_validation() {
        assert!(Condition::compare(Field::Country, ComparisonOperator::InList, "US")
            .validate()
            .is_err());
        assert!(Condition::compare(Field::Country, ComparisonOperator::GreaterThan, 3)
            .validate()
            .is_err());
        assert!(Condition::compare(Field::Age, ComparisonOperator::GreaterThan, 3)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validation_rejects_mismatched_operand_types() {
        let mismatched = [
            Condition::compare(Field::Churned, ComparisonOperator::Equals, "true"),
            Condition::compare(Field::Country, ComparisonOperator::InList, json!([1])),
            Condition::compare(Field::SubscriptionTier, ComparisonOperator::Equals, "Gold"),
            Condition::compare(Field::Age, ComparisonOperator::NotEquals, "30"),
            Condition::Not(Box::new(Condition::compare(
                Field::OfflineListening,
                ComparisonOperator::Equals,
                1,
            ))),
        ];
        for condition in &mismatched {
            assert!(
                matches!(condition.validate(), Err(ChurnError::Configuration(_))),
                "{condition:?} should be rejected"
            );
        }

        let accepted = [
            Condition::is_true(Field::Churned),
            Condition::compare(Field::SubscriptionTier, ComparisonOperator::Equals, "Premium"),
            Condition::compare(Field::Country, ComparisonOperator::InList, json!(["DE", "US"])),
            Condition::compare(Field::Age, ComparisonOperator::LessThan, 17.5),
            Condition::compare(Field::SkipRate, ComparisonOperator::Equals, 20),
        ];
        for condition in &accepted {
            assert!(condition.validate().is_ok(), "{condition:?} should be accepted");
        }
    }

    #[test]
    fn test_large_ids_compare_exactly() {
        let mut r = record(SubscriptionTier::Free, 1.0, 1.0, false);
        r.id = u64::MAX;
        let exact = Condition::compare(Field::Id, ComparisonOperator::Equals, u64::MAX);
        let neighbour = Condition::compare(Field::Id, ComparisonOperator::Equals, u64::MAX - 1);
        let below = Condition::compare(Field::Id, ComparisonOperator::GreaterThan, u64::MAX - 1);
        assert!(exact.matches(&r));
        assert!(!neighbour.matches(&r));
        assert!(below.matches(&r));
        assert!(compare_values(&json!(-1), &ComparisonOperator::LessThan, &json!(u64::MAX)));
    }

    #[test]
    fn test_range_bounds() {
        let teen = BucketPredicate::Range {
            lower: Bound::Unbounded,
            upper: Bound::Exclusive(18.0),
        };
        assert!(teen.matches(&FieldValue::Integer(17)));
        assert!(!teen.matches(&FieldValue::Integer(18)));
        assert!(!teen.matches(&FieldValue::Text("17".into())));

        let closed = BucketPredicate::Range {
            lower: Bound::Inclusive(18.0),
            upper: Bound::Inclusive(24.0),
        };
        assert!(closed.matches(&FieldValue::Integer(18)));
        assert!(closed.matches(&FieldValue::Integer(24)));
        assert!(!closed.matches(&FieldValue::Integer(25)));
    }

    #[test]
    fn test_one_of() {
        let devices = BucketPredicate::OneOf {
            values: vec![json!("Mobile"), json!("Tablet")],
        };
        assert!(devices.matches(&FieldValue::Text("Tablet".into())));
        assert!(!devices.matches(&FieldValue::Text("Desktop".into())));
    }

    #[test]
    fn test_range_validation() {
        let inverted = BucketPredicate::Range {
            lower: Bound::Inclusive(10.0),
            upper: Bound::Inclusive(5.0),
        };
        assert!(inverted.validate().is_err());
        let half_open_point = BucketPredicate::Range {
            lower: Bound::Inclusive(5.0),
            upper: Bound::Exclusive(5.0),
        };
        assert!(half_open_point.validate().is_err());
        let point = BucketPredicate::Range {
            lower: Bound::Inclusive(5.0),
            upper: Bound::Inclusive(5.0),
        };
        assert!(point.validate().is_ok());
        assert!(BucketPredicate::OneOf { values: vec![] }.validate().is_err());
    }
}
