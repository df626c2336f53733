//! Segmentation — record filters, ordered bucket rules, and the bucketizer
//! that turns continuous or categorical fields into segment labels.

pub mod builder;
pub mod engine;
pub mod predicates;
pub mod rules;

pub use builder::BucketRuleBuilder;
pub use engine::Bucketizer;
pub use predicates::{Bound, BucketPredicate, ComparisonOperator, Condition};
pub use rules::{BucketArm, BucketRule};
