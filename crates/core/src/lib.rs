pub mod config;
pub mod dataset;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use dataset::RecordSet;
pub use error::{ChurnError, ChurnResult};
pub use types::{Field, FieldKind, FieldValue, SubscriptionTier, UserRecord};
