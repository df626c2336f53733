use crate::error::{ChurnError, ChurnResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One cleaned row of the streaming-service user table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(alias = "user_id", alias = "userId")]
    pub id: u64,
    #[serde(alias = "subscription_type", alias = "subscriptionTier")]
    pub subscription_tier: SubscriptionTier,
    #[serde(alias = "listening_time", alias = "listeningMinutesPerDay")]
    pub listening_minutes_per_day: f64,
    #[serde(alias = "songsPerDay")]
    pub songs_per_day: u32,
    #[serde(alias = "skipRate")]
    pub skip_rate: f64,
    #[serde(alias = "ads_listened_per_week", alias = "adsPerWeek")]
    pub ads_per_week: u32,
    #[serde(alias = "offlineListening")]
    pub offline_listening: bool,
    #[serde(alias = "is_churned")]
    pub churned: bool,
    pub age: u32,
    pub country: String,
    #[serde(alias = "device_type")]
    pub device: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubscriptionTier {
    #[serde(alias = "free", alias = "FREE")]
    Free,
    #[serde(alias = "premium", alias = "PREMIUM")]
    Premium,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "Free",
            SubscriptionTier::Premium => "Premium",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selectable column of a [`UserRecord`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    #[serde(rename = "user_id")]
    Id,
    SubscriptionTier,
    #[serde(rename = "listening_time")]
    ListeningTime,
    SongsPerDay,
    SkipRate,
    AdsPerWeek,
    OfflineListening,
    Churned,
    Age,
    Country,
    Device,
}

impl Field {
    pub const ALL: [Field; 11] = [
        Field::Id,
        Field::SubscriptionTier,
        Field::ListeningTime,
        Field::SongsPerDay,
        Field::SkipRate,
        Field::AdsPerWeek,
        Field::OfflineListening,
        Field::Churned,
        Field::Age,
        Field::Country,
        Field::Device,
    ];

    /// Column name used in result tables and when parsing selectors.
    pub fn column_name(&self) -> &'static str {
        match self {
            Field::Id => "user_id",
            Field::SubscriptionTier => "subscription_tier",
            Field::ListeningTime => "listening_time",
            Field::SongsPerDay => "songs_per_day",
            Field::SkipRate => "skip_rate",
            Field::AdsPerWeek => "ads_per_week",
            Field::OfflineListening => "offline_listening",
            Field::Churned => "churned",
            Field::Age => "age",
            Field::Country => "country",
            Field::Device => "device",
        }
    }

    /// Whether the field may be averaged.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Field::ListeningTime
                | Field::SongsPerDay
                | Field::SkipRate
                | Field::AdsPerWeek
                | Field::Age
        )
    }

    /// JSON shape a condition operand must have to compare with this field.
    pub fn kind(&self) -> FieldKind {
        match self {
            Field::OfflineListening | Field::Churned => FieldKind::Flag,
            Field::Id | Field::SongsPerDay | Field::AdsPerWeek | Field::Age => FieldKind::Integer,
            Field::ListeningTime | Field::SkipRate => FieldKind::Number,
            Field::SubscriptionTier | Field::Country | Field::Device => FieldKind::Text,
        }
    }

    /// Whether the field has discrete values suitable for a group key.
    /// Fractional measurements must be bucketed first.
    pub fn is_groupable(&self) -> bool {
        !matches!(self, Field::ListeningTime | Field::SkipRate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Flag,
    Integer,
    Number,
    Text,
}

impl FieldKind {
    /// Whether a JSON operand can be compared against values of this kind.
    /// Integer fields accept any JSON number so thresholds like `17.5` work.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            FieldKind::Flag => value.is_boolean(),
            FieldKind::Integer | FieldKind::Number => value.is_number(),
            FieldKind::Text => value.is_string(),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FieldKind::Flag => "boolean",
            FieldKind::Integer => "integer",
            FieldKind::Number => "number",
            FieldKind::Text => "string",
        })
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

impl FromStr for Field {
    type Err = ChurnError;

    fn from_str(s: &str) -> ChurnResult<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let field = match normalized.as_str() {
            "id" | "user_id" => Field::Id,
            "subscription_tier" | "subscription_type" | "tier" => Field::SubscriptionTier,
            "listening_time" | "listening_minutes_per_day" => Field::ListeningTime,
            "songs_per_day" => Field::SongsPerDay,
            "skip_rate" => Field::SkipRate,
            "ads_per_week" | "ads_listened_per_week" => Field::AdsPerWeek,
            "offline_listening" => Field::OfflineListening,
            "churned" | "is_churned" => Field::Churned,
            "age" => Field::Age,
            "country" => Field::Country,
            "device" | "device_type" => Field::Device,
            _ => return Err(ChurnError::InvalidField(format!("unknown field '{s}'"))),
        };
        Ok(field)
    }
}

/// Typed value of one field of one record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Flag(bool),
    Integer(i64),
    /// Record ids span the full `u64` range.
    Unsigned(u64),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Unsigned(u) => Some(*u as f64),
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Exact integer view, for comparisons that must not go through `f64`.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            FieldValue::Integer(i) => Some(i128::from(*i)),
            FieldValue::Unsigned(u) => Some(i128::from(*u)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Flag(b) => serde_json::Value::Bool(*b),
            FieldValue::Integer(i) => serde_json::json!(i),
            FieldValue::Unsigned(u) => serde_json::json!(u),
            FieldValue::Number(n) => serde_json::json!(n),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl UserRecord {
    /// Reads one field without mutating the record.
    pub fn field(&self, field: Field) -> FieldValue {
        match field {
            Field::Id => FieldValue::Unsigned(self.id),
            Field::SubscriptionTier => {
                FieldValue::Text(self.subscription_tier.as_str().to_string())
            }
            Field::ListeningTime => FieldValue::Number(self.listening_minutes_per_day),
            Field::SongsPerDay => FieldValue::Integer(self.songs_per_day as i64),
            Field::SkipRate => FieldValue::Number(self.skip_rate),
            Field::AdsPerWeek => FieldValue::Integer(self.ads_per_week as i64),
            Field::OfflineListening => FieldValue::Flag(self.offline_listening),
            Field::Churned => FieldValue::Flag(self.churned),
            Field::Age => FieldValue::Integer(self.age as i64),
            Field::Country => FieldValue::Text(self.country.clone()),
            Field::Device => FieldValue::Text(self.device.clone()),
        }
    }

    /// Numeric view of a field, `None` for text and flag fields.
    pub fn numeric(&self, field: Field) -> Option<f64> {
        match field {
            Field::ListeningTime => Some(self.listening_minutes_per_day),
            Field::SongsPerDay => Some(self.songs_per_day as f64),
            Field::SkipRate => Some(self.skip_rate),
            Field::AdsPerWeek => Some(self.ads_per_week as f64),
            Field::Age => Some(self.age as f64),
            Field::Id => Some(self.id as f64),
            _ => None,
        }
    }
}
