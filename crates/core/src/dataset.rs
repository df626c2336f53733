//! Record-set ingestion — loads cleaned user rows from JSON or JSON Lines
//! and checks the invariants the aggregation stage relies on.

use std::collections::HashSet;
use std::io::Read;

use tracing::{debug, info};

use crate::error::{ChurnError, ChurnResult};
use crate::types::UserRecord;

/// Immutable, validated collection of user records for one analysis run.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: Vec<UserRecord>,
}

impl RecordSet {
    /// Validates and wraps `records`.
    pub fn new(records: Vec<UserRecord>) -> ChurnResult<Self> {
        validate(&records)?;
        Ok(Self { records })
    }

    /// Wraps `records` without checking them. The caller vouches for the
    /// upstream cleaning stage.
    pub fn trusted(records: Vec<UserRecord>) -> Self {
        Self { records }
    }

    /// Parses either a JSON array of records or one JSON object per line.
    pub fn from_reader<R: Read>(mut reader: R, validate_records: bool) -> ChurnResult<Self> {
        let mut raw = String::new();
        reader.read_to_string(&mut raw)?;
        let records = parse_records(&raw)?;
        info!(records = records.len(), "Loaded user records");
        if validate_records {
            Self::new(records)
        } else {
            Ok(Self::trusted(records))
        }
    }

    pub fn records(&self) -> &[UserRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fails with `EmptyInput` when the set has no rows.
    pub fn require_non_empty(&self) -> ChurnResult<&Self> {
        if self.records.is_empty() {
            return Err(ChurnError::EmptyInput(
                "record set contains no rows".to_string(),
            ));
        }
        Ok(self)
    }
}

fn parse_records(raw: &str) -> ChurnResult<Vec<UserRecord>> {
    let trimmed = raw.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    let mut records = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: UserRecord = serde_json::from_str(line).map_err(|e| {
            ChurnError::Validation(format!("line {}: {e}", line_no + 1))
        })?;
        records.push(record);
    }
    debug!(records = records.len(), "Parsed JSON Lines input");
    Ok(records)
}

fn validate(records: &[UserRecord]) -> ChurnResult<()> {
    let mut seen = HashSet::with_capacity(records.len());
    for r in records {
        if !seen.insert(r.id) {
            return Err(ChurnError::Validation(format!("duplicate user id {}", r.id)));
        }
        if !r.listening_minutes_per_day.is_finite() || r.listening_minutes_per_day < 0.0 {
            return Err(ChurnError::Validation(format!(
                "user {}: listening time must be a non-negative number",
                r.id
            )));
        }
        if !r.skip_rate.is_finite() || !(0.0..=100.0).contains(&r.skip_rate) {
            return Err(ChurnError::Validation(format!(
                "user {}: skip rate {} outside 0-100",
                r.id, r.skip_rate
            )));
        }
        if r.age == 0 {
            return Err(ChurnError::Validation(format!(
                "user {}: age must be positive",
                r.id
            )));
        }
        if r.country.trim().is_empty() || r.device.trim().is_empty() {
            return Err(ChurnError::Validation(format!(
                "user {}: country and device are required",
                r.id
            )));
        }
    }
    Ok(())
}
