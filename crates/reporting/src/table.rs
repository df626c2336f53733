//! Result tables — ordered group rows with CSV, JSON and plain-text export.

use churn_core::ChurnResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One component of a group key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupValue {
    Flag(bool),
    Integer(i64),
    Unsigned(u64),
    Label(String),
}

impl fmt::Display for GroupValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupValue::Flag(b) => write!(f, "{b}"),
            GroupValue::Integer(i) => write!(f, "{i}"),
            GroupValue::Unsigned(u) => write!(f, "{u}"),
            GroupValue::Label(s) => f.write_str(s),
        }
    }
}

impl From<&str> for GroupValue {
    fn from(s: &str) -> Self {
        GroupValue::Label(s.to_string())
    }
}

impl From<bool> for GroupValue {
    fn from(b: bool) -> Self {
        GroupValue::Flag(b)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Count(u64),
    Decimal(f64),
    /// Mean or rate over an empty group.
    Missing,
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Count(n) => Some(*n as f64),
            MetricValue::Decimal(d) => Some(*d),
            MetricValue::Missing => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            MetricValue::Count(n) => Some(*n),
            _ => None,
        }
    }

    fn render(&self, precision: u32) -> String {
        match self {
            MetricValue::Count(n) => n.to_string(),
            MetricValue::Decimal(d) => format!("{:.*}", precision as usize, d),
            MetricValue::Missing => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricColumn {
    pub name: String,
    pub precision: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub key: Vec<GroupValue>,
    pub values: Vec<MetricValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub analysis: String,
    pub key_columns: Vec<String>,
    pub metric_columns: Vec<MetricColumn>,
    pub rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn columns(&self) -> Vec<&str> {
        self.key_columns
            .iter()
            .map(String::as_str)
            .chain(self.metric_columns.iter().map(|c| c.name.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn metric_index(&self, name: &str) -> Option<usize> {
        self.metric_columns.iter().position(|c| c.name == name)
    }

    pub fn row(&self, key: &[GroupValue]) -> Option<&ResultRow> {
        self.rows.iter().find(|r| r.key == key)
    }

    /// Metric `name` of the row keyed by `key`.
    pub fn value(&self, key: &[GroupValue], name: &str) -> Option<&MetricValue> {
        let idx = self.metric_index(name)?;
        self.row(key).and_then(|r| r.values.get(idx))
    }

    /// Values of metric `name` in row order.
    pub fn metric_values(&self, name: &str) -> Vec<MetricValue> {
        match self.metric_index(name) {
            Some(idx) => self.rows.iter().map(|r| r.values[idx].clone()).collect(),
            None => Vec::new(),
        }
    }

    pub fn to_csv(&self) -> String {
        let mut csv = self.columns().join(",");
        csv.push('\n');
        for row in &self.rows {
            let cells: Vec<String> = row
                .key
                .iter()
                .map(|k| match k {
                    GroupValue::Label(s) => format!("\"{}\"", s.replace('"', "\"\"")),
                    other => other.to_string(),
                })
                .chain(
                    row.values
                        .iter()
                        .zip(&self.metric_columns)
                        .map(|(v, c)| v.render(c.precision)),
                )
                .collect();
            csv.push_str(&cells.join(","));
            csv.push('\n');
        }
        csv
    }

    /// Rows as an array of objects keyed by column name, keys in column order.
    pub fn to_json_value(&self) -> serde_json::Value {
        let records: Vec<serde_json::Value> = self
            .rows
            .iter()
            .map(|row| {
                let mut record = serde_json::Map::new();
                for (col, val) in self.key_columns.iter().zip(&row.key) {
                    record.insert(col.clone(), serde_json::json!(val));
                }
                for (col, val) in self.metric_columns.iter().zip(&row.values) {
                    record.insert(col.name.clone(), serde_json::json!(val));
                }
                serde_json::Value::Object(record)
            })
            .collect();
        serde_json::Value::Array(records)
    }

    pub fn to_json(&self) -> ChurnResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_json_value())?)
    }

    /// Column-aligned text with a header rule, for terminals.
    pub fn render_text(&self) -> String {
        let header: Vec<String> = self.columns().into_iter().map(String::from).collect();
        let body: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                row.key
                    .iter()
                    .map(|k| k.to_string())
                    .chain(
                        row.values
                            .iter()
                            .zip(&self.metric_columns)
                            .map(|(v, c)| v.render(c.precision)),
                    )
                    .collect()
            })
            .collect();

        let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
        for cells in &body {
            for (w, cell) in widths.iter_mut().zip(cells) {
                *w = (*w).max(cell.chars().count());
            }
        }

        let key_count = self.key_columns.len();
        let line = |cells: &[String]| -> String {
            cells
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    let pad = widths[i].saturating_sub(cell.chars().count());
                    if i < key_count {
                        format!("{cell}{}", " ".repeat(pad))
                    } else {
                        format!("{}{cell}", " ".repeat(pad))
                    }
                })
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        let mut out = format!("== {} ==\n", self.analysis);
        out.push_str(&line(&header[..]));
        out.push('\n');
        let rule_width = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
        out.push_str(&"-".repeat(rule_width));
        out.push('\n');
        for cells in &body {
            out.push_str(&line(&cells[..]));
            out.push('\n');
        }
        out
    }
}
