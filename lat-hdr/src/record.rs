use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};

use crate::histogram::LatencyHistogram;
use crate::percentile::field_name;

pub const TIME_COLUMN: &str = "time";
pub const MIN_FIELD: &str = "min";
pub const MAX_FIELD: &str = "max";
pub const COUNT_FIELD: &str = "count";
pub const UNIT_FIELD: &str = "unit";
pub const HISTOGRAM_FIELD: &str = "histo_b64";

pub const DEFAULT_UNIT: &str = "ns";

/// A typed column value, as returned by the store or written to it.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::UInt(v) => Some(*v as f64),
            FieldValue::Float(v) if v.is_finite() => Some(*v),
            FieldValue::Float(_) => None,
            FieldValue::Str(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    /// Non-negative integral view. Floats are truncated; negatives yield `None`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::Int(v) => u64::try_from(*v).ok(),
            FieldValue::UInt(v) => Some(*v),
            FieldValue::Str(s) => match s.trim().parse::<i64>() {
                Ok(v) => u64::try_from(v).ok(),
                Err(_) => FieldValue::Float(s.trim().parse::<f64>().ok()?).as_u64(),
            },
            FieldValue::Float(v) => {
                if v.is_finite() && *v >= 0.0 && *v < u64::MAX as f64 {
                    Some(v.trunc() as u64)
                } else {
                    None
                }
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::UInt(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInt(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

/// One row of a store query result: column name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: HashMap<String, FieldValue>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: impl Into<FieldValue>) {
        self.columns.insert(column.to_string(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.columns.get(column)
    }

    /// Tag value as text, empty when the column is absent.
    pub fn tag(&self, column: &str) -> String {
        self.columns
            .get(column)
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    pub fn f64(&self, column: &str) -> Option<f64> {
        self.columns.get(column).and_then(FieldValue::as_f64)
    }

    pub fn u64(&self, column: &str) -> Option<u64> {
        self.columns.get(column).and_then(FieldValue::as_u64)
    }

    pub fn timestamp_ns(&self) -> Option<i64> {
        match self.columns.get(TIME_COLUMN)? {
            FieldValue::Int(v) => Some(*v),
            FieldValue::UInt(v) => i64::try_from(*v).ok(),
            FieldValue::Str(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .and_then(|t| t.timestamp_nanos_opt()),
            FieldValue::Float(_) => None,
        }
    }

    /// Decode the serialized histogram column.
    ///
    /// `None` when the row carries no histogram at all.
    pub fn histogram(&self) -> Option<crate::Result<LatencyHistogram>> {
        match self.columns.get(HISTOGRAM_FIELD) {
            Some(FieldValue::Str(s)) if !s.is_empty() => Some(LatencyHistogram::decode_b64(s)),
            _ => None,
        }
    }
}

/// A point handed to the store's write interface.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp_ns: i64,
}

impl WriteRecord {
    /// The row a query would return for this record.
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        for (k, v) in &self.tags {
            row.insert(k, v.as_str());
        }
        for (k, v) in &self.fields {
            row.insert(k, v.clone());
        }
        row.insert(TIME_COLUMN, self.timestamp_ns);
        row
    }
}

/// Summary of one series over one window.
#[derive(Debug, Clone)]
pub struct StoredSummaryRow {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub percentiles: Vec<(f64, u64)>,
    pub min: f64,
    pub max: f64,
    pub count: u64,
    pub unit: String,
    pub histogram: LatencyHistogram,
    pub timestamp: DateTime<Utc>,
}

impl StoredSummaryRow {
    /// Summary whose percentiles, min, max and count all come from `histogram`.
    pub fn from_histogram(
        measurement: &str,
        tags: BTreeMap<String, String>,
        histogram: LatencyHistogram,
        percentiles: &[f64],
        unit: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        StoredSummaryRow {
            measurement: measurement.to_string(),
            tags,
            percentiles: percentiles
                .iter()
                .map(|p| (*p, histogram.percentile(*p)))
                .collect(),
            min: histogram.min().unwrap_or_default() as f64,
            max: histogram.max().unwrap_or_default() as f64,
            count: histogram.total_count(),
            unit: unit.to_string(),
            histogram,
            timestamp,
        }
    }

    pub fn to_write_record(&self) -> crate::Result<WriteRecord> {
        let mut fields = BTreeMap::new();
        for (p, v) in &self.percentiles {
            fields.insert(field_name(*p), FieldValue::Float(*v as f64));
        }
        fields.insert(MIN_FIELD.to_string(), FieldValue::Float(self.min));
        fields.insert(MAX_FIELD.to_string(), FieldValue::Float(self.max));
        fields.insert(COUNT_FIELD.to_string(), FieldValue::UInt(self.count));
        fields.insert(UNIT_FIELD.to_string(), FieldValue::Str(self.unit.clone()));
        fields.insert(
            HISTOGRAM_FIELD.to_string(),
            FieldValue::Str(self.histogram.encode_b64()?),
        );

        Ok(WriteRecord {
            measurement: self.measurement.clone(),
            tags: self.tags.clone(),
            fields,
            timestamp_ns: self.timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX),
        })
    }
}
