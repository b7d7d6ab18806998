use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{HdrError, Result};
use crate::record::{Row, WriteRecord};

/// A half-open time range over one measurement with tag equality/IN filters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStatement {
    pub measurement: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub filters: BTreeMap<String, Vec<String>>,
}

impl QueryStatement {
    pub fn new(measurement: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        QueryStatement {
            measurement: measurement.to_string(),
            start,
            end,
            filters: BTreeMap::new(),
        }
    }

    /// Restrict `tag` to `values`. An empty list adds no restriction.
    pub fn with_filter(mut self, tag: &str, values: Vec<String>) -> Self {
        if !values.is_empty() {
            self.filters.insert(tag.to_string(), values);
        }
        self
    }

    pub fn matches(&self, record: &WriteRecord) -> bool {
        if record.measurement != self.measurement {
            return false;
        }
        let (Some(start), Some(end)) = (
            self.start.timestamp_nanos_opt(),
            self.end.timestamp_nanos_opt(),
        ) else {
            return false;
        };
        if record.timestamp_ns < start || record.timestamp_ns >= end {
            return false;
        }
        self.filters.iter().all(|(tag, allowed)| {
            let value = record.tags.get(tag).map(String::as_str).unwrap_or_default();
            allowed.iter().any(|a| a == value)
        })
    }
}

fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// SQL rendering, used for diagnostics and SQL-speaking backends.
impl fmt::Display for QueryStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SELECT * FROM {} WHERE \"time\" >= TIMESTAMP {} AND \"time\" < TIMESTAMP {}",
            quote_ident(&self.measurement),
            quote_literal(&self.start.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            quote_literal(&self.end.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        )?;
        for (tag, values) in &self.filters {
            let list: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
            write!(f, " AND {} IN ({})", quote_ident(tag), list.join(","))?;
        }
        Ok(())
    }
}

/// The time-series storage the engine reads summaries from and writes them to.
///
/// Retries and backoff belong to the implementation, not to callers.
pub trait SummaryStore: Send + Sync {
    fn query(&self, statement: &QueryStatement) -> impl Future<Output = Result<Vec<Row>>> + Send;

    fn write(&self, record: WriteRecord) -> impl Future<Output = Result<()>> + Send;
}

/// Append-only store kept in memory. Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Vec<WriteRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn records(&self) -> Vec<WriteRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SummaryStore for MemoryStore {
    async fn query(&self, statement: &QueryStatement) -> Result<Vec<Row>> {
        let records = self
            .records
            .lock()
            .map_err(|e| HdrError::UpstreamQuery(format!("memory store poisoned: {e}")))?;
        Ok(records
            .iter()
            .filter(|r| statement.matches(r))
            .map(WriteRecord::to_row)
            .collect())
    }

    async fn write(&self, record: WriteRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| HdrError::Write(format!("memory store poisoned: {e}")))?;
        records.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn record(measurement: &str, component: &str, secs: i64) -> WriteRecord {
        WriteRecord {
            measurement: measurement.to_string(),
            tags: BTreeMap::from([("component".to_string(), component.to_string())]),
            fields: BTreeMap::from([("count".to_string(), FieldValue::UInt(1))]),
            timestamp_ns: secs * 1_000_000_000,
        }
    }

    #[test]
    fn statement_sql() {
        let stmt = QueryStatement::new("latency_5m", at(0), at(3600))
            .with_filter("component", vec!["ingest".into(), "o'brien".into()])
            .with_filter("session", vec![]);
        assert_eq!(
            stmt.to_string(),
            "SELECT * FROM \"latency_5m\" WHERE \"time\" >= TIMESTAMP '1970-01-01T00:00:00Z' \
             AND \"time\" < TIMESTAMP '1970-01-01T01:00:00Z' \
             AND \"component\" IN ('ingest','o''brien')"
        );
    }

    #[test]
    fn statement_range_is_half_open() {
        let stmt = QueryStatement::new("latency_5m", at(100), at(200));
        assert!(stmt.matches(&record("latency_5m", "api", 100)));
        assert!(stmt.matches(&record("latency_5m", "api", 199)));
        assert!(!stmt.matches(&record("latency_5m", "api", 200)));
        assert!(!stmt.matches(&record("latency_1h", "api", 150)));
    }

    #[tokio::test]
    async fn memory_store_filters() {
        let store = MemoryStore::new();
        for (c, t) in [("api", 10), ("ingest", 20), ("web", 30), ("api", 500)] {
            store.write(record("latency_5m", c, t)).await.unwrap();
        }
        let stmt = QueryStatement::new("latency_5m", at(0), at(100))
            .with_filter("component", vec!["api".into(), "ingest".into()]);
        let rows = store.query(&stmt).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tag("component"), "api");
        assert_eq!(rows[1].tag("component"), "ingest");
        assert_eq!(store.len(), 4);
    }
}
