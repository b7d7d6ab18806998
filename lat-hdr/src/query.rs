use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{FIVE_MINUTE_MEASUREMENT, split_tags};
use crate::error::{HdrError, Result};
use crate::groupby::{GroupByQuery, GroupRow, SortDirection};
use crate::percentile::parse_percentiles;
use crate::store::QueryStatement;

/// Inbound group-by request body. Every field but `start` and `end` is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryRequest {
    pub start: Option<String>,
    pub end: Option<String>,
    /// Summary measurement to read, `latency_5m` unless given.
    pub measurement: Option<String>,
    /// `@`-delimited, e.g. `"50@95@99.9"`.
    pub percentiles: Option<String>,
    /// `@`-delimited tag names, e.g. `"channel@source"`.
    pub group_by: Option<String>,
    pub filters: Option<BTreeMap<String, Vec<String>>>,
    pub min_count: Option<u64>,
    pub order_by: Option<String>,
    pub order_dir: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowEcho {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub groups: Vec<GroupRow>,
    pub total_groups: usize,
    pub window: WindowEcho,
}

impl QueryResponse {
    pub fn new(groups: Vec<GroupRow>, window: WindowEcho) -> Self {
        QueryResponse {
            total_groups: groups.len(),
            groups,
            window,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl From<&HdrError> for ErrorResponse {
    fn from(e: &HdrError) -> Self {
        ErrorResponse {
            error: e.to_string(),
        }
    }
}

/// A validated request: what to read and how to group it.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub statement: QueryStatement,
    pub query: GroupByQuery,
    pub window: WindowEcho,
}

fn parse_time(name: &str, value: Option<&str>) -> Result<DateTime<Utc>> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            HdrError::BadRequest("start and end are required RFC3339 timestamps".to_string())
        })?;
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| HdrError::BadRequest(format!("{name} {value:?} is not RFC3339: {e}")))
}

impl QueryRequest {
    pub fn plan(&self) -> Result<QueryPlan> {
        let start = parse_time("start", self.start.as_deref())?;
        let end = parse_time("end", self.end.as_deref())?;
        if start >= end {
            return Err(HdrError::BadRequest(format!(
                "start {} must be before end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }

        let measurement = self
            .measurement
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(FIVE_MINUTE_MEASUREMENT);
        let mut statement = QueryStatement::new(measurement, start, end);
        for (tag, values) in self.filters.iter().flatten() {
            statement = statement.with_filter(tag, values.clone());
        }

        let query = GroupByQuery {
            group_by: self.group_by.as_deref().map(split_tags).unwrap_or_default(),
            percentiles: parse_percentiles(self.percentiles.as_deref().unwrap_or_default()),
            min_count: self.min_count.unwrap_or_default(),
            order_by: self
                .order_by
                .as_deref()
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string),
            order_dir: self
                .order_dir
                .as_deref()
                .map(|d| d.parse().unwrap_or_default())
                .unwrap_or(SortDirection::Desc),
            limit: self.limit.unwrap_or_default(),
        };

        Ok(QueryPlan {
            statement,
            query,
            window: WindowEcho {
                start: self.start.clone().unwrap_or_default(),
                end: self.end.clone().unwrap_or_default(),
            },
        })
    }
}
