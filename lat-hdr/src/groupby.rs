use std::collections::HashMap;
use std::str::FromStr;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::histogram::LatencyHistogram;
use crate::key::GroupKey;
use crate::percentile::{DEFAULT_PERCENTILES, field_name};
use crate::error::HdrError;
use crate::record::{COUNT_FIELD, DEFAULT_UNIT, FieldValue, MAX_FIELD, MIN_FIELD, Row, UNIT_FIELD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortDirection {
    type Err = std::convert::Infallible;

    /// Anything other than `asc` sorts descending.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("asc") {
            Ok(SortDirection::Asc)
        } else {
            Ok(SortDirection::Desc)
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupByQuery {
    /// Grouping tags in output order. Empty merges everything into one group.
    pub group_by: Vec<String>,
    pub percentiles: Vec<f64>,
    pub min_count: u64,
    pub order_by: Option<String>,
    pub order_dir: SortDirection,
    /// 0 means unlimited.
    pub limit: usize,
}

impl Default for GroupByQuery {
    fn default() -> Self {
        GroupByQuery {
            group_by: Vec::new(),
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            min_count: 0,
            order_by: None,
            order_dir: SortDirection::Desc,
            limit: 0,
        }
    }
}

/// One output group of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    pub unit: String,
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub tags: Vec<(String, String)>,
    pub percentiles: Vec<(f64, u64)>,
}

impl GroupRow {
    pub fn percentile(&self, p: f64) -> Option<u64> {
        self.percentiles
            .iter()
            .find(|(q, _)| *q == p)
            .map(|(_, v)| *v)
    }

    /// Value of a named field for ordering; unknown fields sort as 0.
    pub fn sort_value(&self, field: &str) -> f64 {
        match field {
            COUNT_FIELD => self.count as f64,
            MIN_FIELD => self.min,
            MAX_FIELD => self.max,
            _ => self
                .percentiles
                .iter()
                .find(|(p, _)| field_name(*p) == field)
                .map_or(0.0, |(_, v)| *v as f64),
        }
    }
}

struct OrderedTags<'a>(&'a [(String, String)]);

impl Serialize for OrderedTags<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl Serialize for GroupRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(5 + self.percentiles.len()))?;
        map.serialize_entry("unit", &self.unit)?;
        map.serialize_entry("count", &self.count)?;
        map.serialize_entry("min", &self.min)?;
        map.serialize_entry("max", &self.max)?;
        map.serialize_entry("tags", &OrderedTags(&self.tags))?;
        for (p, v) in &self.percentiles {
            map.serialize_entry(&field_name(*p), v)?;
        }
        map.end()
    }
}

struct Bucket {
    key: GroupKey,
    histogram: Option<LatencyHistogram>,
    unit: Option<String>,
    min: Option<f64>,
    max: Option<f64>,
    count: u64,
}

impl Bucket {
    fn new(key: GroupKey) -> Self {
        Bucket {
            key,
            histogram: None,
            unit: None,
            min: None,
            max: None,
            count: 0,
        }
    }

    /// The first histogram fixes the bucket's configuration, the first stated unit
    /// its unit.
    fn absorb(&mut self, row: &Row, h: LatencyHistogram) -> crate::Result<()> {
        let unit = row
            .get(UNIT_FIELD)
            .and_then(FieldValue::as_str)
            .map(str::trim)
            .filter(|u| !u.is_empty());
        if let (Some(expected), Some(found)) = (&self.unit, unit) {
            if expected != found {
                return Err(HdrError::UnitMismatch {
                    expected: expected.clone(),
                    found: found.to_string(),
                });
            }
        }
        match &mut self.histogram {
            Some(merged) => merged.merge(&h)?,
            None => self.histogram = Some(h),
        }
        if self.unit.is_none() {
            self.unit = unit.map(str::to_string);
        }
        if let Some(v) = row.f64(MIN_FIELD) {
            self.min = Some(self.min.map_or(v, |m| m.min(v)));
        }
        if let Some(v) = row.f64(MAX_FIELD) {
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
        }
        self.count += row.u64(COUNT_FIELD).unwrap_or_default();
        Ok(())
    }
}

/// Per-query bucket registry, kept in first-seen order.
#[derive(Default)]
struct Buckets {
    index: HashMap<GroupKey, usize>,
    slots: Vec<Bucket>,
}

impl Buckets {
    fn entry(&mut self, key: GroupKey) -> &mut Bucket {
        let slot = match self.index.get(&key) {
            Some(i) => *i,
            None => {
                self.slots.push(Bucket::new(key.clone()));
                self.index.insert(key, self.slots.len() - 1);
                self.slots.len() - 1
            }
        };
        &mut self.slots[slot]
    }
}

/// Merges stored summary rows into caller-chosen groups and reports percentiles.
pub struct GroupByQueryEngine {
    unit: String,
}

impl GroupByQueryEngine {
    pub fn new() -> Self {
        GroupByQueryEngine {
            unit: DEFAULT_UNIT.to_string(),
        }
    }

    /// Unit reported for groups whose rows state none.
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = unit.to_string();
        self
    }

    pub fn execute(&self, rows: &[Row], query: &GroupByQuery) -> Vec<GroupRow> {
        let mut buckets = Buckets::default();
        let mut skipped = 0usize;

        for row in rows {
            let h = match row.histogram() {
                Some(Ok(h)) => h,
                Some(Err(e)) => {
                    log::warn!("group-by: skipping undecodable row: {e}");
                    skipped += 1;
                    continue;
                }
                None => continue,
            };
            let key = GroupKey::from_row(row, &query.group_by);
            if let Err(e) = buckets.entry(key).absorb(row, h) {
                log::warn!("group-by: skipping row: {e}");
                skipped += 1;
            }
        }
        if skipped > 0 {
            log::info!("group-by: {skipped} of {} rows skipped", rows.len());
        }

        let mut out: Vec<GroupRow> = buckets
            .slots
            .into_iter()
            .filter_map(|b| {
                let h = b.histogram.filter(|h| !h.is_empty())?;
                if b.count < query.min_count {
                    return None;
                }
                Some(GroupRow {
                    unit: b.unit.unwrap_or_else(|| self.unit.clone()),
                    count: b.count,
                    min: b.min.unwrap_or(h.min().unwrap_or_default() as f64),
                    max: b.max.unwrap_or(h.max().unwrap_or_default() as f64),
                    tags: b.key.pairs().to_vec(),
                    percentiles: query
                        .percentiles
                        .iter()
                        .map(|p| (*p, h.percentile(*p)))
                        .collect(),
                })
            })
            .collect();

        // Stable sort: ties, and every row for an unknown field, keep first-seen order.
        if let Some(field) = &query.order_by {
            out.sort_by(|a, b| {
                let (x, y) = (a.sort_value(field), b.sort_value(field));
                match query.order_dir {
                    SortDirection::Asc => x.total_cmp(&y),
                    SortDirection::Desc => y.total_cmp(&x),
                }
            });
        }
        if query.limit > 0 {
            out.truncate(query.limit);
        }
        out
    }
}

impl Default for GroupByQueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::HistogramConfig;
    use crate::record::HISTOGRAM_FIELD;

    fn summary_row(tags: &[(&str, &str)], values: impl IntoIterator<Item = u64>) -> Row {
        let mut h = LatencyHistogram::new(HistogramConfig::default()).unwrap();
        for v in values {
            h.record(v);
        }
        let mut row = Row::new()
            .with(MIN_FIELD, h.min().unwrap_or_default() as f64)
            .with(MAX_FIELD, h.max().unwrap_or_default() as f64)
            .with(COUNT_FIELD, h.total_count())
            .with(HISTOGRAM_FIELD, h.encode_b64().unwrap());
        for (k, v) in tags {
            row.insert(k, *v);
        }
        row
    }

    fn query(group_by: &[&str]) -> GroupByQuery {
        GroupByQuery {
            group_by: group_by.iter().map(|s| s.to_string()).collect(),
            ..GroupByQuery::default()
        }
    }

    /// Five components whose p99 is 100 * (i + 1) and count is i + 1.
    fn five_groups() -> Vec<Row> {
        let order = [3u64, 1, 4, 0, 2];
        order
            .iter()
            .map(|i| {
                let name = format!("c{i}");
                summary_row(
                    &[("component", name.as_str())],
                    std::iter::repeat_n(100 * (i + 1), (*i + 1) as usize),
                )
            })
            .collect()
    }

    #[test]
    fn empty_grouping_merges_everything() {
        let rows = vec![
            summary_row(&[("component", "a")], [10, 20]),
            summary_row(&[("component", "b")], [30]),
        ];
        let out = GroupByQueryEngine::new().execute(&rows, &query(&[]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].count, 3);
        assert!(out[0].tags.is_empty());
        assert_eq!(out[0].min, 10.0);
        assert_eq!(out[0].max, 30.0);
    }

    #[test]
    fn grouping_order_is_preserved() {
        let rows = vec![summary_row(&[("a", "1"), ("b", "2")], [5])];
        let engine = GroupByQueryEngine::new();
        let ab = engine.execute(&rows, &query(&["a", "b"]));
        let ba = engine.execute(&rows, &query(&["b", "a"]));
        let pair = |k: &str, v: &str| (k.to_string(), v.to_string());
        assert_eq!(ab[0].tags, vec![pair("a", "1"), pair("b", "2")]);
        assert_eq!(ba[0].tags, vec![pair("b", "2"), pair("a", "1")]);

        let json = serde_json::to_string(&ba[0]).unwrap();
        assert!(json.contains(r#""tags":{"b":"2","a":"1"}"#), "{json}");
    }

    #[test]
    fn min_count_threshold() {
        let rows = vec![
            summary_row(&[("component", "small")], std::iter::repeat_n(7, 5)),
            summary_row(&[("component", "exact")], std::iter::repeat_n(7, 10)),
        ];
        let q = GroupByQuery {
            min_count: 10,
            ..query(&["component"])
        };
        let out = GroupByQueryEngine::new().execute(&rows, &q);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tags[0].1, "exact");
        assert_eq!(out[0].count, 10);
    }

    #[test]
    fn order_by_percentile() {
        let engine = GroupByQueryEngine::new();
        let rows = five_groups();

        let asc = GroupByQuery {
            order_by: Some("p99".into()),
            order_dir: "asc".parse().unwrap(),
            ..query(&["component"])
        };
        let p99: Vec<u64> = engine
            .execute(&rows, &asc)
            .iter()
            .map(|g| g.percentile(99.0).unwrap())
            .collect();
        assert_eq!(p99, vec![100, 200, 300, 400, 500]);

        let desc = GroupByQuery {
            order_by: Some("p99".into()),
            ..query(&["component"])
        };
        let p99: Vec<u64> = engine
            .execute(&rows, &desc)
            .iter()
            .map(|g| g.percentile(99.0).unwrap())
            .collect();
        assert_eq!(p99, vec![500, 400, 300, 200, 100]);
    }

    #[test]
    fn unknown_order_field_keeps_emission_order() {
        let q = GroupByQuery {
            order_by: Some("p42".into()),
            ..query(&["component"])
        };
        let out = GroupByQueryEngine::new().execute(&five_groups(), &q);
        let names: Vec<&str> = out.iter().map(|g| g.tags[0].1.as_str()).collect();
        assert_eq!(names, vec!["c3", "c1", "c4", "c0", "c2"]);
    }

    #[test]
    fn limit_applies_after_sort() {
        let q = GroupByQuery {
            order_by: Some("count".into()),
            limit: 2,
            ..query(&["component"])
        };
        let out = GroupByQueryEngine::new().execute(&five_groups(), &q);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].count, 5);
        assert_eq!(out[1].count, 4);
    }

    #[test]
    fn bad_rows_are_isolated() {
        let mut corrupt = Row::new().with("component", "api").with(COUNT_FIELD, 1000u64);
        corrupt.insert(HISTOGRAM_FIELD, "AAAA");
        let rows = vec![
            corrupt,
            Row::new().with("component", "api"),
            summary_row(&[("component", "api")], [1, 2, 3]),
        ];
        let out = GroupByQueryEngine::new().execute(&rows, &query(&["component"]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].count, 3);
    }

    #[test]
    fn unit_comes_from_the_rows() {
        let rows = vec![
            summary_row(&[("component", "api")], [100]).with(UNIT_FIELD, "us"),
            summary_row(&[("component", "api")], [200]).with(UNIT_FIELD, "us"),
            summary_row(&[("component", "api")], [300]).with(UNIT_FIELD, "ms"),
            summary_row(&[("component", "db")], [400]),
        ];
        let out = GroupByQueryEngine::new()
            .with_unit("ticks")
            .execute(&rows, &query(&["component"]));
        assert_eq!(out[0].unit, "us");
        assert_eq!(out[0].count, 2);
        assert_eq!(out[0].max, 200.0);
        assert_eq!(out[1].unit, "ticks");
    }

    #[test]
    fn no_rows_is_an_empty_result() {
        assert!(GroupByQueryEngine::new().execute(&[], &query(&["component"])).is_empty());
    }

    #[test]
    fn serialized_shape() {
        let rows = vec![summary_row(&[("component", "api")], [100, 200])];
        let q = GroupByQuery {
            percentiles: vec![50.0, 99.9],
            ..query(&["component"])
        };
        let out = GroupByQueryEngine::new().execute(&rows, &q);
        let v = serde_json::to_value(&out[0]).unwrap();
        assert_eq!(v["unit"], "ns");
        assert_eq!(v["count"], 2);
        assert_eq!(v["tags"]["component"], "api");
        assert!(v.get("p50").is_some());
        assert!(v.get("p99_9").is_some());
    }
}
