use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::histogram::{HistogramConfig, LatencyHistogram};
use crate::key::GroupKey;
use crate::percentile::DEFAULT_PERCENTILES;
use crate::record::{DEFAULT_UNIT, FieldValue, StoredSummaryRow};

/// Turns raw per-event samples of one window into one summary row per series.
pub struct SampleAggregator {
    measurement: String,
    config: HistogramConfig,
    percentiles: Vec<f64>,
    unit: String,
    extra_tags: Vec<(String, String)>,
}

impl SampleAggregator {
    pub fn new(measurement: &str, config: HistogramConfig) -> Self {
        SampleAggregator {
            measurement: measurement.to_string(),
            config,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            unit: DEFAULT_UNIT.to_string(),
            extra_tags: Vec::new(),
        }
    }

    pub fn with_percentiles(mut self, percentiles: Vec<f64>) -> Self {
        self.percentiles = percentiles;
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = unit.to_string();
        self
    }

    /// Static tags attached to every emitted row.
    pub fn with_extra_tags(mut self, tags: Vec<(String, String)>) -> Self {
        self.extra_tags = tags;
        self
    }

    /// Summarize `samples`, stamping each row with `window_end`.
    ///
    /// Negative, non-numeric and out-of-range samples are skipped. Returns `None` when
    /// not a single sample was recorded.
    pub fn aggregate<I>(
        &self,
        samples: I,
        window_end: DateTime<Utc>,
    ) -> Result<Option<Vec<StoredSummaryRow>>>
    where
        I: IntoIterator<Item = (GroupKey, FieldValue)>,
    {
        let mut index: HashMap<GroupKey, usize> = HashMap::new();
        let mut series: Vec<(GroupKey, LatencyHistogram)> = Vec::new();
        let mut skipped = 0usize;

        for (key, raw) in samples {
            let Some(value) = raw.as_u64() else {
                skipped += 1;
                continue;
            };
            let slot = match index.get(&key) {
                Some(i) => *i,
                None => {
                    series.push((key.clone(), LatencyHistogram::new(self.config)?));
                    index.insert(key, series.len() - 1);
                    series.len() - 1
                }
            };
            if !series[slot].1.record(value) {
                skipped += 1;
            }
        }

        if skipped > 0 {
            log::debug!("{}: skipped {skipped} invalid samples", self.measurement);
        }

        let rows: Vec<StoredSummaryRow> = series
            .into_iter()
            .filter(|(_, h)| !h.is_empty())
            .map(|(key, h)| {
                let mut tags = key.to_tag_map();
                for (k, v) in &self.extra_tags {
                    tags.insert(k.clone(), v.clone());
                }
                StoredSummaryRow::from_histogram(
                    &self.measurement,
                    tags,
                    h,
                    &self.percentiles,
                    &self.unit,
                    window_end,
                )
            })
            .collect();

        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(component: &str) -> GroupKey {
        GroupKey::from_iter([("component", component), ("session", "s1")])
    }

    fn end() -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_100, 0).unwrap()
    }

    #[test]
    fn one_row_per_key_in_first_seen_order() {
        let agg = SampleAggregator::new("latency_5m", HistogramConfig::default())
            .with_extra_tags(vec![("env".to_string(), "prod".to_string())]);
        let samples = vec![
            (key("api"), FieldValue::Int(200)),
            (key("ingest"), FieldValue::Int(100)),
            (key("api"), FieldValue::Float(300.7)),
            (key("api"), FieldValue::from("400")),
        ];
        let rows = agg.aggregate(samples, end()).unwrap().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tags["component"], "api");
        assert_eq!(rows[0].tags["env"], "prod");
        assert_eq!(rows[0].count, 3);
        assert_eq!(rows[0].min, 200.0);
        assert_eq!(rows[0].max, 400.0);
        assert_eq!(rows[0].timestamp, end());
        assert_eq!(rows[0].percentiles.len(), DEFAULT_PERCENTILES.len());
        assert_eq!(rows[1].tags["component"], "ingest");
        assert_eq!(rows[1].count, 1);
        assert_eq!(rows[1].unit, "ns");
    }

    #[test]
    fn invalid_samples_are_skipped() {
        let agg = SampleAggregator::new("latency_5m", HistogramConfig::default());
        let samples = vec![
            (key("api"), FieldValue::Int(-5)),
            (key("api"), FieldValue::from("n/a")),
            (key("api"), FieldValue::Int(0)),
            (key("api"), FieldValue::UInt(5_000_000_000)),
            (key("api"), FieldValue::Int(42)),
        ];
        let rows = agg.aggregate(samples, end()).unwrap().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, 1);
    }

    #[test]
    fn no_valid_samples_means_no_data() {
        let agg = SampleAggregator::new("latency_5m", HistogramConfig::default());
        let samples = vec![
            (key("api"), FieldValue::Int(-1)),
            (key("ingest"), FieldValue::from("")),
        ];
        assert!(agg.aggregate(samples, end()).unwrap().is_none());
        assert!(agg.aggregate(Vec::new(), end()).unwrap().is_none());
    }
}
