use std::collections::HashMap;

use crate::error::Result;
use crate::histogram::{HistogramConfig, LatencyHistogram};
use crate::key::GroupKey;
use crate::percentile::DEFAULT_PERCENTILES;
use crate::record::{COUNT_FIELD, DEFAULT_UNIT, MAX_FIELD, MIN_FIELD, Row, StoredSummaryRow};
use crate::window::RollupWindow;

pub const DEFAULT_IDENTITY_TAGS: [&str; 2] = ["component", "session"];

struct Series {
    key: GroupKey,
    histogram: LatencyHistogram,
    min: Option<f64>,
    max: Option<f64>,
    count: u64,
}

/// Merges child-period summaries into parent-period summaries, one per series.
///
/// Percentiles of the parent are always recomputed from the merged histogram.
pub struct RollupMerger {
    measurement: String,
    identity_tags: Vec<String>,
    config: HistogramConfig,
    percentiles: Vec<f64>,
    unit: String,
    extra_tags: Vec<(String, String)>,
}

impl RollupMerger {
    pub fn new(measurement: &str, config: HistogramConfig) -> Self {
        RollupMerger {
            measurement: measurement.to_string(),
            identity_tags: DEFAULT_IDENTITY_TAGS.iter().map(|t| t.to_string()).collect(),
            config,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
            unit: DEFAULT_UNIT.to_string(),
            extra_tags: Vec::new(),
        }
    }

    pub fn with_identity_tags(mut self, tags: Vec<String>) -> Self {
        self.identity_tags = tags;
        self
    }

    pub fn with_percentiles(mut self, percentiles: Vec<f64>) -> Self {
        self.percentiles = percentiles;
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = unit.to_string();
        self
    }

    pub fn with_extra_tags(mut self, tags: Vec<(String, String)>) -> Self {
        self.extra_tags = tags;
        self
    }

    /// Merge `rows`, all of which belong to `window`, into one row per series.
    ///
    /// Children without a decodable histogram of the configured shape are skipped and
    /// contribute nothing. Returns `None` when nothing could be merged.
    pub fn merge(
        &self,
        rows: &[Row],
        window: &RollupWindow,
    ) -> Result<Option<Vec<StoredSummaryRow>>> {
        if rows.is_empty() {
            log::info!("{}: no rows to roll up in {window}", self.measurement);
            return Ok(None);
        }

        let mut index: HashMap<GroupKey, usize> = HashMap::new();
        let mut series: Vec<Series> = Vec::new();

        for row in rows {
            let child = match row.histogram() {
                Some(Ok(h)) => h,
                Some(Err(e)) => {
                    log::warn!("{}: skipping child row: {e}", self.measurement);
                    continue;
                }
                None => continue,
            };

            let key = GroupKey::from_row(row, &self.identity_tags);
            let slot = match index.get(&key) {
                Some(i) => *i,
                None => {
                    series.push(Series {
                        key: key.clone(),
                        histogram: LatencyHistogram::new(self.config)?,
                        min: None,
                        max: None,
                        count: 0,
                    });
                    index.insert(key, series.len() - 1);
                    series.len() - 1
                }
            };
            let s = &mut series[slot];

            if let Err(e) = s.histogram.merge(&child) {
                log::warn!("{}: skipping child row: {e}", self.measurement);
                continue;
            }

            let child_min = row.f64(MIN_FIELD).or(child.min().map(|v| v as f64));
            let child_max = row.f64(MAX_FIELD).or(child.max().map(|v| v as f64));
            if let Some(v) = child_min {
                s.min = Some(s.min.map_or(v, |m| m.min(v)));
            }
            if let Some(v) = child_max {
                s.max = Some(s.max.map_or(v, |m| m.max(v)));
            }
            s.count += row.u64(COUNT_FIELD).unwrap_or(child.total_count());
        }

        let out: Vec<StoredSummaryRow> = series
            .into_iter()
            .filter(|s| !s.histogram.is_empty())
            .map(|s| {
                let mut tags = s.key.to_tag_map();
                for (k, v) in &self.extra_tags {
                    tags.insert(k.clone(), v.clone());
                }
                let mut summary = StoredSummaryRow::from_histogram(
                    &self.measurement,
                    tags,
                    s.histogram,
                    &self.percentiles,
                    &self.unit,
                    window.end,
                );
                if let Some(v) = s.min {
                    summary.min = v;
                }
                if let Some(v) = s.max {
                    summary.max = v;
                }
                summary.count = s.count;
                summary
            })
            .collect();

        if out.is_empty() {
            log::info!("{}: nothing mergeable in {window}", self.measurement);
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }
}
