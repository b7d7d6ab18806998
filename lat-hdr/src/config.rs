use std::collections::HashMap;
use std::str::FromStr;

use chrono::TimeDelta;

use crate::error::{HdrError, Result};
use crate::histogram::HistogramConfig;
use crate::percentile::{DEFAULT_PERCENTILES, parse_percentiles};
use crate::record::DEFAULT_UNIT;
use crate::rollup::DEFAULT_IDENTITY_TAGS;
use crate::window::{BusinessHours, WindowMode, parse_duration};

pub const RAW_MEASUREMENT: &str = "latency_raw";
pub const FIVE_MINUTE_MEASUREMENT: &str = "latency_5m";
pub const HOURLY_MEASUREMENT: &str = "latency_1h";
pub const DAILY_MEASUREMENT: &str = "latency_1d";

pub const DEFAULT_TIMEZONE: &str = "America/New_York";
pub const DEFAULT_WINDOW_HOURS: &str = "09:00-17:00";
const DEFAULT_DAYS_BACK: u32 = 1;
const DEFAULT_OFFSET_MINUTES: i64 = 5;

/// Which scheduled pipeline step to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Raw samples into first-level summaries.
    Downsample,
    /// Summaries into coarser summaries.
    Rollup,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::Downsample => "downsample",
            Job::Rollup => "rollup",
        }
    }
}

/// Fully resolved settings of one scheduled invocation.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub mode: WindowMode,
    pub histogram: HistogramConfig,
    pub percentiles: Vec<f64>,
    pub extra_tags: Vec<(String, String)>,
    pub source: String,
    pub target: String,
    pub group_tags: Vec<String>,
    pub value_column: String,
    pub unit: String,
}

impl JobConfig {
    /// Resolve the string-keyed invocation arguments; every key is optional.
    ///
    /// Downsample defaults to a trailing 5 minute window over `latency_raw` written to
    /// `latency_5m`. Rollup defaults to the last complete hour of `latency_5m` written
    /// to `latency_1h`, or to `latency_1d` in `business` mode.
    pub fn from_args(job: Job, args: &HashMap<String, String>) -> Result<Self> {
        let arg = |key: &str| args.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let default_width = match job {
            Job::Downsample => TimeDelta::minutes(5),
            Job::Rollup => TimeDelta::hours(1),
        };
        let width = match arg("window") {
            Some(w) => parse_duration(w)?,
            None => default_width,
        };
        let mode_name = arg("mode").unwrap_or(match job {
            Job::Downsample => "trailing",
            Job::Rollup => "aligned",
        });
        let mode = match mode_name {
            "trailing" => WindowMode::Trailing { width },
            "aligned" => WindowMode::Aligned {
                width,
                ingest_delay: match arg("ingest_delay") {
                    Some(d) => parse_duration(d)?,
                    None => TimeDelta::zero(),
                },
            },
            "business" => {
                let days_back = parse_number(arg("days_back"), "days_back", DEFAULT_DAYS_BACK)?;
                let offset = parse_number(
                    arg("offset_minutes"),
                    "offset_minutes",
                    DEFAULT_OFFSET_MINUTES,
                )?;
                let offset = TimeDelta::try_minutes(offset).ok_or_else(|| {
                    HdrError::Configuration(format!("offset_minutes {offset} out of range"))
                })?;
                WindowMode::BusinessHours(BusinessHours::parse(
                    arg("window_hours").unwrap_or(DEFAULT_WINDOW_HOURS),
                    arg("timezone").unwrap_or(DEFAULT_TIMEZONE),
                    days_back,
                    offset,
                )?)
            }
            other => {
                return Err(HdrError::Configuration(format!(
                    "unknown window mode {other:?}, expected trailing, aligned or business"
                )));
            }
        };

        let histogram = HistogramConfig::new(
            parse_number(arg("lowest"), "lowest", HistogramConfig::DEFAULT_LOWEST)?,
            parse_number(arg("highest"), "highest", HistogramConfig::DEFAULT_HIGHEST)?,
            parse_number(arg("sigfigs"), "sigfigs", HistogramConfig::DEFAULT_SIGFIGS)?,
        )?;

        let (default_source, default_target) = match (job, &mode) {
            (Job::Downsample, _) => (RAW_MEASUREMENT, FIVE_MINUTE_MEASUREMENT),
            (Job::Rollup, WindowMode::BusinessHours(_)) => {
                (FIVE_MINUTE_MEASUREMENT, DAILY_MEASUREMENT)
            }
            (Job::Rollup, _) => (FIVE_MINUTE_MEASUREMENT, HOURLY_MEASUREMENT),
        };

        Ok(JobConfig {
            mode,
            histogram,
            percentiles: arg("percentiles")
                .map(parse_percentiles)
                .unwrap_or_else(|| DEFAULT_PERCENTILES.to_vec()),
            extra_tags: arg("extra_tags").map(parse_extra_tags).unwrap_or_default(),
            source: arg("source").unwrap_or(default_source).to_string(),
            target: arg("target").unwrap_or(default_target).to_string(),
            group_tags: match arg("group_tags") {
                Some(tags) => split_tags(tags),
                None => DEFAULT_IDENTITY_TAGS.iter().map(|t| t.to_string()).collect(),
            },
            value_column: arg("value_column").unwrap_or("latency").to_string(),
            unit: arg("unit").unwrap_or(DEFAULT_UNIT).to_string(),
        })
    }
}

fn parse_number<T: FromStr>(value: Option<&str>, key: &str, default: T) -> Result<T> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| HdrError::Configuration(format!("{key} must be a number, got {v:?}"))),
        None => Ok(default),
    }
}

/// `"k=v,k2=v2"`; entries without `=` or with an empty key are ignored.
pub fn parse_extra_tags(spec: &str) -> Vec<(String, String)> {
    spec.split(',')
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// `@`-delimited tag names, blanks dropped.
pub fn split_tags(spec: &str) -> Vec<String> {
    spec.split('@')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
