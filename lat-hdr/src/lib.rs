//! Latency summaries built on HDR histograms.
//!
//! Raw samples are folded into per-series histograms ([`SampleAggregator`]), coarser
//! periods are produced by merging those ([`RollupMerger`]) over windows computed by
//! [`WindowMode`], and stored summaries can be regrouped on demand
//! ([`GroupByQueryEngine`]).

mod aggregator;
mod config;
mod dynamo;
mod error;
mod groupby;
mod histogram;
mod key;
mod percentile;
mod query;
mod record;
mod rollup;
mod service;
mod store;
mod window;

pub use aggregator::SampleAggregator;
pub use config::{
    DAILY_MEASUREMENT, FIVE_MINUTE_MEASUREMENT, HOURLY_MEASUREMENT, Job, JobConfig,
    RAW_MEASUREMENT, parse_extra_tags, split_tags,
};
pub use dynamo::{DEFAULT_TABLE_NAME, DynamoStore};
pub use error::{HdrError, Result};
pub use groupby::{GroupByQuery, GroupByQueryEngine, GroupRow, SortDirection};
pub use histogram::{HistogramConfig, LatencyHistogram, RecordedBucket};
pub use key::GroupKey;
pub use percentile::{DEFAULT_PERCENTILES, field_name, parse_percentiles};
pub use query::{ErrorResponse, QueryPlan, QueryRequest, QueryResponse, WindowEcho};
pub use record::{
    COUNT_FIELD, DEFAULT_UNIT, FieldValue, HISTOGRAM_FIELD, MAX_FIELD, MIN_FIELD, Row,
    StoredSummaryRow, TIME_COLUMN, UNIT_FIELD, WriteRecord,
};
pub use rollup::{DEFAULT_IDENTITY_TAGS, RollupMerger};
pub use service::{JobOutcome, Service};
pub use store::{MemoryStore, QueryStatement, SummaryStore};
pub use window::{Alignment, BusinessHours, RollupWindow, WindowMode, parse_duration};
