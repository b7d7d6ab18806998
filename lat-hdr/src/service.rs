use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::aggregator::SampleAggregator;
use crate::config::{Job, JobConfig};
use crate::error::Result;
use crate::groupby::GroupByQueryEngine;
use crate::key::GroupKey;
use crate::query::{QueryRequest, QueryResponse};
use crate::record::StoredSummaryRow;
use crate::rollup::RollupMerger;
use crate::store::{QueryStatement, SummaryStore};
use crate::window::{Alignment, RollupWindow};

/// What a scheduled invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The business window has not closed yet; nothing was read.
    NotReady {
        window: RollupWindow,
        ready_at: DateTime<Utc>,
    },
    /// The window held nothing usable; nothing was written.
    NoData { window: RollupWindow },
    Wrote { window: RollupWindow, rows: usize },
}

/// Entry points for scheduled downsample/rollup runs and on-demand queries.
///
/// Every call works on its own histograms and buckets, so one `Service` can serve
/// concurrent invocations.
#[derive(Clone)]
pub struct Service<S> {
    store: S,
}

impl<S: SummaryStore> Service<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `job` and log the result instead of returning an error.
    pub async fn run_scheduled(
        &self,
        job: Job,
        call_time: DateTime<Utc>,
        args: &HashMap<String, String>,
    ) -> Option<JobOutcome> {
        let result = match job {
            Job::Downsample => self.downsample(call_time, args).await,
            Job::Rollup => self.rollup(call_time, args).await,
        };
        match result {
            Ok(outcome) => {
                match &outcome {
                    JobOutcome::NotReady { window, ready_at } => log::info!(
                        "{}: not time yet for {window}, ready at {ready_at}",
                        job.name()
                    ),
                    JobOutcome::NoData { window } => {
                        log::info!("{}: no data in {window}", job.name())
                    }
                    JobOutcome::Wrote { window, rows } => {
                        log::info!("{}: wrote {rows} buckets for {window}", job.name())
                    }
                }
                Some(outcome)
            }
            Err(e) => {
                log::error!("{} failed at {call_time}: {e}", job.name());
                None
            }
        }
    }

    /// Summarize raw samples of the configured window into per-series histograms.
    pub async fn downsample(
        &self,
        call_time: DateTime<Utc>,
        args: &HashMap<String, String>,
    ) -> Result<JobOutcome> {
        let config = JobConfig::from_args(Job::Downsample, args)?;
        let window = match config.mode.resolve(call_time)? {
            Alignment::Ready(w) => w,
            Alignment::NotReady { window, ready_at } => {
                return Ok(JobOutcome::NotReady { window, ready_at });
            }
        };

        let statement = QueryStatement::new(&config.source, window.start, window.end);
        let rows = self.store.query(&statement).await?;
        let samples = rows.iter().filter_map(|row| {
            let value = row.get(&config.value_column)?.clone();
            Some((GroupKey::from_row(row, &config.group_tags), value))
        });

        let aggregator = SampleAggregator::new(&config.target, config.histogram)
            .with_percentiles(config.percentiles.clone())
            .with_unit(&config.unit)
            .with_extra_tags(window_tags(&config, &window));
        match aggregator.aggregate(samples, window.end)? {
            Some(summaries) => self.write_all(window, summaries).await,
            None => Ok(JobOutcome::NoData { window }),
        }
    }

    /// Merge child summaries of the configured window into one parent row per series.
    pub async fn rollup(
        &self,
        call_time: DateTime<Utc>,
        args: &HashMap<String, String>,
    ) -> Result<JobOutcome> {
        let config = JobConfig::from_args(Job::Rollup, args)?;
        let window = match config.mode.resolve(call_time)? {
            Alignment::Ready(w) => w,
            Alignment::NotReady { window, ready_at } => {
                return Ok(JobOutcome::NotReady { window, ready_at });
            }
        };

        let statement = QueryStatement::new(&config.source, window.start, window.end);
        let rows = self.store.query(&statement).await?;

        let merger = RollupMerger::new(&config.target, config.histogram)
            .with_identity_tags(config.group_tags.clone())
            .with_percentiles(config.percentiles.clone())
            .with_unit(&config.unit)
            .with_extra_tags(window_tags(&config, &window));
        match merger.merge(&rows, &window)? {
            Some(summaries) => self.write_all(window, summaries).await,
            None => Ok(JobOutcome::NoData { window }),
        }
    }

    /// Answer an inbound group-by request.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let plan = request.plan()?;
        let rows = self.store.query(&plan.statement).await?;
        let groups = GroupByQueryEngine::new().execute(&rows, &plan.query);
        Ok(QueryResponse::new(groups, plan.window))
    }

    async fn write_all(
        &self,
        window: RollupWindow,
        summaries: Vec<StoredSummaryRow>,
    ) -> Result<JobOutcome> {
        // Encode all rows before the first write.
        let records = summaries
            .iter()
            .map(StoredSummaryRow::to_write_record)
            .collect::<Result<Vec<_>>>()?;
        let rows = records.len();
        for record in records {
            self.store.write(record).await?;
        }
        Ok(JobOutcome::Wrote { window, rows })
    }
}

/// Configured static tags, plus `tz`/`window` for business-hour windows.
fn window_tags(config: &JobConfig, window: &RollupWindow) -> Vec<(String, String)> {
    let mut tags = config.extra_tags.clone();
    if let Some(tz) = &window.timezone {
        tags.push(("tz".to_string(), tz.clone()));
    }
    if let Some(hours) = &window.business_hours {
        tags.push(("window".to_string(), hours.clone()));
    }
    tags
}
