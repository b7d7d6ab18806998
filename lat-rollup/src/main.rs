use std::collections::HashMap;
use std::io::{self, Write};

use anyhow::{Context as _, anyhow, bail};
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use lat_hdr::{
    DEFAULT_TABLE_NAME, DynamoStore, Job, LatencyHistogram, MemoryStore, Service, SummaryStore,
};
use log::info;

#[derive(Parser, Debug)]
#[command(name = "lat-rollup", about = "Scheduled latency histogram downsampling and rollups")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize raw samples into per-series histograms.
    Downsample(JobArgs),
    /// Merge stored summaries into a coarser period.
    Rollup(JobArgs),
    /// Dump a base64 encoded histogram.
    Inspect {
        histogram: String,
    },
}

#[derive(Args, Debug)]
struct JobArgs {
    /// Invocation argument, e.g. `--arg mode=business --arg days_back=0`.
    #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    args: Vec<(String, String)>,
    /// Call time (RFC3339); defaults to now.
    #[arg(long)]
    at: Option<DateTime<Utc>>,
    #[arg(long, value_enum, default_value_t = StoreKind::Dynamodb)]
    store: StoreKind,
    #[arg(long, env = "LAT_TABLE", default_value = DEFAULT_TABLE_NAME)]
    table: String,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StoreKind {
    /// Empty in-process store; nothing is persisted.
    Memory,
    Dynamodb,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))?;
    let k = k.trim();
    if k.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((k.to_string(), v.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let (job, opts) = match Cli::parse().command {
        Command::Downsample(opts) => (Job::Downsample, opts),
        Command::Rollup(opts) => (Job::Rollup, opts),
        Command::Inspect { histogram } => {
            let h = LatencyHistogram::decode_b64(&histogram).context("decode histogram")?;
            return dump(&h, &mut io::stdout().lock()).context("write dump");
        }
    };

    let call_time = opts.at.unwrap_or_else(Utc::now);
    let args: HashMap<String, String> = opts.args.into_iter().collect();
    match opts.store {
        StoreKind::Memory => {
            let store = MemoryStore::new();
            run(Service::new(store.clone()), job, call_time, &args).await?;
            info!("memory store holds {} records", store.len());
        }
        StoreKind::Dynamodb => {
            let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
            let config = aws_config::from_env().region(region_provider).load().await;
            let client = Client::new(&config);
            run(Service::new(DynamoStore::new(client, opts.table)), job, call_time, &args).await?;
        }
    }

    Ok(())
}

async fn run<S: SummaryStore>(
    svc: Service<S>,
    job: Job,
    call_time: DateTime<Utc>,
    args: &HashMap<String, String>,
) -> anyhow::Result<()> {
    match svc.run_scheduled(job, call_time, args).await {
        Some(_) => Ok(()),
        None => Err(anyhow!("{} failed at {call_time}", job.name())),
    }
}

fn dump(h: &LatencyHistogram, out: &mut impl Write) -> anyhow::Result<()> {
    let config = h.config();
    writeln!(out, "=== Histogram ===")?;
    writeln!(out, "lowest trackable : {}", config.lowest())?;
    writeln!(out, "highest trackable: {}", config.highest())?;
    writeln!(out, "significant figs : {}", config.sigfigs())?;
    writeln!(out, "total count      : {}", h.total_count())?;
    writeln!(out, "mean             : {:.2}", h.mean())?;
    writeln!(out, "stdev            : {:.2}", h.stdev())?;
    match (h.min(), h.max()) {
        (Some(min), Some(max)) => {
            writeln!(out, "min              : {min}")?;
            writeln!(out, "max              : {max}")?;
        }
        _ => bail!("histogram is empty"),
    }

    writeln!(out, "\n=== Percentiles ===")?;
    for p in 0..=100u32 {
        writeln!(out, "p{p:>3}: {}", h.percentile(f64::from(p)))?;
    }

    writeln!(out, "\n=== Recorded buckets ===")?;
    writeln!(out, "{:>12} {:>12} {:>12} {:>12}", "low", "high", "count", "% of total")?;
    let total = h.total_count() as f64;
    for b in h.recorded_buckets() {
        let pct = b.count as f64 / total * 100.0;
        writeln!(out, "{:>12} {:>12} {:>12} {:>11.4}%", b.low, b.high, b.count, pct)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lat_hdr::HistogramConfig;

    #[test]
    fn job_args() {
        let cli = Cli::try_parse_from([
            "lat-rollup",
            "rollup",
            "--arg",
            "mode=business",
            "--arg",
            "extra_tags=env=prod,region=us",
            "--at",
            "2025-10-17T21:10:00Z",
            "--store",
            "memory",
        ])
        .unwrap();
        let Command::Rollup(opts) = cli.command else {
            panic!("expected rollup");
        };
        assert_eq!(opts.store, StoreKind::Memory);
        assert_eq!(opts.at.unwrap().to_rfc3339(), "2025-10-17T21:10:00+00:00");
        assert_eq!(opts.args[1], ("extra_tags".to_string(), "env=prod,region=us".to_string()));

        assert!(Cli::try_parse_from(["lat-rollup", "downsample", "--arg", "novalue"]).is_err());
    }

    #[test]
    fn dump_lists_percentiles_and_buckets() {
        let mut h = LatencyHistogram::new(HistogramConfig::default()).unwrap();
        for v in [10, 10, 20, 30] {
            h.record(v);
        }
        let mut out = Vec::new();
        dump(&h, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("total count      : 4"));
        assert!(text.contains("p 50: 10"));
        assert!(text.contains("p100: 30"));
        assert!(text.contains("50.0000%"));

        let empty = LatencyHistogram::new(HistogramConfig::default()).unwrap();
        assert!(dump(&empty, &mut Vec::new()).is_err());
    }

    #[tokio::test]
    async fn memory_run_without_data_succeeds() {
        let at = "2025-10-16T12:00:30Z".parse().unwrap();
        run(Service::new(MemoryStore::new()), Job::Rollup, at, &HashMap::new())
            .await
            .unwrap();
        let bad = HashMap::from([("mode".to_string(), "sliding".to_string())]);
        assert!(run(Service::new(MemoryStore::new()), Job::Downsample, at, &bad).await.is_err());
    }
}
