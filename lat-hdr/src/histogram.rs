use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hdrhistogram::Histogram;
use hdrhistogram::serialization::{Deserializer, Serializer, V2DeflateSerializer};

use crate::error::{HdrError, Result};

/// Trackable range and precision of a latency histogram.
///
/// Two histograms can only be merged when their configurations are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistogramConfig {
    lowest: u64,
    highest: u64,
    sigfigs: u8,
}

impl HistogramConfig {
    pub const DEFAULT_LOWEST: u64 = 1;
    /// 1s in nanoseconds.
    pub const DEFAULT_HIGHEST: u64 = 1_000_000_000;
    pub const DEFAULT_SIGFIGS: u8 = 4;

    pub fn new(lowest: u64, highest: u64, sigfigs: u8) -> Result<Self> {
        if lowest < 1 {
            return Err(HdrError::Configuration(format!(
                "lowest trackable value must be >= 1, got {lowest}"
            )));
        }
        if highest <= lowest || highest < lowest.saturating_mul(2) {
            return Err(HdrError::Configuration(format!(
                "highest trackable value {highest} must be at least twice lowest {lowest}"
            )));
        }
        if sigfigs > 5 {
            return Err(HdrError::Configuration(format!(
                "significant figures must be in 0..=5, got {sigfigs}"
            )));
        }
        Ok(HistogramConfig {
            lowest,
            highest,
            sigfigs,
        })
    }

    pub fn lowest(&self) -> u64 {
        self.lowest
    }

    pub fn highest(&self) -> u64 {
        self.highest
    }

    pub fn sigfigs(&self) -> u8 {
        self.sigfigs
    }

    /// Relative error bound of any percentile answer, `10^-sigfigs`.
    pub fn relative_error(&self) -> f64 {
        10f64.powi(-(self.sigfigs as i32))
    }
}

impl Default for HistogramConfig {
    fn default() -> Self {
        HistogramConfig {
            lowest: Self::DEFAULT_LOWEST,
            highest: Self::DEFAULT_HIGHEST,
            sigfigs: Self::DEFAULT_SIGFIGS,
        }
    }
}

impl fmt::Display for HistogramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}] @ {} sigfigs",
            self.lowest, self.highest, self.sigfigs
        )
    }
}

/// One populated bucket, as reported by [`LatencyHistogram::recorded_buckets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedBucket {
    pub low: u64,
    pub high: u64,
    pub count: u64,
}

/// Bounded log-linear latency histogram.
///
/// Wraps an HDR histogram behind the small capability set the rollup and query paths
/// need: record, merge, percentile, encode and decode.
#[derive(Clone)]
pub struct LatencyHistogram {
    config: HistogramConfig,
    inner: Histogram<u64>,
    /// `(min, max)` of everything recorded; `None` while empty. Exact for recorded
    /// values, bucket-equivalent (clamped to the trackable range) after `decode`.
    extremes: Option<(u64, u64)>,
}

impl LatencyHistogram {
    pub fn new(config: HistogramConfig) -> Result<Self> {
        let inner = Histogram::new_with_bounds(config.lowest, config.highest, config.sigfigs)
            .map_err(|e| HdrError::Configuration(format!("{config}: {e:?}")))?;
        Ok(LatencyHistogram {
            config,
            inner,
            extremes: None,
        })
    }

    pub fn config(&self) -> HistogramConfig {
        self.config
    }

    /// Record one observation. Values outside the trackable range are dropped and
    /// `false` is returned.
    pub fn record(&mut self, value: u64) -> bool {
        if value < self.config.lowest || value > self.config.highest {
            return false;
        }
        if self.inner.record(value).is_err() {
            return false;
        }
        self.widen(value, value);
        true
    }

    fn widen(&mut self, min: u64, max: u64) {
        self.extremes = Some(match self.extremes {
            Some((lo, hi)) => (lo.min(min), hi.max(max)),
            None => (min, max),
        });
    }

    /// Add every count of `other` into `self`.
    pub fn merge(&mut self, other: &LatencyHistogram) -> Result<()> {
        if self.config != other.config {
            return Err(HdrError::IncompatibleHistogram {
                left: self.config,
                right: other.config,
            });
        }
        self.inner
            .add(&other.inner)
            .map_err(|_| HdrError::IncompatibleHistogram {
                left: self.config,
                right: other.config,
            })?;
        if let Some((min, max)) = other.extremes {
            self.widen(min, max);
        }
        Ok(())
    }

    /// Value at or below which `p` percent of the observations fall.
    ///
    /// `p` is clamped to `[0, 100]`; an empty histogram answers 0.
    pub fn percentile(&self, p: f64) -> u64 {
        if self.inner.is_empty() {
            return 0;
        }
        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
        self.inner.value_at_percentile(p)
    }

    pub fn total_count(&self) -> u64 {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn min(&self) -> Option<u64> {
        self.extremes.map(|(min, _)| min)
    }

    pub fn max(&self) -> Option<u64> {
        self.extremes.map(|(_, max)| max)
    }

    pub fn mean(&self) -> f64 {
        self.inner.mean()
    }

    pub fn stdev(&self) -> f64 {
        self.inner.stdev()
    }

    pub fn recorded_buckets(&self) -> Vec<RecordedBucket> {
        self.inner
            .iter_recorded()
            .map(|v| {
                let high = v.value_iterated_to();
                RecordedBucket {
                    low: self.inner.lowest_equivalent(high),
                    high,
                    count: v.count_at_value(),
                }
            })
            .collect()
    }

    /// Compressed V2 encoding. The header carries the configuration, so
    /// [`LatencyHistogram::decode`] needs nothing else.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        V2DeflateSerializer::new()
            .serialize(&self.inner, &mut buf)
            .map_err(|e| HdrError::Write(format!("histogram encode failed: {e:?}")))?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = bytes;
        let inner: Histogram<u64> = Deserializer::new()
            .deserialize(&mut reader)
            .map_err(|e| HdrError::Decode(format!("{e:?}")))?;
        let config = HistogramConfig::new(inner.low(), inner.high(), inner.sigfig())
            .map_err(|e| HdrError::Decode(e.to_string()))?;
        // Encoded bytes carry bucket counts only.
        let extremes = (!inner.is_empty()).then(|| {
            (
                inner.min().clamp(config.lowest, config.highest),
                inner.max().clamp(config.lowest, config.highest),
            )
        });
        Ok(LatencyHistogram {
            config,
            inner,
            extremes,
        })
    }

    pub fn encode_b64(&self) -> Result<String> {
        Ok(STANDARD.encode(self.encode()?))
    }

    pub fn decode_b64(text: &str) -> Result<Self> {
        let raw = STANDARD
            .decode(text.trim())
            .map_err(|e| HdrError::Decode(format!("invalid base64: {e}")))?;
        Self::decode(&raw)
    }
}

impl fmt::Debug for LatencyHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyHistogram")
            .field("config", &self.config)
            .field("total_count", &self.total_count())
            .finish()
    }
}
