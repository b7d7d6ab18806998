use thiserror::Error;

use crate::histogram::HistogramConfig;

#[derive(Debug, Error)]
pub enum HdrError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("incompatible histograms: {left} vs {right}")]
    IncompatibleHistogram {
        left: HistogramConfig,
        right: HistogramConfig,
    },
    #[error("unit mismatch: {expected} vs {found}")]
    UnitMismatch { expected: String, found: String },
    #[error("failed to decode histogram: {0}")]
    Decode(String),
    #[error("upstream query failed: {0}")]
    UpstreamQuery(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("bad request: {0}")]
    BadRequest(String),
}

pub type Result<T> = std::result::Result<T, HdrError>;
