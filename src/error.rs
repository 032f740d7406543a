use thiserror::Error;

use crate::types::Timestamp;

/// Errors raised by the scene model and the perception pipeline.
///
/// Per-entity and per-frame variants (`InvalidDetectionPayload`, `NonMonotonicTimestamp`,
/// `StageTimeout`) are normally absorbed and logged by the scene and the coordinator. Construction
/// and configuration variants (`UnknownDataset`, `UnknownLabel`, `InvalidConfig`) are fatal for a
/// run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid detection payload for `{label}`: {reason}")]
    InvalidDetectionPayload { label: String, reason: &'static str },

    #[error("timestamp {timestamp} precedes last recorded timestamp {last}")]
    NonMonotonicTimestamp { timestamp: Timestamp, last: Timestamp },

    #[error("timestamp {0} is not finite")]
    NonFiniteTimestamp(Timestamp),

    #[error("index {index} out of range for trajectory of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("trajectory replay exhausted after {len} samples")]
    ExhaustedSequence { len: usize },

    #[error("unknown dataset `{0}` (expected `ycbv` or `tless`)")]
    UnknownDataset(String),

    #[error("unknown object label `{label}` for dataset `{dataset}`")]
    UnknownLabel { label: String, dataset: String },

    #[error("invalid configuration `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("{stage} stage took {elapsed_ms:.1}ms, exceeding its {limit_ms:.1}ms budget")]
    StageTimeout {
        stage: &'static str,
        elapsed_ms: f64,
        limit_ms: f64,
    },

    #[error("malformed trajectory row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Returns whether this error indicates a misconfigured run rather than transient noise.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnknownDataset(_) | Error::UnknownLabel { .. } | Error::InvalidConfig { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
