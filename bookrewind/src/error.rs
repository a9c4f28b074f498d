use crate::{Side, dataset::Inconsistency};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `bookrewind`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum BookRewindError {
    #[error("replay: {0}")]
    Replay(#[from] ReplayError),

    #[error("dataset: {0}")]
    Dataset(#[from] DatasetError),
}

/// Errors generated when moving a [`BookState`](crate::book::BookState) to a target nonce.
///
/// None of them leave the book partially mutated: a failed request is rejected before the first
/// delta is applied.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum ReplayError {
    #[error("nonce {nonce} not found in the delta log")]
    NonceNotFound { nonce: u64 },

    #[error("nonce {nonce} outside of the recorded range [{min}, {max}]")]
    OutOfRange { nonce: u64, min: u64, max: u64 },

    #[error("replay already in progress, request rejected")]
    Busy,
}

impl ReplayError {
    /// Determine if the error is the expected rejection of a re-entrant replay request.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_busy(&self) -> bool {
        match self {
            ReplayError::Busy => true,
            _ => false,
        }
    }
}

/// Errors generated when loading a recorded [`Dataset`](crate::dataset::Dataset).
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum DatasetError {
    #[error("dataset contains no snapshots")]
    SnapshotsEmpty,

    #[error("delta nonce {next} does not follow on from the previous delta nonce {prev}")]
    NonceNotIncreasing { prev: u64, next: u64 },

    #[error("snapshot {nonce} holds non-positive quantity {quantity} at {side} {price}")]
    InvalidSnapshot {
        nonce: u64,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    },

    #[error("{0}")]
    Inconsistent(#[from] Inconsistency),

    #[error("JSON: {0}")]
    Json(String),

    #[error("IO: {0}")]
    Io(String),
}

impl From<serde_json::Error> for DatasetError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value.to_string())
    }
}

impl From<std::io::Error> for DatasetError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}
