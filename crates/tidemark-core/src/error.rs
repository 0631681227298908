//! Core capability errors (parsing and document validation).
//!
//! These are bounded and stable: core errors represent domain/refusal
//! states, not library implementation details.

use thiserror::Error;

use crate::collection::Collection;

/// Whether retrying an operation may succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transience {
    Retryable,
    Permanent,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Canonical error enum for the core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error("document in `{collection}` is invalid: {reason}")]
    InvalidDocument {
        collection: Collection,
        reason: String,
    },

    #[error("document id `{raw}` is invalid: {reason}")]
    InvalidId { raw: String, reason: String },

    #[error("timestamp `{raw}` is invalid: {reason}")]
    InvalidStamp { raw: String, reason: String },
}

impl CoreError {
    /// Core errors are pure domain/input failures; retrying never helps.
    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }
}
