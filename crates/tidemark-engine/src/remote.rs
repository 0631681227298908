//! Remote backend seam.
//!
//! The engine never talks to the network directly; it drives a
//! `RemoteBackend` implementation. Production adapters wrap the relational
//! backend's HTTP/websocket surface; tests inject an in-memory mock.

use crossbeam::channel::Receiver;
use serde_json::Value;
use thiserror::Error;

use tidemark_core::{Checkpoint, Collection, Transience, UserId};

/// Server-push change notification for one row.
#[derive(Clone, Debug)]
pub struct FeedEvent {
    pub kind: FeedEventKind,
    /// The new row value. Only `new` is consulted; deletions surface as
    /// updates because soft deletion is a field mutation.
    pub row: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedEventKind {
    Insert,
    Update,
    Delete,
}

/// A standing subscription to one collection's change feed.
///
/// The channel closing means the feed dropped; the engine degrades to
/// poll-only until a later resubscribe succeeds.
#[derive(Debug)]
pub struct FeedSubscription {
    pub events: Receiver<FeedEvent>,
}

/// The remote relational backend, scoped to the authenticated user by
/// backend-side row policy.
pub trait RemoteBackend: Send + Sync {
    /// Rows with `updated_at > checkpoint`, ascending by `updated_at`.
    fn pull_since(
        &self,
        collection: Collection,
        user: &UserId,
        checkpoint: &Checkpoint,
    ) -> Result<Vec<Value>, TransportError>;

    /// Batch upsert keyed by id. Returns the upserted rows; a response with
    /// fewer rows than sent signals an ownership/permission mismatch for the
    /// missing ones.
    fn upsert(
        &self,
        collection: Collection,
        user: &UserId,
        rows: &[Value],
    ) -> Result<Vec<Value>, TransportError>;

    /// Open a change feed for one collection.
    fn subscribe(
        &self,
        collection: Collection,
        user: &UserId,
    ) -> Result<FeedSubscription, TransportError>;
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("backend unreachable: {reason}")]
    Unavailable { reason: String },

    #[error("request failed: {reason}")]
    Request { reason: String },

    #[error("authentication rejected: {reason}")]
    AuthRejected { reason: String },
}

impl TransportError {
    pub fn transience(&self) -> Transience {
        match self {
            TransportError::Unavailable { .. } | TransportError::Request { .. } => {
                Transience::Retryable
            }
            TransportError::AuthRejected { .. } => Transience::Permanent,
        }
    }
}
