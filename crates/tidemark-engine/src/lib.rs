//! Replication engine: keeps a [`tidemark_store::LocalStore`] in sync with
//! a remote relational backend.
//!
//! Per collection, a lane thread runs a checkpointed pull pipeline and a
//! debounced push pipeline over a [`remote::RemoteBackend`], with an
//! optional realtime feed shortening latency. A leader lease gates all
//! remote I/O to one execution context per user; [`status::SyncStatus`]
//! aggregates liveness for UIs.

#![forbid(unsafe_code)]

mod apply;
mod feed;
mod lane;
mod scheduler;

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod leadership;
pub mod pull;
pub mod push;
pub mod remote;
pub mod status;
pub mod telemetry;
pub mod test_utils;

pub use config::EngineConfig;
pub use coordinator::{LaneSnapshot, ReplicationCoordinator};
pub use engine::Engine;
pub use error::EngineError;
pub use leadership::LeadershipMonitor;
pub use pull::{PullOutcome, run_pull};
pub use push::{PushOutcome, run_push};
pub use remote::{FeedEvent, FeedEventKind, FeedSubscription, RemoteBackend, TransportError};
pub use status::{Echo, EchoLedger, SyncStats, SyncStatus};
