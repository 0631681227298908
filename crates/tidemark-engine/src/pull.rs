//! Pull pipeline: incremental fetch, ordered apply, checkpoint advance.

use serde_json::Value;

use tidemark_core::{Checkpoint, Collection, Stamp, UserId};
use tidemark_store::LocalStore;

use crate::apply::{ApplySource, project_and_apply};
use crate::error::EngineError;
use crate::remote::RemoteBackend;
use crate::status::{EchoLedger, LaneStats};

#[derive(Clone, Debug)]
pub struct PullOutcome {
    pub fetched: usize,
    pub applied: usize,
    pub checkpoint: Checkpoint,
}

/// One pull cycle for one collection.
///
/// Rows are applied strictly ascending by `updated_at` regardless of the
/// order they arrived in, so the checkpoint always ends up at the stamp of
/// the last row actually applied, never past an unapplied row. Zero rows
/// leaves the checkpoint untouched. On failure the checkpoint covers
/// exactly the applied prefix; re-pulling those rows is a safe no-op.
pub fn run_pull(
    backend: &dyn RemoteBackend,
    store: &LocalStore,
    collection: Collection,
    user: UserId,
    stats: &LaneStats,
    echo: &EchoLedger,
) -> Result<PullOutcome, EngineError> {
    let mut checkpoint = store
        .checkpoint(collection)?
        .unwrap_or_else(Checkpoint::epoch);

    let rows = backend.pull_since(collection, &user, &checkpoint)?;
    let fetched = rows.len();
    if rows.is_empty() {
        return Ok(PullOutcome {
            fetched,
            applied: 0,
            checkpoint,
        });
    }

    let mut ordered: Vec<(Stamp, &Value)> = Vec::with_capacity(rows.len());
    for row in &rows {
        match Collection::doc_stamp(row) {
            Ok(stamp) => ordered.push((stamp, row)),
            Err(err) => {
                tracing::warn!(%collection, error = %err, "dropping pulled row without a valid stamp");
            }
        }
    }
    ordered.sort_by_key(|&(stamp, _)| stamp);

    let mut applied = 0usize;
    let mut failure: Option<EngineError> = None;
    for (_, row) in &ordered {
        match project_and_apply(store, collection, row, ApplySource::Pull, stats, echo) {
            Ok(stamp) => {
                applied += 1;
                checkpoint.advance_to(stamp);
            }
            Err(err) => {
                // The checkpoint must not advance past this row; stop the
                // cycle here and let the next one resume from the prefix.
                tracing::warn!(%collection, error = %err, "row failed to apply; checkpoint held back");
                if err.transience().is_retryable() {
                    failure = Some(err);
                }
                break;
            }
        }
    }

    if applied > 0 {
        store.set_checkpoint(collection, checkpoint)?;
    }
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(PullOutcome {
        fetched,
        applied,
        checkpoint,
    })
}
