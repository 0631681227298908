//! The single apply path for remote documents.
//!
//! Both the pull pipeline and the realtime feed publish into this one merge
//! point: project the row through the collection allow-list, upsert into the
//! local store (idempotent), bump the received counter, annotate the echo
//! classification. Two sources, one code path.

use std::fmt;

use serde_json::Value;

use tidemark_core::{Collection, Stamp};
use tidemark_store::LocalStore;

use crate::error::EngineError;
use crate::status::{Echo, EchoLedger, LaneStats};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplySource {
    Pull,
    Feed,
}

impl fmt::Display for ApplySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplySource::Pull => f.write_str("pull"),
            ApplySource::Feed => f.write_str("feed"),
        }
    }
}

/// Project a remote row and apply it to the local store.
///
/// Returns the applied document's stamp so the caller can advance its
/// checkpoint. The echo classification is logged and nothing more: a
/// loop-back of our own push goes through the same store upsert as a
/// genuine remote change, and the store's stamp comparison decides whether
/// it lands.
pub(crate) fn project_and_apply(
    store: &LocalStore,
    collection: Collection,
    row: &Value,
    source: ApplySource,
    stats: &LaneStats,
    echo: &EchoLedger,
) -> Result<Stamp, EngineError> {
    let doc = collection.project_row(row)?;
    let id = Collection::doc_id(&doc)?;
    let stamp = Collection::doc_stamp(&doc)?;

    let changed = store.apply_remote(collection, &doc)?;
    stats.add_received(1);

    let likely_echo = matches!(echo.classify(id), Echo::LikelyLocal);
    tracing::debug!(
        %collection,
        %id,
        %source,
        changed,
        echo = likely_echo,
        "applied remote document"
    );
    Ok(stamp)
}
