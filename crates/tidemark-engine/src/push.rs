//! Push pipeline: drain dirty documents, batch upsert, mark clean.

use tidemark_core::{Collection, DocId, Stamp, UserId};
use tidemark_store::LocalStore;

use crate::error::EngineError;
use crate::remote::RemoteBackend;
use crate::status::{EchoLedger, LaneStats};

#[derive(Clone, Debug)]
pub struct PushOutcome {
    pub sent: usize,
    pub accepted: usize,
    /// Ids the backend silently dropped from the upsert response. They stay
    /// dirty locally; no retry is scheduled for them.
    pub rejected: Vec<DocId>,
}

impl PushOutcome {
    fn empty() -> Self {
        PushOutcome {
            sent: 0,
            accepted: 0,
            rejected: Vec::new(),
        }
    }
}

/// One push cycle for one collection.
///
/// Dirty rows are keyed by `(id, updated_at)` at drain time so a document
/// edited again mid-flight is not marked clean by the stale
/// acknowledgement. A transport failure leaves everything dirty; the next
/// cycle re-drains.
pub fn run_push(
    backend: &dyn RemoteBackend,
    store: &LocalStore,
    collection: Collection,
    user: UserId,
    limit: usize,
    stats: &LaneStats,
    echo: &EchoLedger,
) -> Result<PushOutcome, EngineError> {
    let docs = store.drain_dirty(collection, limit)?;
    if docs.is_empty() {
        return Ok(PushOutcome::empty());
    }

    let mut keyed: Vec<(DocId, Stamp)> = Vec::with_capacity(docs.len());
    for doc in &docs {
        keyed.push((Collection::doc_id(doc)?, Collection::doc_stamp(doc)?));
    }
    let wire: Vec<_> = docs.iter().map(|doc| collection.strip_internal(doc)).collect();

    echo.note_pushed(keyed.iter().map(|(id, _)| *id));
    let returned = backend.upsert(collection, &user, &wire)?;
    stats.add_sent(wire.len() as u64);

    let accepted_ids: Vec<DocId> = returned
        .iter()
        .filter_map(|row| Collection::doc_id(row).ok())
        .collect();

    let mut accepted: Vec<(DocId, Stamp)> = Vec::with_capacity(keyed.len());
    let mut rejected: Vec<DocId> = Vec::new();
    for (id, stamp) in keyed {
        if accepted_ids.contains(&id) {
            accepted.push((id, stamp));
        } else {
            rejected.push(id);
        }
    }

    if !rejected.is_empty() {
        tracing::warn!(
            %collection,
            sent = wire.len(),
            accepted = accepted.len(),
            rejected = rejected.len(),
            "upsert affected fewer rows than sent; likely ownership mismatch, rows stay pending"
        );
    }

    store.mark_clean(collection, &accepted)?;
    tracing::debug!(%collection, sent = wire.len(), accepted = accepted.len(), "push cycle complete");

    Ok(PushOutcome {
        sent: wire.len(),
        accepted: accepted.len(),
        rejected,
    })
}
