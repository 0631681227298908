//! In-memory backend and polling helpers for integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam::channel::{Sender, unbounded};
use serde_json::Value;

use tidemark_core::{Checkpoint, Collection, DocId, UserId};

use crate::remote::{
    FeedEvent, FeedEventKind, FeedSubscription, RemoteBackend, TransportError,
};

#[derive(Default)]
struct MockInner {
    rows: HashMap<Collection, HashMap<DocId, Value>>,
    feeds: HashMap<Collection, Vec<Sender<FeedEvent>>>,
    /// Fail this many pulls/pushes before succeeding again.
    fail_pulls: usize,
    fail_pushes: usize,
    /// Ids silently dropped from upsert responses.
    reject_ids: HashSet<DocId>,
    pull_calls: usize,
    push_calls: usize,
    pushed_batches: Vec<Vec<Value>>,
    /// Return pull responses in descending stamp order.
    reverse_pull_order: bool,
}

/// Scriptable in-memory stand-in for the relational backend.
#[derive(Default)]
pub struct MockBackend {
    inner: Mutex<MockInner>,
}

impl MockBackend {
    pub fn new() -> Self {
        MockBackend::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a remote row directly, bypassing upsert bookkeeping.
    pub fn seed(&self, collection: Collection, row: Value) {
        let id = Collection::doc_id(&row).expect("seeded row has an id");
        self.lock().rows.entry(collection).or_default().insert(id, row);
    }

    pub fn row(&self, collection: Collection, id: DocId) -> Option<Value> {
        self.lock()
            .rows
            .get(&collection)
            .and_then(|rows| rows.get(&id))
            .cloned()
    }

    pub fn row_count(&self, collection: Collection) -> usize {
        self.lock().rows.get(&collection).map_or(0, HashMap::len)
    }

    pub fn fail_next_pulls(&self, count: usize) {
        self.lock().fail_pulls = count;
    }

    pub fn fail_next_pushes(&self, count: usize) {
        self.lock().fail_pushes = count;
    }

    pub fn reject_id(&self, id: DocId) {
        self.lock().reject_ids.insert(id);
    }

    pub fn pull_calls(&self) -> usize {
        self.lock().pull_calls
    }

    pub fn push_calls(&self) -> usize {
        self.lock().push_calls
    }

    pub fn pushed_batches(&self) -> Vec<Vec<Value>> {
        self.lock().pushed_batches.clone()
    }

    pub fn set_reverse_pull_order(&self, reverse: bool) {
        self.lock().reverse_pull_order = reverse;
    }

    /// Deliver a feed event to every live subscriber of `collection`.
    pub fn emit_feed(&self, collection: Collection, kind: FeedEventKind, row: Value) {
        let mut inner = self.lock();
        let Some(senders) = inner.feeds.get_mut(&collection) else {
            return;
        };
        senders.retain(|tx| tx.send(FeedEvent { kind, row: row.clone() }).is_ok());
    }

    /// Drop all feed channels, simulating a websocket disconnect.
    pub fn drop_feeds(&self) {
        self.lock().feeds.clear();
    }
}

impl RemoteBackend for MockBackend {
    fn pull_since(
        &self,
        collection: Collection,
        user: &UserId,
        checkpoint: &Checkpoint,
    ) -> Result<Vec<Value>, TransportError> {
        let mut inner = self.lock();
        inner.pull_calls += 1;
        if inner.fail_pulls > 0 {
            inner.fail_pulls -= 1;
            return Err(TransportError::Unavailable {
                reason: "scripted pull failure".into(),
            });
        }

        let mut matched: Vec<Value> = inner
            .rows
            .get(&collection)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        matched.retain(|row| {
            let owned = match row.get("user_id").and_then(Value::as_str) {
                Some(raw) => raw == user.to_string(),
                None => true,
            };
            let admitted = Collection::doc_stamp(row)
                .map(|stamp| checkpoint.admits(stamp))
                .unwrap_or(false);
            owned && admitted
        });
        matched.sort_by_key(|row| {
            Collection::doc_stamp(row).expect("mock rows always carry a stamp")
        });
        if inner.reverse_pull_order {
            matched.reverse();
        }
        Ok(matched)
    }

    fn upsert(
        &self,
        collection: Collection,
        _user: &UserId,
        rows: &[Value],
    ) -> Result<Vec<Value>, TransportError> {
        let mut inner = self.lock();
        inner.push_calls += 1;
        if inner.fail_pushes > 0 {
            inner.fail_pushes -= 1;
            return Err(TransportError::Unavailable {
                reason: "scripted push failure".into(),
            });
        }

        inner.pushed_batches.push(rows.to_vec());
        let mut accepted = Vec::with_capacity(rows.len());
        for row in rows {
            let id = Collection::doc_id(row).map_err(|e| TransportError::Request {
                reason: format!("pushed row without id: {e}"),
            })?;
            if inner.reject_ids.contains(&id) {
                continue;
            }
            inner
                .rows
                .entry(collection)
                .or_default()
                .insert(id, row.clone());
            accepted.push(row.clone());
        }
        Ok(accepted)
    }

    fn subscribe(
        &self,
        collection: Collection,
        _user: &UserId,
    ) -> Result<FeedSubscription, TransportError> {
        let (tx, rx) = unbounded();
        self.lock().feeds.entry(collection).or_default().push(tx);
        Ok(FeedSubscription { events: rx })
    }
}

/// Poll `predicate` every millisecond until it holds or `timeout` elapses.
pub fn poll_until(timeout: Duration, predicate: impl FnMut() -> bool) -> bool {
    poll_until_with_backoff(timeout, Duration::from_millis(1), predicate)
}

/// Like [`poll_until`] but with a doubling sleep capped at 50ms, for
/// predicates that are expensive to evaluate.
pub fn poll_until_with_backoff(
    timeout: Duration,
    initial: Duration,
    mut predicate: impl FnMut() -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    let mut wait = initial;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(wait);
        wait = (wait * 2).min(Duration::from_millis(50));
    }
}
