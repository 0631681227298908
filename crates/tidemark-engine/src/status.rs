//! Operator-facing sync status: liveness signal, counters, echo ledger.
//!
//! Everything here is observability. Nothing in this module ever decides
//! whether a document is applied or transmitted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tidemark_core::{Collection, DocId};

/// Per-lane activity flag and document counters, readable without locking.
#[derive(Debug, Default)]
pub struct LaneStats {
    active: AtomicBool,
    sent: AtomicU64,
    received: AtomicU64,
}

impl LaneStats {
    pub fn new() -> Self {
        LaneStats::default()
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub(crate) fn add_sent(&self, count: u64) {
        self.sent.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_received(&self, count: u64) {
        self.received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    fn take_counts(&self) -> (u64, u64) {
        (
            self.sent.swap(0, Ordering::Relaxed),
            self.received.swap(0, Ordering::Relaxed),
        )
    }
}

/// Counters captured when a sync session ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub sent: u64,
    pub received: u64,
}

/// Whether a received document is likely a loop-back of a local push.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Echo {
    LikelyLocal,
    Remote,
}

/// Ids pushed recently, with a short TTL.
///
/// Purely an annotation aid for operator-facing output: a received document
/// whose id is in the ledger is probably our own write coming back around.
#[derive(Debug)]
pub struct EchoLedger {
    ttl: Duration,
    inner: Mutex<HashMap<DocId, Instant>>,
}

impl EchoLedger {
    pub fn new(ttl: Duration) -> Self {
        EchoLedger {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn note_pushed(&self, ids: impl IntoIterator<Item = DocId>) {
        let now = Instant::now();
        let mut inner = self.lock();
        for id in ids {
            inner.insert(id, now);
        }
    }

    pub fn classify(&self, id: DocId) -> Echo {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.retain(|_, pushed_at| now.duration_since(*pushed_at) < self.ttl);
        if inner.contains_key(&id) {
            Echo::LikelyLocal
        } else {
            Echo::Remote
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DocId, Instant>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fresh per-collection stat handles for a coordinator/status pair.
pub fn default_lane_stats() -> Vec<(Collection, Arc<LaneStats>)> {
    Collection::ALL
        .iter()
        .map(|collection| (*collection, Arc::new(LaneStats::new())))
        .collect()
}

struct StatusInner {
    manual_until: Option<Instant>,
    was_syncing: bool,
    last_sync: Option<SyncStats>,
}

/// UI-facing aggregate over the lanes' stats.
pub struct SyncStatus {
    lanes: Vec<(Collection, Arc<LaneStats>)>,
    echo: Arc<EchoLedger>,
    manual_window: Duration,
    inner: Mutex<StatusInner>,
}

impl SyncStatus {
    pub fn new(
        lanes: Vec<(Collection, Arc<LaneStats>)>,
        echo: Arc<EchoLedger>,
        manual_window: Duration,
    ) -> Self {
        SyncStatus {
            lanes,
            echo,
            manual_window,
            inner: Mutex::new(StatusInner {
                manual_until: None,
                was_syncing: false,
                last_sync: None,
            }),
        }
    }

    /// True while any lane has a round-trip outstanding, or within the
    /// manual-trigger window. On the syncing→idle transition the current
    /// counters are snapshotted as "last sync stats" and reset.
    pub fn is_syncing(&self) -> bool {
        let lanes_active = self.lanes.iter().any(|(_, stats)| stats.is_active());
        let now = Instant::now();

        let mut inner = self.lock();
        let manual = match inner.manual_until {
            Some(until) if until > now => true,
            Some(_) => {
                inner.manual_until = None;
                false
            }
            None => false,
        };
        let syncing = lanes_active || manual;

        if inner.was_syncing && !syncing {
            let mut total = SyncStats::default();
            for (_, stats) in &self.lanes {
                let (sent, received) = stats.take_counts();
                total.sent += sent;
                total.received += received;
            }
            inner.last_sync = Some(total);
        }
        inner.was_syncing = syncing;
        syncing
    }

    /// Raise the manual flag so a user-triggered sync that completes faster
    /// than the UI can render still shows feedback. Self-clears.
    pub fn trigger_manual(&self) {
        let mut inner = self.lock();
        inner.manual_until = Some(Instant::now() + self.manual_window);
        inner.was_syncing = true;
    }

    pub fn last_sync_stats(&self) -> Option<SyncStats> {
        self.lock().last_sync
    }

    /// Live counters across all lanes (not reset).
    pub fn totals(&self) -> SyncStats {
        let mut total = SyncStats::default();
        for (_, stats) in &self.lanes {
            total.sent += stats.sent();
            total.received += stats.received();
        }
        total
    }

    pub fn classify(&self, id: DocId) -> Echo {
        self.echo.classify(id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
