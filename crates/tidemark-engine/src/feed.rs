//! Realtime feed adapter: best-effort latency reduction over polling.
//!
//! A dropped or unavailable feed never degrades correctness; the lane keeps
//! polling and resubscribes after the next successful pull.

use crossbeam::channel::Receiver;

use tidemark_core::{Collection, UserId};
use tidemark_store::LocalStore;

use crate::apply::{ApplySource, project_and_apply};
use crate::remote::{FeedEvent, FeedEventKind, FeedSubscription, RemoteBackend};
use crate::status::{EchoLedger, LaneStats};

pub(crate) struct FeedAdapter {
    collection: Collection,
    user: UserId,
    subscription: Option<FeedSubscription>,
}

impl FeedAdapter {
    pub(crate) fn new(collection: Collection, user: UserId) -> Self {
        FeedAdapter {
            collection,
            user,
            subscription: None,
        }
    }

    /// Subscribe if not already subscribed. Failure is logged at debug;
    /// polling covers for the missing feed.
    pub(crate) fn connect(&mut self, backend: &dyn RemoteBackend) {
        if self.subscription.is_some() {
            return;
        }
        match backend.subscribe(self.collection, &self.user) {
            Ok(subscription) => {
                tracing::info!(collection = %self.collection, "realtime feed subscribed");
                self.subscription = Some(subscription);
            }
            Err(err) => {
                tracing::debug!(collection = %self.collection, error = %err, "feed subscribe failed; polling only");
            }
        }
    }

    pub(crate) fn events(&self) -> Option<&Receiver<FeedEvent>> {
        self.subscription.as_ref().map(|sub| &sub.events)
    }

    pub(crate) fn disconnect(&mut self) {
        if self.subscription.take().is_some() {
            tracing::info!(collection = %self.collection, "realtime feed disconnected; continuing with polling only");
        }
    }

    /// Apply one feed event through the shared apply path. Deletes are
    /// ignored; soft deletion arrives as an update setting `is_deleted`.
    pub(crate) fn handle(
        &self,
        store: &LocalStore,
        stats: &LaneStats,
        echo: &EchoLedger,
        event: &FeedEvent,
    ) {
        match event.kind {
            FeedEventKind::Insert | FeedEventKind::Update => {
                if let Err(err) = project_and_apply(
                    store,
                    self.collection,
                    &event.row,
                    ApplySource::Feed,
                    stats,
                    echo,
                ) {
                    tracing::warn!(collection = %self.collection, error = %err, "feed event failed to apply");
                }
            }
            FeedEventKind::Delete => {
                tracing::trace!(collection = %self.collection, "ignoring hard-delete feed event");
            }
        }
    }
}
