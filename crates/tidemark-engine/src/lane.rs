//! One replication lane per collection.
//!
//! A lane is a worker thread owning the pull/push cadence for a single
//! collection: initial pull on startup, periodic pulls, debounced pushes on
//! local mutation, fixed-delay retries, and the realtime feed when it is up.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, bounded, never};

use tidemark_core::{Collection, UserId};
use tidemark_store::{ChangeEvent, ChangeOrigin, LocalStore};

use crate::config::EngineConfig;
use crate::feed::FeedAdapter;
use crate::pull::run_pull;
use crate::push::run_push;
use crate::remote::{FeedEvent, RemoteBackend};
use crate::scheduler::{LaneTask, TaskScheduler};
use crate::status::{EchoLedger, LaneStats};

/// Upper bound on the select wait when nothing is scheduled.
const IDLE_WAIT: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug)]
pub(crate) enum LaneControl {
    TriggerSync,
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LaneState {
    Idle,
    Initializing,
    Live,
    Backoff,
}

impl LaneState {
    fn name(self) -> &'static str {
        match self {
            LaneState::Idle => "idle",
            LaneState::Initializing => "initializing",
            LaneState::Live => "live",
            LaneState::Backoff => "backoff",
        }
    }
}

pub(crate) struct LaneHandle {
    pub(crate) collection: Collection,
    pub(crate) control: Sender<LaneControl>,
    pub(crate) stats: Arc<LaneStats>,
    pub(crate) thread: JoinHandle<()>,
}

pub(crate) fn spawn_lane(
    collection: Collection,
    user: UserId,
    config: EngineConfig,
    store: Arc<LocalStore>,
    backend: Arc<dyn RemoteBackend>,
    stats: Arc<LaneStats>,
    echo: Arc<EchoLedger>,
) -> LaneHandle {
    let (control_tx, control_rx) = bounded(16);
    let changes = store.subscribe();
    let lane_stats = Arc::clone(&stats);

    let thread = std::thread::spawn(move || {
        let span = tracing::info_span!("lane", %collection);
        let _guard = span.enter();
        let mut lane = Lane {
            collection,
            user,
            config,
            store,
            backend,
            stats: lane_stats,
            echo,
            control: control_rx,
            changes,
            feed: FeedAdapter::new(collection, user),
            scheduler: TaskScheduler::new(),
            state: LaneState::Idle,
        };
        lane.run();
    });

    LaneHandle {
        collection,
        control: control_tx,
        stats,
        thread,
    }
}

struct Lane {
    collection: Collection,
    user: UserId,
    config: EngineConfig,
    store: Arc<LocalStore>,
    backend: Arc<dyn RemoteBackend>,
    stats: Arc<LaneStats>,
    echo: Arc<EchoLedger>,
    control: Receiver<LaneControl>,
    changes: Receiver<ChangeEvent>,
    feed: FeedAdapter,
    scheduler: TaskScheduler,
    state: LaneState,
}

impl Lane {
    fn run(&mut self) {
        tracing::info!("lane starting");
        self.set_state(LaneState::Initializing);
        self.feed.connect(self.backend.as_ref());
        self.scheduler.schedule_now(LaneTask::Pull);
        match self.store.dirty_count(self.collection) {
            Ok(0) => {}
            Ok(pending) => {
                tracing::info!(pending, "pending local edits at startup");
                self.scheduler
                    .schedule_after(LaneTask::Push, self.config.push_debounce());
            }
            Err(err) => {
                tracing::error!(error = %err, "dirty count failed at startup");
            }
        }
        self.set_state(LaneState::Live);

        let never_feed = never::<FeedEvent>();
        loop {
            let timeout = self
                .scheduler
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_WAIT);

            let mut shutdown = false;
            let mut feed_down = false;
            {
                let feed_rx = self.feed.events().unwrap_or(&never_feed);
                crossbeam::select! {
                    recv(self.control) -> msg => match msg {
                        Ok(LaneControl::TriggerSync) => {
                            self.scheduler.schedule_now(LaneTask::Pull);
                            self.scheduler.schedule_now(LaneTask::Push);
                        }
                        Ok(LaneControl::Shutdown) | Err(_) => shutdown = true,
                    },
                    recv(self.changes) -> msg => match msg {
                        Ok(event) => {
                            if event.collection == self.collection
                                && event.origin == ChangeOrigin::Local
                            {
                                self.scheduler
                                    .schedule_after(LaneTask::Push, self.config.push_debounce());
                            }
                        }
                        Err(_) => shutdown = true,
                    },
                    recv(feed_rx) -> msg => match msg {
                        Ok(event) => {
                            self.feed
                                .handle(&self.store, &self.stats, &self.echo, &event);
                        }
                        Err(_) => feed_down = true,
                    },
                    default(timeout) => {}
                }
            }

            if shutdown {
                self.scheduler.cancel(LaneTask::Pull);
                self.scheduler.cancel(LaneTask::Push);
                break;
            }
            if feed_down {
                self.feed.disconnect();
            }

            for task in self.scheduler.drain_due(Instant::now()) {
                match task {
                    LaneTask::Pull => self.do_pull(),
                    LaneTask::Push => self.do_push(),
                }
            }
        }
        tracing::info!("lane stopped");
    }

    fn set_state(&mut self, next: LaneState) {
        if self.state != next {
            tracing::debug!(from = self.state.name(), to = next.name(), "lane state change");
            self.state = next;
        }
    }

    fn do_pull(&mut self) {
        self.stats.set_active(true);
        let result = run_pull(
            self.backend.as_ref(),
            &self.store,
            self.collection,
            self.user,
            &self.stats,
            &self.echo,
        );
        self.stats.set_active(false);

        match result {
            Ok(outcome) => {
                if outcome.applied > 0 {
                    tracing::debug!(
                        fetched = outcome.fetched,
                        applied = outcome.applied,
                        "pull cycle complete"
                    );
                }
                self.set_state(LaneState::Live);
                // A healthy pull is the signal that the backend is back;
                // worth retrying a dropped feed now.
                self.feed.connect(self.backend.as_ref());
                self.scheduler
                    .schedule_after(LaneTask::Pull, self.config.poll_interval());
            }
            Err(err) => {
                if err.transience().is_retryable() {
                    tracing::warn!(error = %err, "pull failed; will retry");
                    self.scheduler
                        .schedule_after(LaneTask::Pull, self.config.retry_delay());
                } else {
                    tracing::error!(error = %err, "pull failed permanently; resuming periodic polls");
                    self.scheduler
                        .schedule_after(LaneTask::Pull, self.config.poll_interval());
                }
                self.set_state(LaneState::Backoff);
            }
        }
    }

    fn do_push(&mut self) {
        self.stats.set_active(true);
        let result = run_push(
            self.backend.as_ref(),
            &self.store,
            self.collection,
            self.user,
            self.config.push_batch_limit,
            &self.stats,
            &self.echo,
        );
        self.stats.set_active(false);

        match result {
            Ok(outcome) => {
                self.set_state(LaneState::Live);
                // Rejected rows stay dirty but get no automatic retry; they
                // ride along with the next local edit or manual trigger.
                match self.store.dirty_count(self.collection) {
                    Ok(pending)
                        if pending > outcome.rejected.len()
                            && !self.scheduler.is_pending(LaneTask::Push) =>
                    {
                        // More than a full batch was queued; keep draining.
                        // A push already pending (fresh local edit) covers
                        // the leftovers without extending its deadline.
                        self.scheduler
                            .schedule_after(LaneTask::Push, self.config.push_debounce());
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::error!(error = %err, "dirty count failed after push");
                    }
                }
            }
            Err(err) => {
                if err.transience().is_retryable() {
                    tracing::warn!(error = %err, "push failed; will retry");
                    self.scheduler
                        .schedule_after(LaneTask::Push, self.config.retry_delay());
                } else {
                    tracing::error!(error = %err, "push failed permanently; rows stay pending");
                }
                self.set_state(LaneState::Backoff);
            }
        }
    }
}
