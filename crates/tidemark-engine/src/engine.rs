//! Engine facade: leadership-gated replication plus always-on status.
//!
//! The engine starts its leadership monitor immediately but defers the
//! replication coordinator until the lease is won. Until then the local
//! store works fully offline; edits queue as dirty rows and flush once this
//! context becomes leader.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tidemark_core::UserId;
use tidemark_store::LocalStore;

use crate::config::EngineConfig;
use crate::coordinator::{LaneSnapshot, ReplicationCoordinator};
use crate::leadership::LeadershipMonitor;
use crate::remote::RemoteBackend;
use crate::status::{EchoLedger, SyncStatus, default_lane_stats};

pub struct Engine {
    status: Arc<SyncStatus>,
    leadership: LeadershipMonitor,
    coordinator: Arc<Mutex<Option<ReplicationCoordinator>>>,
    starter: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn start(
        config: EngineConfig,
        store: Arc<LocalStore>,
        backend: Arc<dyn RemoteBackend>,
        user: UserId,
        lease_dir: PathBuf,
    ) -> Self {
        let echo = Arc::new(EchoLedger::new(config.echo_ttl()));
        let lane_stats = default_lane_stats();
        let status = Arc::new(SyncStatus::new(
            lane_stats.clone(),
            Arc::clone(&echo),
            config.manual_window(),
        ));

        let leadership = LeadershipMonitor::spawn(lease_dir, user, &config);
        let coordinator = Arc::new(Mutex::new(None));

        let leader_rx = leadership.leader_events();
        let slot = Arc::clone(&coordinator);
        let starter = std::thread::spawn(move || {
            // Blocks until leadership arrives or the monitor shuts down.
            if leader_rx.recv().is_err() {
                return;
            }
            let built =
                ReplicationCoordinator::start(&config, &store, &backend, user, &lane_stats, &echo);
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(built);
        });

        Engine {
            status,
            leadership,
            coordinator,
            starter: Some(starter),
        }
    }

    pub fn status(&self) -> &Arc<SyncStatus> {
        &self.status
    }

    pub fn is_leader(&self) -> bool {
        self.leadership.is_leader()
    }

    pub fn is_replicating(&self) -> bool {
        self.lock_coordinator().is_some()
    }

    pub fn lane_snapshots(&self) -> Vec<LaneSnapshot> {
        self.lock_coordinator()
            .as_ref()
            .map(ReplicationCoordinator::snapshots)
            .unwrap_or_default()
    }

    /// User-initiated sync. Raises the status flag even when not leader so
    /// the UI acknowledges the gesture.
    pub fn trigger_sync(&self) {
        self.status.trigger_manual();
        if let Some(coordinator) = self.lock_coordinator().as_ref() {
            coordinator.trigger_sync();
        }
    }

    pub fn shutdown(self) {
        let Engine {
            leadership,
            coordinator,
            starter,
            ..
        } = self;

        leadership.shutdown();
        if let Some(starter) = starter
            && starter.join().is_err()
        {
            tracing::error!("coordinator starter thread panicked");
        }
        let slot = coordinator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(coordinator) = slot {
            coordinator.shutdown();
        }
        tracing::info!("engine stopped");
    }

    fn lock_coordinator(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<ReplicationCoordinator>> {
        self.coordinator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
