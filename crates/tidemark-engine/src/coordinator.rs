//! Replication coordinator: one lane per collection, fixed set, one owner.

use std::sync::Arc;

use tidemark_core::{Collection, UserId};
use tidemark_store::LocalStore;

use crate::config::EngineConfig;
use crate::lane::{LaneControl, LaneHandle, spawn_lane};
use crate::remote::RemoteBackend;
use crate::status::{EchoLedger, LaneStats};

/// Per-lane counters as seen at a point in time.
#[derive(Clone, Debug)]
pub struct LaneSnapshot {
    pub collection: Collection,
    pub sent: u64,
    pub received: u64,
    pub active: bool,
}

pub struct ReplicationCoordinator {
    lanes: Vec<LaneHandle>,
}

impl ReplicationCoordinator {
    /// Spawn one lane per collection. The `stats` handles are shared with
    /// the status aggregator so liveness reads need no coordination.
    pub fn start(
        config: &EngineConfig,
        store: &Arc<LocalStore>,
        backend: &Arc<dyn RemoteBackend>,
        user: UserId,
        stats: &[(Collection, Arc<LaneStats>)],
        echo: &Arc<EchoLedger>,
    ) -> Self {
        let lanes = stats
            .iter()
            .map(|(collection, lane_stats)| {
                spawn_lane(
                    *collection,
                    user,
                    config.clone(),
                    Arc::clone(store),
                    Arc::clone(backend),
                    Arc::clone(lane_stats),
                    Arc::clone(echo),
                )
            })
            .collect();
        tracing::info!(user = %user, "replication coordinator started");
        ReplicationCoordinator { lanes }
    }

    /// True while any lane has a remote round-trip in flight.
    pub fn is_transmitting(&self) -> bool {
        self.lanes.iter().any(|lane| lane.stats.is_active())
    }

    pub fn snapshots(&self) -> Vec<LaneSnapshot> {
        self.lanes
            .iter()
            .map(|lane| LaneSnapshot {
                collection: lane.collection,
                sent: lane.stats.sent(),
                received: lane.stats.received(),
                active: lane.stats.is_active(),
            })
            .collect()
    }

    /// Ask every lane for an immediate pull and push.
    pub fn trigger_sync(&self) {
        for lane in &self.lanes {
            if lane.control.send(LaneControl::TriggerSync).is_err() {
                tracing::warn!(collection = %lane.collection, "lane is gone; trigger dropped");
            }
        }
    }

    /// Stop all lanes and wait for their threads to exit.
    pub fn shutdown(self) {
        for lane in &self.lanes {
            let _ = lane.control.send(LaneControl::Shutdown);
        }
        for lane in self.lanes {
            if lane.thread.join().is_err() {
                tracing::error!(collection = %lane.collection, "lane thread panicked");
            }
        }
        tracing::info!("replication coordinator stopped");
    }
}
