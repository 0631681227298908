//! Leadership monitor: acquire the per-user lease, then keep it warm.
//!
//! One background thread alternates between acquisition attempts (while a
//! peer holds the lease) and heartbeats (once we hold it). Leadership is
//! never renounced voluntarily; it ends with shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded};

use tidemark_core::UserId;
use tidemark_store::LeaderLease;

use crate::config::EngineConfig;

pub struct LeadershipMonitor {
    is_leader: Arc<AtomicBool>,
    leader_rx: Receiver<()>,
    shutdown_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl LeadershipMonitor {
    pub fn spawn(lease_dir: PathBuf, user: UserId, config: &EngineConfig) -> Self {
        let is_leader = Arc::new(AtomicBool::new(false));
        let (leader_tx, leader_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let flag = Arc::clone(&is_leader);
        let ttl = config.lease_ttl();
        let heartbeat_interval = config.heartbeat_interval();
        let acquire_interval = config.acquire_interval();

        let handle = std::thread::spawn(move || {
            run_monitor(
                lease_dir,
                user,
                ttl,
                heartbeat_interval,
                acquire_interval,
                flag,
                leader_tx,
                shutdown_rx,
            );
        });

        LeadershipMonitor {
            is_leader,
            leader_rx,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Relaxed)
    }

    /// Fires exactly once, when leadership is first acquired.
    pub fn leader_events(&self) -> Receiver<()> {
        self.leader_rx.clone()
    }

    pub fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("leadership monitor thread panicked");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_monitor(
    lease_dir: PathBuf,
    user: UserId,
    ttl: Duration,
    heartbeat_interval: Duration,
    acquire_interval: Duration,
    flag: Arc<AtomicBool>,
    leader_tx: Sender<()>,
    shutdown_rx: Receiver<()>,
) {
    let mut lease: Option<LeaderLease> = None;
    loop {
        if lease.is_none() {
            match LeaderLease::try_acquire(&lease_dir, user, ttl) {
                Ok(Some(acquired)) => {
                    tracing::info!(user = %user, "acquired leader lease");
                    lease = Some(acquired);
                    flag.store(true, Ordering::Relaxed);
                    let _ = leader_tx.try_send(());
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "lease acquisition failed");
                }
            }
        }

        let wait = if lease.is_some() {
            heartbeat_interval
        } else {
            acquire_interval
        };
        match shutdown_rx.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if let Some(held) = lease.as_mut()
            && let Err(err) = held.heartbeat()
        {
            tracing::warn!(error = %err, "lease heartbeat failed");
        }
    }
    // Lease file removed on drop.
    drop(lease);
    flag.store(false, Ordering::Relaxed);
}
