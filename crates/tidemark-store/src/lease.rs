//! Leader lease: heartbeat lock file electing one context per user.
//!
//! Exactly one execution context per authenticated user may drive remote
//! I/O. The lease is a `create_new` lock file with JSON metadata; the
//! incumbent refreshes a heartbeat, and a lease whose heartbeat is older
//! than the TTL may be taken over. Leadership is advisory and is not
//! renounced until the context shuts down.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tidemark_core::{Transience, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseMeta {
    pub user_id: UserId,
    pub pid: u32,
    pub started_at_ms: u64,
    pub last_heartbeat_ms: u64,
}

impl LeaseMeta {
    fn new(user_id: UserId, now_ms: u64) -> Self {
        LeaseMeta {
            user_id,
            pid: std::process::id(),
            started_at_ms: now_ms,
            last_heartbeat_ms: now_ms,
        }
    }
}

#[derive(Debug)]
pub struct LeaderLease {
    path: PathBuf,
    meta: LeaseMeta,
    released: bool,
}

impl LeaderLease {
    /// Try to become leader for `user_id`.
    ///
    /// Returns `Ok(None)` when another live context holds the lease. A lease
    /// whose heartbeat is older than `ttl` is treated as abandoned (crashed
    /// context) and taken over.
    pub fn try_acquire(
        dir: &Path,
        user_id: UserId,
        ttl: Duration,
    ) -> Result<Option<Self>, LeaseError> {
        fs::create_dir_all(dir).map_err(|source| LeaseError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = lease_path(dir, user_id);
        reject_symlink(&path)?;

        let now_ms = wall_ms();
        match try_create(&path, user_id, now_ms)? {
            Some(lease) => Ok(Some(lease)),
            None => {
                let incumbent = read_meta(&path)?;
                let stale = now_ms.saturating_sub(incumbent.last_heartbeat_ms)
                    > ttl.as_millis() as u64;
                if !stale {
                    return Ok(None);
                }
                tracing::warn!(
                    user = %user_id,
                    holder_pid = incumbent.pid,
                    "taking over stale leader lease"
                );
                fs::remove_file(&path).map_err(|source| LeaseError::Io {
                    path: path.clone(),
                    source,
                })?;
                try_create(&path, user_id, now_ms)
            }
        }
    }

    pub fn meta(&self) -> &LeaseMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Refresh the heartbeat so other contexts keep deferring.
    pub fn heartbeat(&mut self) -> Result<(), LeaseError> {
        self.meta.last_heartbeat_ms = wall_ms();
        write_meta(&self.path, &self.meta)
    }

    pub fn release(mut self) -> Result<(), LeaseError> {
        if !self.released {
            fs::remove_file(&self.path).map_err(|source| LeaseError::Io {
                path: self.path.clone(),
                source,
            })?;
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for LeaderLease {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("lease path is a symlink: {path:?}")]
    Symlink { path: PathBuf },

    #[error("lease metadata corrupted at {path:?}: {source}")]
    MetadataCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LeaseError {
    pub fn transience(&self) -> Transience {
        match self {
            LeaseError::Symlink { .. } | LeaseError::MetadataCorrupt { .. } => {
                Transience::Permanent
            }
            LeaseError::Io { .. } => Transience::Retryable,
        }
    }
}

fn lease_path(dir: &Path, user_id: UserId) -> PathBuf {
    dir.join(format!("leader-{user_id}.lock"))
}

fn wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn try_create(
    path: &Path,
    user_id: UserId,
    now_ms: u64,
) -> Result<Option<LeaderLease>, LeaseError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = match options.open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
        Err(source) => {
            return Err(LeaseError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    drop(file);

    let meta = LeaseMeta::new(user_id, now_ms);
    write_meta(path, &meta)?;
    Ok(Some(LeaderLease {
        path: path.to_path_buf(),
        meta,
        released: false,
    }))
}

fn reject_symlink(path: &Path) -> Result<(), LeaseError> {
    if let Ok(meta) = fs::symlink_metadata(path)
        && meta.file_type().is_symlink()
    {
        return Err(LeaseError::Symlink {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn read_meta(path: &Path) -> Result<LeaseMeta, LeaseError> {
    reject_symlink(path)?;
    let bytes = fs::read(path).map_err(|source| LeaseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| LeaseError::MetadataCorrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn write_meta(path: &Path, meta: &LeaseMeta) -> Result<(), LeaseError> {
    reject_symlink(path)?;
    let bytes = serde_json::to_vec(meta).map_err(|source| LeaseError::MetadataCorrupt {
        path: path.to_path_buf(),
        source,
    })?;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|source| LeaseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    use std::io::Write;
    file.write_all(&bytes).map_err(|source| LeaseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    file.sync_all().map_err(|source| LeaseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user() -> UserId {
        UserId::new(Uuid::from_bytes([5u8; 16]))
    }

    #[test]
    fn second_acquire_defers_to_live_holder() {
        let dir = tempfile::tempdir().unwrap();
        let ttl = Duration::from_secs(15);

        let lease = LeaderLease::try_acquire(dir.path(), user(), ttl)
            .unwrap()
            .expect("first acquire wins");
        assert!(
            LeaderLease::try_acquire(dir.path(), user(), ttl)
                .unwrap()
                .is_none()
        );
        drop(lease);

        // Released on drop: leadership is available again.
        assert!(
            LeaderLease::try_acquire(dir.path(), user(), ttl)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn stale_lease_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = lease_path(dir.path(), user());

        // Simulate a crashed holder whose heartbeat is ancient.
        let dead = LeaseMeta {
            user_id: user(),
            pid: 1,
            started_at_ms: 1_000,
            last_heartbeat_ms: 1_000,
        };
        fs::write(&path, serde_json::to_vec(&dead).unwrap()).unwrap();

        let lease = LeaderLease::try_acquire(dir.path(), user(), Duration::from_secs(15))
            .unwrap()
            .expect("stale lease taken over");
        assert_eq!(lease.meta().pid, std::process::id());
    }

    #[test]
    fn heartbeat_refreshes_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut lease = LeaderLease::try_acquire(dir.path(), user(), Duration::from_secs(15))
            .unwrap()
            .unwrap();
        let before = lease.meta().last_heartbeat_ms;

        std::thread::sleep(Duration::from_millis(5));
        lease.heartbeat().unwrap();

        assert!(lease.meta().last_heartbeat_ms >= before);
        let on_disk = read_meta(lease.path()).unwrap();
        assert_eq!(on_disk.last_heartbeat_ms, lease.meta().last_heartbeat_ms);
    }

    #[test]
    fn leases_are_scoped_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let other = UserId::new(Uuid::from_bytes([6u8; 16]));
        let ttl = Duration::from_secs(15);

        let _a = LeaderLease::try_acquire(dir.path(), user(), ttl).unwrap().unwrap();
        let b = LeaderLease::try_acquire(dir.path(), other, ttl).unwrap();
        assert!(b.is_some(), "a different user elects its own leader");
    }
}
