//! Engine configuration.
//!
//! All intervals in milliseconds in the file format; typed accessors return
//! `Duration`. Missing file or parse failure falls back to defaults with a
//! warning, never an error.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const TEST_FAST_ENV: &str = "TIDEMARK_TEST_FAST";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Interval between periodic pull cycles.
    pub poll_interval_ms: u64,
    /// Delay between a local mutation and the push it schedules; further
    /// mutations within the window reschedule, batching rapid edits.
    pub push_debounce_ms: u64,
    /// Fixed delay before retrying a failed pull or push. No backoff, no
    /// retry cap: liveness over latency.
    pub retry_delay_ms: u64,
    /// Maximum documents per push batch.
    pub push_batch_limit: usize,
    /// How long a pushed id stays in the echo ledger.
    pub echo_ttl_ms: u64,
    /// How long the manual "syncing" flag stays up after a trigger.
    pub manual_window_ms: u64,
    /// Heartbeat age past which a leader lease counts as abandoned.
    pub lease_ttl_ms: u64,
    /// Interval between heartbeats while leader.
    pub heartbeat_interval_ms: u64,
    /// Interval between acquisition attempts while not leader.
    pub acquire_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            poll_interval_ms: 30_000,
            push_debounce_ms: 500,
            retry_delay_ms: 5_000,
            push_batch_limit: 500,
            echo_ttl_ms: 5_000,
            manual_window_ms: 2_000,
            lease_ttl_ms: 15_000,
            heartbeat_interval_ms: 5_000,
            acquire_interval_ms: 1_000,
        }
    }
}

impl EngineConfig {
    /// Shrunk intervals for deterministic tests.
    pub fn fast_test() -> Self {
        EngineConfig {
            poll_interval_ms: 50,
            push_debounce_ms: 10,
            retry_delay_ms: 40,
            push_batch_limit: 500,
            echo_ttl_ms: 200,
            manual_window_ms: 100,
            lease_ttl_ms: 1_000,
            heartbeat_interval_ms: 50,
            acquire_interval_ms: 10,
        }
    }

    /// Load from a TOML file, falling back to defaults on any failure.
    pub fn load_or_default(path: &Path) -> Self {
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("config parse failed, using defaults: {e}");
                    EngineConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => EngineConfig::default(),
            Err(e) => {
                tracing::warn!("config read failed, using defaults: {e}");
                EngineConfig::default()
            }
        };
        if env_flag_truthy(TEST_FAST_ENV) {
            return EngineConfig::fast_test();
        }
        config
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn push_debounce(&self) -> Duration {
        Duration::from_millis(self.push_debounce_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn echo_ttl(&self) -> Duration {
        Duration::from_millis(self.echo_ttl_ms)
    }

    pub fn manual_window(&self) -> Duration {
        Duration::from_millis(self.manual_window_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn acquire_interval(&self) -> Duration {
        Duration::from_millis(self.acquire_interval_ms)
    }
}

fn env_flag_truthy(name: &str) -> bool {
    let Ok(raw) = std::env::var(name) else {
        return false;
    };
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "n" | "off"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.manual_window(), Duration::from_secs(2));
        assert_eq!(config.echo_ttl(), Duration::from_secs(5));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str("poll_interval_ms = 1000").unwrap();
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.retry_delay_ms, 5_000);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_or_default(&dir.path().join("nope.toml"));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "poll_interval_ms = \"soon\"").unwrap();
        assert_eq!(EngineConfig::load_or_default(&path), EngineConfig::default());
    }
}
