//! Configuration for storegrid components
//!
//! Values are layered: built-in defaults, then an optional TOML file
//! (`storegrid.toml` or an explicit path), then `STOREGRID__*` environment
//! variables. Binaries apply their CLI flags on top of the result.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::common::Result;

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub reducer: ReducerConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Address clients, workers and the reducer connect to
    #[serde(default = "default_coordinator_bind")]
    pub bind_addr: SocketAddr,

    /// Primary plus best-effort replicas for directed commands
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// How often a pending wait re-checks for liveness
    #[serde(default = "default_recheck_interval")]
    pub recheck_interval_ms: u64,

    /// Read/write timeout for a single worker exchange
    #[serde(default = "default_io_timeout")]
    pub worker_timeout_ms: u64,
}

fn default_coordinator_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 12345))
}
fn default_replication_factor() -> usize {
    2
}
fn default_recheck_interval() -> u64 {
    1_000
}
fn default_io_timeout() -> u64 {
    5_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_coordinator_bind(),
            replication_factor: default_replication_factor(),
            recheck_interval_ms: default_recheck_interval(),
            worker_timeout_ms: default_io_timeout(),
        }
    }
}

impl CoordinatorConfig {
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_millis(self.recheck_interval_ms)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Address the worker accepts coordinator commands on
    #[serde(default = "default_worker_bind")]
    pub bind_addr: SocketAddr,

    /// Coordinator address (host:port)
    #[serde(default = "default_coordinator_addr")]
    pub coordinator_addr: String,

    /// Reducer address (host:port)
    #[serde(default = "default_reducer_addr")]
    pub reducer_addr: String,

    /// Handshake attempts before falling back to standalone mode
    #[serde(default = "default_handshake_retries")]
    pub handshake_retries: usize,

    /// Initial delay between handshake attempts (doubles each time)
    #[serde(default = "default_handshake_backoff")]
    pub handshake_backoff_ms: u64,

    /// Timeout for coordinator and reducer exchanges
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
}

fn default_worker_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 20000))
}
fn default_coordinator_addr() -> String {
    "127.0.0.1:12345".to_string()
}
fn default_reducer_addr() -> String {
    "127.0.0.1:23456".to_string()
}
fn default_handshake_retries() -> usize {
    3
}
fn default_handshake_backoff() -> u64 {
    200
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_worker_bind(),
            coordinator_addr: default_coordinator_addr(),
            reducer_addr: default_reducer_addr(),
            handshake_retries: default_handshake_retries(),
            handshake_backoff_ms: default_handshake_backoff(),
            io_timeout_ms: default_io_timeout(),
        }
    }
}

impl WorkerConfig {
    pub fn handshake_backoff(&self) -> Duration {
        Duration::from_millis(self.handshake_backoff_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Reducer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducerConfig {
    #[serde(default = "default_reducer_bind")]
    pub bind_addr: SocketAddr,

    /// Where merged results are delivered (host:port)
    #[serde(default = "default_coordinator_addr")]
    pub coordinator_addr: String,

    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
}

fn default_reducer_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 23456))
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_reducer_bind(),
            coordinator_addr: default_coordinator_addr(),
            io_timeout_ms: default_io_timeout(),
        }
    }
}

impl ReducerConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl Config {
    /// Load configuration from an optional file plus `STOREGRID__*` env vars.
    ///
    /// Without an explicit path, `./storegrid.toml` is read if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("storegrid").required(false)),
        };
        builder = builder.add_source(
            config::Environment::with_prefix("STOREGRID")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.coordinator.replication_factor == 0 {
            return Err(crate::Error::InvalidConfig(
                "replication_factor must be at least 1".into(),
            ));
        }
        if self.coordinator.recheck_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "recheck_interval_ms must be positive".into(),
            ));
        }
        if self.worker.handshake_retries == 0 {
            return Err(crate::Error::InvalidConfig(
                "handshake_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.coordinator.replication_factor, 2);
        assert_eq!(config.coordinator.bind_addr.port(), 12345);
        assert_eq!(config.reducer.bind_addr.port(), 23456);
        assert_eq!(config.worker.bind_addr.port(), 20000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cluster.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[coordinator]\nreplication_factor = 3\nrecheck_interval_ms = 250\n\n[worker]\nreducer_addr = \"10.0.0.7:23456\""
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.coordinator.replication_factor, 3);
        assert_eq!(
            config.coordinator.recheck_interval(),
            Duration::from_millis(250)
        );
        assert_eq!(config.worker.reducer_addr, "10.0.0.7:23456");
        // Untouched sections keep their defaults
        assert_eq!(config.reducer.bind_addr.port(), 23456);
    }

    #[test]
    fn test_rejects_zero_replication() {
        let mut config = Config::default();
        config.coordinator.replication_factor = 0;
        assert!(config.validate().is_err());
    }
}
