//! Configuration for the replication engine.
//!
//! Hierarchical loading with defaults as the code base, an optional
//! configuration file via `CONFIG_PATH`, and `REPL__`-prefixed environment
//! variables as the highest-priority override.


use std::env;
use std::time::Duration;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Tunables governing per-follower replication behavior.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReplicationConfig {
    /// Maximum number of log entries shipped in one AppendEntries request
    #[serde(default = "default_max_append_entries")]
    pub max_append_entries: u64,

    /// Base interval (milliseconds) of the replication tick; each wait is
    /// randomized around this value to avoid synchronized probing
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,

    /// Follower election timeout (milliseconds); heartbeats fire at a
    /// randomized tenth of this so a healthy leader can never be suspected
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Bound on buffered responses in an open AppendEntries pipeline
    #[serde(default = "default_pipeline_buffer")]
    pub pipeline_buffer: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_append_entries: default_max_append_entries(),
            commit_timeout_ms: default_commit_timeout_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            pipeline_buffer: default_pipeline_buffer(),
        }
    }
}

impl ReplicationConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Sources are merged in order (later overrides earlier):
    /// 1. Type defaults
    /// 2. Configuration file named by the `CONFIG_PATH` environment variable
    /// 3. Environment variables with the `REPL__` prefix
    ///
    /// Callers MUST call [`validate`](Self::validate) before use.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("REPL")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validates field bounds.
    pub fn validate(&self) -> Result<()> {
        if self.max_append_entries == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_append_entries must be greater than 0".into(),
            )));
        }

        if self.commit_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "commit_timeout_ms must be at least 1ms".into(),
            )));
        }

        if self.heartbeat_timeout_ms < 10 {
            return Err(Error::Config(ConfigError::Message(
                "heartbeat_timeout_ms must be at least 10ms so the derived heartbeat interval is non-zero".into(),
            )));
        }

        if self.pipeline_buffer == 0 {
            return Err(Error::Config(ConfigError::Message(
                "pipeline_buffer must be greater than 0".into(),
            )));
        }

        Ok(())
    }

    /// Base duration of the randomized replication tick.
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    /// Base duration of the randomized heartbeat interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms / 10)
    }
}

fn default_max_append_entries() -> u64 {
    64
}

fn default_commit_timeout_ms() -> u64 {
    50
}

fn default_heartbeat_timeout_ms() -> u64 {
    1000
}

fn default_pipeline_buffer() -> usize {
    128
}
