use bytesize::ByteSize;
use pces_core::{PcesError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings of the preconsensus event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PcesConfig {
    /// Parent of the per-node stream directories
    pub database_directory: PathBuf,

    /// Files at or above this size are rotated before the next write
    #[serde(with = "bytesize_serde")]
    pub preferred_file_size: ByteSize,

    /// Span basis used until the first file has been closed
    pub bootstrap_span: u64,

    /// Span multiplier used until the first file has been closed
    pub bootstrap_span_overlap_factor: f64,

    /// Multiplier applied to the utilized span of the previous file
    pub span_overlap_factor: f64,

    /// Skip files that break the stream order instead of failing recovery
    pub permit_gaps: bool,

    /// Files younger than this are never pruned
    #[serde(with = "humantime_serde")]
    pub minimum_retention_period: Duration,

    /// Shrink the span of the last file to its contents during recovery
    pub compact_last_file_on_startup: bool,

    /// Throttle replay to `max_event_replay_frequency`
    pub limit_replay_frequency: bool,

    /// Events per second replayed when throttling is enabled
    pub max_event_replay_frequency: u64,

    /// Commands buffered by the background writer
    pub write_queue_capacity: usize,
}

impl Default for PcesConfig {
    fn default() -> Self {
        Self {
            database_directory: PathBuf::from("preconsensus-events"),
            preferred_file_size: ByteSize::mb(10),
            bootstrap_span: 50,
            bootstrap_span_overlap_factor: 10.0,
            span_overlap_factor: 1.2,
            permit_gaps: false,
            minimum_retention_period: Duration::from_secs(60 * 60),
            compact_last_file_on_startup: true,
            limit_replay_frequency: false,
            max_event_replay_frequency: 5000,
            write_queue_capacity: 1000,
        }
    }
}

impl PcesConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            PcesError::InvalidArgument(format!("{}: {e}", path.as_ref().display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.preferred_file_size.as_u64() == 0 {
            return Err(PcesError::InvalidArgument(String::from(
                "preferred_file_size must be greater than 0",
            )));
        }
        if self.bootstrap_span == 0 {
            return Err(PcesError::InvalidArgument(String::from(
                "bootstrap_span must be greater than 0",
            )));
        }
        if self.bootstrap_span_overlap_factor < 1.0 || self.span_overlap_factor < 1.0 {
            return Err(PcesError::InvalidArgument(String::from(
                "span overlap factors must be at least 1.0",
            )));
        }
        if self.limit_replay_frequency && self.max_event_replay_frequency == 0 {
            return Err(PcesError::InvalidArgument(String::from(
                "max_event_replay_frequency must be greater than 0",
            )));
        }
        if self.write_queue_capacity == 0 {
            return Err(PcesError::InvalidArgument(String::from(
                "write_queue_capacity must be greater than 0",
            )));
        }
        Ok(())
    }

    /// Stream directory of one node.
    pub fn node_directory(&self, self_id: u64) -> PathBuf {
        self.database_directory.join(self_id.to_string())
    }

    pub fn with_database_directory(mut self, database_directory: impl Into<PathBuf>) -> Self {
        self.database_directory = database_directory.into();
        self
    }

    pub fn with_preferred_file_size(mut self, preferred_file_size: ByteSize) -> Self {
        self.preferred_file_size = preferred_file_size;
        self
    }

    pub fn with_bootstrap_span(mut self, bootstrap_span: u64) -> Self {
        self.bootstrap_span = bootstrap_span;
        self
    }

    pub fn with_span_overlap_factors(mut self, bootstrap: f64, steady: f64) -> Self {
        self.bootstrap_span_overlap_factor = bootstrap;
        self.span_overlap_factor = steady;
        self
    }

    pub fn with_permit_gaps(mut self, permit_gaps: bool) -> Self {
        self.permit_gaps = permit_gaps;
        self
    }

    pub fn with_minimum_retention_period(mut self, minimum_retention_period: Duration) -> Self {
        self.minimum_retention_period = minimum_retention_period;
        self
    }

    pub fn with_compact_last_file_on_startup(mut self, compact: bool) -> Self {
        self.compact_last_file_on_startup = compact;
        self
    }

    /// Enables replay throttling at `events_per_second`.
    pub fn with_max_event_replay_frequency(mut self, events_per_second: u64) -> Self {
        self.limit_replay_frequency = true;
        self.max_event_replay_frequency = events_per_second;
        self
    }

    pub fn with_write_queue_capacity(mut self, write_queue_capacity: usize) -> Self {
        self.write_queue_capacity = write_queue_capacity;
        self
    }
}
