//! Tunables for the log and recovery pipeline.
//!
//! Mirrors the builder-style configuration structs used elsewhere in the
//! workspace: sane defaults, `with_*` builder methods, and a `validate`
//! pass before the value is handed to the components that use it.

use std::env;
use std::time::Duration;

/// Runtime tunables for [`LogStorage`](../vfs_log/struct.LogStorage.html) and
/// the recovery pipeline.
///
/// Every field has a documented default; callers typically start from
/// [`RecoveryConfig::default`] and override only what they need, or from
/// [`RecoveryConfig::from_env`] to pick up operator overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Number of fileIds processed per stage-2 record-initialization pass.
    pub records_init_chunk_size: u32,
    /// Capacity of the bounded channel feeding the log's write workers.
    pub log_write_buffer_capacity: usize,
    /// On-disk chunk granularity, in bytes.
    pub log_chunk_size: u64,
    /// Number of consecutive clean records the point finder requires
    /// before accepting a candidate recovery point.
    pub clean_window: u32,
    /// Seed value (milliseconds) for the restore-point geometric spacing.
    pub restore_point_initial_skip_ms: u64,
    /// Geometric growth factor applied to the restore-point spacing after
    /// each emitted point.
    pub restore_point_multiplier: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            records_init_chunk_size: 750_000,
            log_write_buffer_capacity: 5_000,
            log_chunk_size: 64 * 1024 * 1024,
            clean_window: 50_000,
            restore_point_initial_skip_ms: 30_000,
            restore_point_multiplier: 1.618,
        }
    }
}

impl RecoveryConfig {
    /// Create a configuration with the documented defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override `records_init_chunk_size` (builder pattern).
    pub fn with_records_init_chunk_size(mut self, size: u32) -> Self {
        self.records_init_chunk_size = size;
        self
    }

    /// Override `log_write_buffer_capacity` (builder pattern).
    pub fn with_log_write_buffer_capacity(mut self, capacity: usize) -> Self {
        self.log_write_buffer_capacity = capacity;
        self
    }

    /// Override `log_chunk_size` (builder pattern).
    pub fn with_log_chunk_size(mut self, size: u64) -> Self {
        self.log_chunk_size = size;
        self
    }

    /// Override `clean_window` (builder pattern).
    pub fn with_clean_window(mut self, window: u32) -> Self {
        self.clean_window = window;
        self
    }

    /// Override the restore-point geometric schedule (builder pattern).
    pub fn with_restore_point_schedule(mut self, initial_skip_ms: u64, multiplier: f64) -> Self {
        self.restore_point_initial_skip_ms = initial_skip_ms;
        self.restore_point_multiplier = multiplier;
        self
    }

    /// A configuration tuned for fast tests: tiny chunks, small windows.
    pub fn for_testing() -> Self {
        RecoveryConfig {
            records_init_chunk_size: 64,
            log_write_buffer_capacity: 16,
            log_chunk_size: 64 * 1024,
            clean_window: 4,
            restore_point_initial_skip_ms: 1_000,
            restore_point_multiplier: 2.0,
        }
    }

    /// Read overrides from the process environment, falling back to
    /// [`RecoveryConfig::default`] for anything unset or unparsable.
    ///
    /// Recognized variables: `VFS_RECORDS_INIT_CHUNK_SIZE`,
    /// `VFS_LOG_WRITE_BUFFER_CAPACITY`, `VFS_LOG_CHUNK_SIZE`,
    /// `VFS_CLEAN_WINDOW`, `VFS_RESTORE_POINT_INITIAL_SKIP_MS`,
    /// `VFS_RESTORE_POINT_MULTIPLIER`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parsed("VFS_RECORDS_INIT_CHUNK_SIZE") {
            config.records_init_chunk_size = v;
        }
        if let Some(v) = env_parsed("VFS_LOG_WRITE_BUFFER_CAPACITY") {
            config.log_write_buffer_capacity = v;
        }
        if let Some(v) = env_parsed("VFS_LOG_CHUNK_SIZE") {
            config.log_chunk_size = v;
        }
        if let Some(v) = env_parsed("VFS_CLEAN_WINDOW") {
            config.clean_window = v;
        }
        if let Some(v) = env_parsed("VFS_RESTORE_POINT_INITIAL_SKIP_MS") {
            config.restore_point_initial_skip_ms = v;
        }
        if let Some(v) = env_parsed("VFS_RESTORE_POINT_MULTIPLIER") {
            config.restore_point_multiplier = v;
        }
        config
    }

    /// The restore-point initial skip as a [`Duration`].
    pub fn restore_point_initial_skip(&self) -> Duration {
        Duration::from_millis(self.restore_point_initial_skip_ms)
    }

    /// Validate the configuration, rejecting combinations that would make
    /// the log or recovery pipeline misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_chunk_size < 4096 {
            return Err(ConfigError::ChunkSizeTooSmall);
        }
        if self.log_write_buffer_capacity == 0 {
            return Err(ConfigError::ZeroBufferCapacity);
        }
        if self.records_init_chunk_size == 0 {
            return Err(ConfigError::ZeroRecordsChunkSize);
        }
        if self.restore_point_multiplier <= 1.0 {
            return Err(ConfigError::MultiplierTooSmall);
        }
        Ok(())
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Errors produced by [`RecoveryConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `log_chunk_size` is too small to hold even a handful of records.
    #[error("log chunk size must be at least 4096 bytes")]
    ChunkSizeTooSmall,
    /// `log_write_buffer_capacity` was zero, which would make every
    /// submission run inline and defeats the write worker pool.
    #[error("log write buffer capacity must be greater than zero")]
    ZeroBufferCapacity,
    /// `records_init_chunk_size` was zero, which would never advance stage
    /// 2's sliding window.
    #[error("records init chunk size must be greater than zero")]
    ZeroRecordsChunkSize,
    /// `restore_point_multiplier` must grow the schedule, not shrink it.
    #[error("restore point multiplier must be greater than 1.0")]
    MultiplierTooSmall,
}
