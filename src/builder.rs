//! Filter builder.
//!
//! Wires a storage backend to the filter: in-memory by default, durable
//! when a database directory is configured.

use crate::config::{Config, SyncMode};
use crate::error::Result;
use crate::filter::{SpatioTemporalFilter, DEFAULT_ENTRY_TTL};
use crate::storage::{AofBackend, MemoryBackend};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const LOG_FILE_NAME: &str = "locations.aof";

/// Builder for [`SpatioTemporalFilter`] with backend selection.
#[derive(Debug)]
pub struct FilterBuilder {
    db_path: Option<PathBuf>,
    distance: f64,
    interval: Duration,
    entry_ttl: Duration,
    sync_mode: SyncMode,
}

impl FilterBuilder {
    /// Start a builder with the two required tolerances: distance in
    /// meters and the time interval.
    pub fn new(distance: f64, interval: Duration) -> Self {
        Self {
            db_path: None,
            distance,
            interval,
            entry_ttl: DEFAULT_ENTRY_TTL,
            sync_mode: SyncMode::default(),
        }
    }

    /// Start a builder from a loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            db_path: config.db_path.clone(),
            distance: config.distance_tolerance,
            // validate() guarantees both durations are representable.
            interval: config.interval_tolerance().unwrap_or_default(),
            entry_ttl: config.entry_ttl().unwrap_or(DEFAULT_ENTRY_TTL),
            sync_mode: config.sync_mode,
        })
    }

    /// Persist the index under `path` (a directory, created if needed).
    pub fn db_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Keep the index in memory only.
    pub fn in_memory(mut self) -> Self {
        self.db_path = None;
        self
    }

    /// Override the physical retention ceiling for index entries.
    pub fn entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Select the sync strategy for the durable backend.
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Build the filter, opening the durable backend if configured.
    pub fn build(self) -> Result<SpatioTemporalFilter> {
        let backend: Arc<dyn crate::storage::Backend> = match self.db_path {
            Some(dir) => {
                std::fs::create_dir_all(&dir)?;
                Arc::new(AofBackend::open_with_sync(
                    dir.join(LOG_FILE_NAME),
                    self.sync_mode,
                )?)
            }
            None => Arc::new(MemoryBackend::new()),
        };

        SpatioTemporalFilter::with_entry_ttl(backend, self.distance, self.interval, self.entry_ttl)
    }
}
