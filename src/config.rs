//! Engine configuration.
//!
//! `Config` carries the knobs the surrounding runner sources from its
//! environment or files: the store location, the two tolerances, and the
//! physical retention ceiling. It is serializable so deployments can load
//! it from JSON.

use crate::error::{FilterError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// File synchronization strategy for the durable backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Call `fsync` / `File::sync_all` to persist metadata + data.
    #[default]
    All,
    /// Call `fdatasync` / `File::sync_data` to persist data only.
    Data,
}

/// Deduplication engine configuration.
///
/// # Example
///
/// ```rust
/// use geodedup::Config;
///
/// let json = r#"{
///     "distance_tolerance": 50.0,
///     "interval_tolerance_secs": 600.0
/// }"#;
/// let config = Config::from_json(json).unwrap();
/// assert_eq!(config.interval_tolerance().unwrap().as_secs(), 600);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for the store's append-only log. `None` keeps the index
    /// in memory only.
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Distance tolerance between events, in meters. Must be positive.
    pub distance_tolerance: f64,

    /// Time tolerance between events, in seconds. Must be positive.
    pub interval_tolerance_secs: f64,

    /// Physical retention ceiling for index entries, in seconds.
    ///
    /// A space backstop, not a correctness knob: logical expiry is driven
    /// by the watermark and the interval tolerance. Keep this much larger
    /// than `interval_tolerance_secs`.
    #[serde(default = "Config::default_entry_ttl_secs")]
    pub entry_ttl_secs: f64,

    /// Controls whether the durable backend issues `fsync` or `fdatasync`.
    #[serde(default)]
    pub sync_mode: SyncMode,
}

impl Config {
    const fn default_entry_ttl_secs() -> f64 {
        24.0 * 60.0 * 60.0
    }

    /// Create a configuration with the two required tolerances.
    pub fn new(distance_tolerance: f64, interval_tolerance: Duration) -> Self {
        Self {
            db_path: None,
            distance_tolerance,
            interval_tolerance_secs: interval_tolerance.as_secs_f64(),
            entry_ttl_secs: Self::default_entry_ttl_secs(),
            sync_mode: SyncMode::default(),
        }
    }

    /// Persist the index under the given directory.
    pub fn with_db_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Override the physical retention ceiling.
    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl_secs = ttl.as_secs_f64();
        self
    }

    /// Select the sync strategy for the durable backend.
    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Get the interval tolerance as a `Duration`, if representable.
    pub fn interval_tolerance(&self) -> Option<Duration> {
        duration_from_secs(self.interval_tolerance_secs)
    }

    /// Get the entry TTL as a `Duration`, if representable.
    pub fn entry_ttl(&self) -> Option<Duration> {
        duration_from_secs(self.entry_ttl_secs)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if !self.distance_tolerance.is_finite() || self.distance_tolerance <= 0.0 {
            return Err(FilterError::InvalidArgument(
                "distance tolerance between events must be greater than zero",
            ));
        }
        if self.interval_tolerance().is_none() {
            return Err(FilterError::InvalidArgument(
                "time tolerance between events must be greater than zero",
            ));
        }
        if self.entry_ttl().is_none() {
            return Err(FilterError::InvalidArgument(
                "entry TTL must be greater than zero",
            ));
        }
        if self.entry_ttl_secs < self.interval_tolerance_secs {
            tracing::warn!(
                entry_ttl_secs = self.entry_ttl_secs,
                interval_tolerance_secs = self.interval_tolerance_secs,
                "entry TTL is below the interval tolerance; live entries may be dropped early"
            );
        }
        Ok(())
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        use serde::de::Error;

        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(serde_json::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as a JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn duration_from_secs(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 && secs <= u64::MAX as f64 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
