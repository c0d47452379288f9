//! Error types for the deduplication engine.
//!
//! The taxonomy is flat: argument and coordinate validation, the backend
//! kinds (`Io`, `InvalidFormat`, `UnexpectedEof`, `InvalidTimestamp`,
//! `Conflict`), and visitor abortion. A duplicate event is not an error;
//! `filter` reports it as `Ok(false)`.

use thiserror::Error;

/// Errors produced by the filter engine and its storage backends.
#[derive(Error, Debug)]
pub enum FilterError {
    /// Construction-time validation failure (non-positive tolerance).
    #[error("filter: {0}")]
    InvalidArgument(&'static str),

    /// Latitude/longitude out of range or non-finite.
    #[error("filter: invalid coordinates [{lat}, {lng}]")]
    InvalidCoordinates { lat: f64, lng: f64 },

    /// I/O failure in the backing store.
    #[error("backend i/o: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted log record is malformed.
    #[error("backend: log record is malformed")]
    InvalidFormat,

    /// Log ended in the middle of a record.
    #[error("backend: unexpected end of log")]
    UnexpectedEof,

    /// Timestamp not representable as unix seconds.
    #[error("backend: timestamp before unix epoch")]
    InvalidTimestamp,

    /// Transaction lost a write conflict after the backend's retry bound.
    ///
    /// The bundled backends serialize writers with a lock and never return
    /// this; it is part of the contract for stores that can abort.
    #[error("backend: transaction conflict")]
    Conflict,

    /// An `indexed_locations` visitor returned an error; iteration stopped.
    #[error("visitor aborted: {0}")]
    VisitorAborted(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FilterError>;
