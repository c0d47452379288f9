//! Embedded spatio-temporal deduplication engine.
//!
//! Decides whether an incoming geolocated event is novel: an event is a
//! duplicate when a previously seen event lies within both a distance
//! tolerance (meters on the sphere) and a time tolerance. Novel events are
//! indexed in an ordered key-value store so later events can be tested
//! against them; duplicates are suppressed.
//!
//! ```rust
//! use geodedup::{Event, FilterBuilder};
//! use std::time::{Duration, SystemTime};
//!
//! let filter = FilterBuilder::new(50.0, Duration::from_secs(600)).build()?;
//!
//! let event = Event::new(51.5074, -0.1278, SystemTime::now());
//! assert!(filter.filter(&event)?);   // novel, indexed
//! assert!(!filter.filter(&event)?);  // duplicate, suppressed
//! # Ok::<(), geodedup::FilterError>(())
//! ```
//!
//! The engine is transport-agnostic: embed it behind an HTTP handler, a
//! queue consumer, or a replay job. Candidate lookup maps coordinates onto
//! S2 cells so that one short ordered key scan per neighboring cell yields
//! every possible match, and the novelty decision runs inside a single
//! serializable transaction so concurrent near-duplicates cannot both be
//! accepted.

pub mod builder;
pub mod config;
pub mod error;
pub mod filter;
pub mod grid;
pub mod keys;
pub mod persistence;
pub mod storage;

pub use builder::FilterBuilder;
pub use config::{Config, SyncMode};
pub use error::{FilterError, Result};
pub use filter::{Event, SpatioTemporalFilter, VisitorError, DEFAULT_ENTRY_TTL};
pub use grid::{ChordAngle, EARTH_RADIUS_METERS};
pub use storage::{AofBackend, Backend, DbItem, MemoryBackend, ReadTxn, StorageOp, WriteTxn};

pub use geo::Point;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {
    pub use crate::{Event, FilterBuilder, FilterError, Result, SpatioTemporalFilter};

    pub use crate::{Config, SyncMode};

    pub use crate::{AofBackend, Backend, MemoryBackend};

    pub use std::time::{Duration, SystemTime};
}
