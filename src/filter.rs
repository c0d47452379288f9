//! Spatio-temporal deduplication filter.
//!
//! The filter decides whether a geolocated event is novel: no previously
//! indexed event lies within both the distance tolerance and the time
//! tolerance. Duplicates are suppressed; novel events are indexed so that
//! later events can be tested against them.
//!
//! Logical time is driven by a watermark, the maximum event time observed
//! so far. An indexed entry is expired once its timestamp falls behind
//! `watermark - interval`, which keeps the expiration policy deterministic
//! for replayed or out-of-order streams. Entries additionally carry a
//! physical store TTL as a space backstop while the stream is quiet.

use crate::error::{FilterError, Result};
use crate::grid::{self, ChordAngle, Grid, EARTH_RADIUS_METERS};
use crate::keys;
use crate::storage::{Backend, WriteTxn};
use bytes::Bytes;
use geo::Point;
use parking_lot::RwLock;
use s2::cellid::CellID;
use s2::latlng::LatLng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace};

/// Default physical retention ceiling for index entries.
///
/// Deliberately much larger than any reasonable interval tolerance: the
/// watermark governs correctness, the TTL only bounds space.
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Error type returned by an [`SpatioTemporalFilter::indexed_locations`]
/// visitor.
pub type VisitorError = Box<dyn std::error::Error + Send + Sync>;

/// A geolocated event: a WGS84 coordinate and an observation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Geographic position (`x` = longitude, `y` = latitude, degrees).
    pub point: Point,
    /// Observation time, at least second resolution.
    pub time: SystemTime,
}

impl Event {
    /// Create an event from latitude/longitude degrees.
    pub fn new(lat: f64, lng: f64, time: SystemTime) -> Self {
        Self {
            point: Point::new(lng, lat),
            time,
        }
    }

    /// Latitude in degrees.
    pub fn lat(&self) -> f64 {
        self.point.y()
    }

    /// Longitude in degrees.
    pub fn lng(&self) -> f64 {
        self.point.x()
    }
}

/// Spatio-temporal deduplication filter over an ordered key-value store.
///
/// The filter is cheap to share: all methods take `&self`, and concurrent
/// callers are serialized by the backend's transaction isolation, so two
/// simultaneous near-duplicate events cannot both be accepted as unique.
///
/// # Examples
///
/// ```rust
/// use geodedup::{Event, MemoryBackend, SpatioTemporalFilter};
/// use std::sync::Arc;
/// use std::time::{Duration, SystemTime};
///
/// # fn main() -> geodedup::Result<()> {
/// let backend = Arc::new(MemoryBackend::new());
/// let filter = SpatioTemporalFilter::new(backend, 50.0, Duration::from_secs(600))?;
///
/// let event = Event::new(51.5074, -0.1278, SystemTime::now());
/// assert!(filter.filter(&event)?);
/// assert!(!filter.filter(&event)?);
/// # Ok(())
/// # }
/// ```
pub struct SpatioTemporalFilter {
    backend: Arc<dyn Backend>,
    distance: ChordAngle,
    interval: Duration,
    entry_ttl: Duration,
    grid: Grid,
    watermark: RwLock<Option<SystemTime>>,
}

impl std::fmt::Debug for SpatioTemporalFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatioTemporalFilter")
            .field("distance", &self.distance)
            .field("interval", &self.interval)
            .field("entry_ttl", &self.entry_ttl)
            .field("grid", &self.grid)
            .field("watermark", &self.watermark)
            .finish()
    }
}

impl SpatioTemporalFilter {
    /// Create a filter with a distance tolerance in meters and a time
    /// tolerance.
    ///
    /// Fails with `InvalidArgument` if either tolerance is not positive.
    pub fn new(backend: Arc<dyn Backend>, distance: f64, interval: Duration) -> Result<Self> {
        Self::with_entry_ttl(backend, distance, interval, DEFAULT_ENTRY_TTL)
    }

    /// Create a filter with an explicit physical retention ceiling.
    ///
    /// `entry_ttl` must stay much larger than `interval`; it exists to
    /// bound store growth, not to expire entries for correctness.
    pub fn with_entry_ttl(
        backend: Arc<dyn Backend>,
        distance: f64,
        interval: Duration,
        entry_ttl: Duration,
    ) -> Result<Self> {
        if !distance.is_finite() || distance <= 0.0 {
            return Err(FilterError::InvalidArgument(
                "distance tolerance between events must be greater than zero",
            ));
        }
        if interval.is_zero() {
            return Err(FilterError::InvalidArgument(
                "time tolerance between events must be greater than zero",
            ));
        }
        if entry_ttl.is_zero() {
            return Err(FilterError::InvalidArgument(
                "entry TTL must be greater than zero",
            ));
        }

        let radians = distance / EARTH_RADIUS_METERS;
        let level = grid::level_for_tolerance(radians);
        info!(
            distance_m = distance,
            interval_s = interval.as_secs_f64(),
            level,
            "spatio-temporal filter ready"
        );

        Ok(Self {
            backend,
            distance: ChordAngle::from_radians(radians),
            interval,
            entry_ttl,
            grid: Grid::new(level),
            watermark: RwLock::new(None),
        })
    }

    /// Distance tolerance in meters.
    pub fn distance(&self) -> f64 {
        self.distance.radians() * EARTH_RADIUS_METERS
    }

    /// Time tolerance.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Grid level used for candidate-cell enumeration.
    pub fn level(&self) -> u64 {
        self.grid.level()
    }

    /// Maximum event time observed so far, or `None` before the first
    /// accepted call.
    pub fn watermark(&self) -> Option<SystemTime> {
        *self.watermark.read()
    }

    /// Process an event and decide whether it is unique.
    ///
    /// Returns `Ok(true)` when no live earlier event lies within both
    /// tolerances; the event is then indexed. Returns `Ok(false)` for a
    /// duplicate, which is a normal outcome, not an error.
    pub fn filter(&self, event: &Event) -> Result<bool> {
        let (lat, lng) = (event.lat(), event.lng());
        if !valid_coordinates(lat, lng) {
            return Err(FilterError::InvalidCoordinates { lat, lng });
        }

        let mut txn = self.backend.update()?;

        // The watermark holds the time of the most recent event. It only
        // ever advances, even when the transaction later aborts.
        {
            let mut watermark = self.watermark.write();
            if watermark.map_or(true, |w| event.time > w) {
                *watermark = Some(event.time);
            }
        }

        let pt = grid::unit_vector(lat, lng);
        for cell in self.grid.candidate_cells(lat, lng) {
            if self.scan_cell(&mut *txn, cell, pt)? {
                // Commit carries only the opportunistic deletes, if any.
                txn.commit()?;
                debug!(lat, lng, "suppressed duplicate event");
                return Ok(false);
            }
        }

        // No earlier event found: index this one. The entry is keyed by
        // the leaf cell and the event time, with a TTL backstop.
        let leaf = CellID::from(LatLng::from_degrees(lat, lng));
        let key = keys::encode_entry(leaf, event.time);
        txn.put(&key, &[], Some(self.entry_ttl))?;
        txn.commit()?;
        debug!(lat, lng, "indexed novel event");
        Ok(true)
    }

    /// Scan one candidate cell for a live entry within the distance
    /// tolerance. Expired entries encountered along the way are deleted in
    /// the surrounding transaction.
    fn scan_cell(&self, txn: &mut dyn WriteTxn, cell: CellID, pt: [f64; 3]) -> Result<bool> {
        let lo = keys::encode_prefix(cell.range_min());
        let hi = keys::encode_prefix(cell.range_max());

        // Snapshot the threshold once per scan; the watermark is monotonic,
        // so the threshold can only be conservative.
        let threshold = self.expiry_threshold();

        let mut expired: Vec<Bytes> = Vec::new();
        let mut matched = false;
        for key in txn.scan(&keys::FAMILY_PREFIX, &lo) {
            if key[..keys::PREFIX_LEN] > hi[..] {
                break;
            }

            let (entry_cell, entry_time) = keys::decode_entry(&key);

            if threshold.is_some_and(|threshold| entry_time < threshold) {
                expired.push(key);
                continue;
            }

            if ChordAngle::between(pt, grid::cell_center(entry_cell)) <= self.distance {
                matched = true;
                break;
            }
        }

        if !expired.is_empty() {
            trace!(count = expired.len(), "dropping expired index entries");
            for key in &expired {
                txn.delete(key)?;
            }
        }
        Ok(matched)
    }

    /// Enumerate the currently live indexed locations.
    ///
    /// Runs over a read-only snapshot: entries that are logically expired
    /// are skipped but never deleted here. An error returned by `visit`
    /// stops the iteration and is surfaced as `VisitorAborted`.
    pub fn indexed_locations<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(f64, f64) -> std::result::Result<(), VisitorError>,
    {
        let view = self.backend.view()?;
        let threshold = self.expiry_threshold();

        for key in view.scan(&keys::FAMILY_PREFIX, &keys::FAMILY_PREFIX) {
            let (entry_cell, entry_time) = keys::decode_entry(&key);
            if threshold.is_some_and(|threshold| entry_time < threshold) {
                continue;
            }

            let ll = LatLng::from(entry_cell);
            visit(ll.lat.deg(), ll.lng.deg()).map_err(FilterError::VisitorAborted)?;
        }
        Ok(())
    }

    fn expiry_threshold(&self) -> Option<SystemTime> {
        self.watermark
            .read()
            .and_then(|watermark| watermark.checked_sub(self.interval))
    }
}

fn valid_coordinates(lat: f64, lng: f64) -> bool {
    lat.is_finite()
        && lng.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn filter_50m_10min() -> SpatioTemporalFilter {
        let backend = Arc::new(MemoryBackend::new());
        SpatioTemporalFilter::new(backend, 50.0, Duration::from_secs(600)).unwrap()
    }

    #[test]
    fn test_constructor_rejects_bad_tolerances() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());

        for distance in [0.0, -1.0, f64::NAN] {
            let err = SpatioTemporalFilter::new(backend.clone(), distance, Duration::from_secs(1))
                .unwrap_err();
            assert!(matches!(err, FilterError::InvalidArgument(_)));
        }

        let err =
            SpatioTemporalFilter::new(backend.clone(), 50.0, Duration::ZERO).unwrap_err();
        assert!(matches!(err, FilterError::InvalidArgument(_)));
    }

    #[test]
    fn test_accessors() {
        let filter = filter_50m_10min();
        assert!((filter.distance() - 50.0).abs() < 1e-6);
        assert_eq!(filter.interval(), Duration::from_secs(600));
        assert_eq!(filter.level(), 16);
        assert!(filter.watermark().is_none());
    }

    #[test]
    fn test_invalid_coordinates_leave_no_trace() {
        let filter = filter_50m_10min();
        let now = SystemTime::now();

        for (lat, lng) in [
            (200.0, 0.0),
            (-91.0, 0.0),
            (0.0, 181.0),
            (0.0, -180.5),
            (f64::NAN, 0.0),
            (0.0, f64::INFINITY),
        ] {
            let err = filter.filter(&Event::new(lat, lng, now)).unwrap_err();
            assert!(matches!(err, FilterError::InvalidCoordinates { .. }));
        }

        assert!(filter.watermark().is_none());
        let mut count = 0;
        filter
            .indexed_locations(|_, _| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_boundary_coordinates_are_valid() {
        let filter = filter_50m_10min();
        let now = SystemTime::now();

        assert!(filter.filter(&Event::new(90.0, 180.0, now)).unwrap());
        assert!(filter.filter(&Event::new(-90.0, -180.0, now)).unwrap());
    }

    #[test]
    fn test_watermark_tracks_maximum() {
        let filter = filter_50m_10min();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        filter.filter(&Event::new(10.0, 10.0, t0)).unwrap();
        assert_eq!(filter.watermark(), Some(t0));

        // An older event does not move the watermark back.
        filter
            .filter(&Event::new(20.0, 20.0, t0 - Duration::from_secs(60)))
            .unwrap();
        assert_eq!(filter.watermark(), Some(t0));

        let t1 = t0 + Duration::from_secs(60);
        filter.filter(&Event::new(30.0, 30.0, t1)).unwrap();
        assert_eq!(filter.watermark(), Some(t1));
    }

    #[test]
    fn test_visitor_error_is_wrapped() {
        let filter = filter_50m_10min();
        filter
            .filter(&Event::new(48.8566, 2.3522, SystemTime::now()))
            .unwrap();

        let err = filter
            .indexed_locations(|_, _| Err("stop".into()))
            .unwrap_err();
        assert!(matches!(err, FilterError::VisitorAborted(_)));
    }

    #[test]
    fn test_indexed_location_matches_event_position() {
        let filter = filter_50m_10min();
        filter
            .filter(&Event::new(51.5074, -0.1278, SystemTime::now()))
            .unwrap();

        let mut seen = Vec::new();
        filter
            .indexed_locations(|lat, lng| {
                seen.push((lat, lng));
                Ok(())
            })
            .unwrap();

        assert_eq!(seen.len(), 1);
        let (lat, lng) = seen[0];
        // Leaf-cell centers are within centimeters of the event position.
        assert!((lat - 51.5074).abs() < 1e-5);
        assert!((lng - -0.1278).abs() < 1e-5);
    }
}
