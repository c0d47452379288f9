//! Spherical grid: candidate-cell enumeration and angular tolerances.
//!
//! The grid level is derived from the S2 minimum-edge metric so that a
//! cell edge at the configured level is never shorter than the distance
//! tolerance. Any earlier event within tolerance of a point therefore
//! lies in the point's home cell or one of its eight neighbors, and the
//! nine-cell scan is complete.
//!
//! ```text
//! +---+---+---+
//! | 1 | 2 | 3 |
//! +---+---+---+
//! | 4 | 0 | 5 |
//! +---+---+---+
//! | 6 | 7 | 8 |
//! +---+---+---+
//! ```
//!
//! Tolerance comparisons run in squared-chord space, which needs no
//! trigonometry per comparison.

use s2::cellid::CellID;
use s2::latlng::LatLng;

/// Mean Earth radius in meters used for all distance/angle conversions.
pub const EARTH_RADIUS_METERS: f64 = 6_371_010.0;

/// Deepest cell level of the hierarchy (leaf cells).
pub const MAX_LEVEL: u64 = 30;

/// Derivative of the S2 minimum-edge metric for the quadratic projection:
/// the minimum edge length of a level-`k` cell is `DERIV * 2^-k` radians.
const MIN_EDGE_DERIV: f64 = 2.0 * std::f64::consts::SQRT_2 / 3.0;

/// The finest level whose minimum cell edge is still at least `radians`.
///
/// This is the level at which the nine-cell neighborhood around a point is
/// guaranteed to cover every location within `radians` of it.
pub fn level_for_tolerance(radians: f64) -> u64 {
    if radians >= MIN_EDGE_DERIV {
        return 0;
    }
    let level = (MIN_EDGE_DERIV / radians).log2().floor() as i64;
    level.clamp(0, MAX_LEVEL as i64) as u64
}

/// Squared chord length of a spherical angle.
///
/// Stores `|p1 - p2|^2` for two unit vectors subtending the angle, which
/// is monotone in the angle on `[0, pi]` and lets the hot path compare
/// distances without `acos`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct ChordAngle(f64);

impl ChordAngle {
    /// Chord angle subtending `radians` on the unit sphere.
    pub fn from_radians(radians: f64) -> Self {
        let chord = 2.0 * (radians / 2.0).sin();
        ChordAngle(chord * chord)
    }

    /// Convert back to radians.
    pub fn radians(self) -> f64 {
        2.0 * (self.0.sqrt() / 2.0).asin()
    }

    /// Chord angle between two unit vectors.
    pub(crate) fn between(a: [f64; 3], b: [f64; 3]) -> Self {
        let dx = a[0] - b[0];
        let dy = a[1] - b[1];
        let dz = a[2] - b[2];
        ChordAngle(dx * dx + dy * dy + dz * dz)
    }
}

/// Unit-sphere vector for a coordinate pair in degrees.
pub(crate) fn unit_vector(lat_deg: f64, lng_deg: f64) -> [f64; 3] {
    let lat = lat_deg.to_radians();
    let lng = lng_deg.to_radians();
    [
        lat.cos() * lng.cos(),
        lat.cos() * lng.sin(),
        lat.sin(),
    ]
}

/// Unit-sphere vector for the center of a cell.
pub(crate) fn cell_center(id: CellID) -> [f64; 3] {
    let ll = LatLng::from(id);
    unit_vector(ll.lat.deg(), ll.lng.deg())
}

/// Candidate-cell enumerator at a fixed level.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Grid {
    level: u64,
}

impl Grid {
    pub fn new(level: u64) -> Self {
        Grid { level }
    }

    pub fn level(&self) -> u64 {
        self.level
    }

    /// The home cell of `(lat, lng)` followed by its eight neighbors at
    /// the grid level. Order is irrelevant to callers.
    pub fn candidate_cells(&self, lat: f64, lng: f64) -> Vec<CellID> {
        let home = CellID::from(LatLng::from_degrees(lat, lng)).parent(self.level);
        let mut cells = Vec::with_capacity(9);
        cells.push(home);
        cells.extend(home.all_neighbors(self.level));
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_fifty_meters() {
        let rad = 50.0 / EARTH_RADIUS_METERS;
        let level = level_for_tolerance(rad);
        assert_eq!(level, 16);

        // The chosen level covers the tolerance; one level finer does not.
        let min_edge = |level: u64| MIN_EDGE_DERIV / (1u64 << level) as f64;
        assert!(min_edge(level) >= rad);
        assert!(min_edge(level + 1) < rad);
    }

    #[test]
    fn test_level_clamps() {
        assert_eq!(level_for_tolerance(1.0), 0);
        assert_eq!(level_for_tolerance(1e-12), MAX_LEVEL);
    }

    #[test]
    fn test_level_monotone_in_tolerance() {
        let mut prev = MAX_LEVEL;
        for meters in [1.0, 10.0, 100.0, 1_000.0, 10_000.0, 100_000.0] {
            let level = level_for_tolerance(meters / EARTH_RADIUS_METERS);
            assert!(level <= prev);
            prev = level;
        }
    }

    #[test]
    fn test_chord_angle_round_trip() {
        for radians in [1e-6, 1e-3, 0.1, 1.0, 3.0] {
            let back = ChordAngle::from_radians(radians).radians();
            assert!((back - radians).abs() < 1e-9, "{radians} -> {back}");
        }
    }

    #[test]
    fn test_chord_angle_orders_distances() {
        let origin = unit_vector(51.5074, -0.1278);
        let near = unit_vector(51.5074, -0.1279); // ~7 m
        let far = unit_vector(51.5080, -0.1278); // ~67 m

        let tolerance = ChordAngle::from_radians(50.0 / EARTH_RADIUS_METERS);
        assert!(ChordAngle::between(origin, near) <= tolerance);
        assert!(ChordAngle::between(origin, far) > tolerance);
    }

    #[test]
    fn test_nine_candidate_cells() {
        let grid = Grid::new(16);
        let cells = grid.candidate_cells(51.5074, -0.1278);
        assert_eq!(cells.len(), 9);

        let mut ids: Vec<u64> = cells.iter().map(|c| c.0).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 9, "candidate cells must be distinct");
    }

    #[test]
    fn test_home_cell_contains_point() {
        let grid = Grid::new(16);
        let cells = grid.candidate_cells(40.7128, -74.0060);
        let leaf = CellID::from(LatLng::from_degrees(40.7128, -74.0060));

        let home = cells[0];
        assert!(home.range_min().0 <= leaf.0 && leaf.0 <= home.range_max().0);
    }

    #[test]
    fn test_cell_center_is_unit_length() {
        let id = CellID::from(LatLng::from_degrees(35.0, 139.0));
        let v = cell_center(id);
        let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        assert!((norm - 1.0).abs() < 1e-12);
    }
}
