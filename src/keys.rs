//! Index key codec.
//!
//! Every index entry is keyed as
//! `[family byte] ‖ [cell ID, 8 bytes BE] ‖ [unix seconds, 8 bytes BE]`
//! with an empty value. Big-endian encoding makes lexicographic byte order
//! on keys coincide with numeric order on cell IDs, so the closed interval
//! `[encode_prefix(range_min), encode_prefix(range_max)]` of a cell is a
//! contiguous scan window over exactly the leaf cells it contains.
//!
//! Cell IDs are always taken at the maximum (leaf) level, so key order is
//! Hilbert order on leaf cells.

use s2::cellid::CellID;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Family byte reserved for the spatio-temporal location index. Other
/// index families sharing the store must use a different value.
pub const LOCATION_FAMILY: u8 = 0x01;

/// One-byte scan prefix covering the whole location family.
pub const FAMILY_PREFIX: [u8; 1] = [LOCATION_FAMILY];

const CELL_ID_LEN: usize = 8;
const TIMESTAMP_LEN: usize = 8;

/// Length of a cell-range prefix: family byte + cell ID.
pub const PREFIX_LEN: usize = 1 + CELL_ID_LEN;

/// Length of a full entry key: family byte + cell ID + timestamp.
pub const ENTRY_LEN: usize = PREFIX_LEN + TIMESTAMP_LEN;

/// Encode a full index entry key for a leaf cell and an event time.
///
/// Time is truncated to second resolution; times before the unix epoch
/// clamp to second zero.
pub fn encode_entry(id: CellID, t: SystemTime) -> [u8; ENTRY_LEN] {
    let mut buf = [0u8; ENTRY_LEN];
    buf[0] = LOCATION_FAMILY;
    buf[1..PREFIX_LEN].copy_from_slice(&id.0.to_be_bytes());
    buf[PREFIX_LEN..].copy_from_slice(&unix_seconds(t).to_be_bytes());
    buf
}

/// Encode a range-scan bound for a cell.
///
/// Pass `cell.range_min()` or `cell.range_max()` to obtain the lower or
/// upper bound of the cell's contiguous key window.
pub fn encode_prefix(id: CellID) -> [u8; PREFIX_LEN] {
    let mut buf = [0u8; PREFIX_LEN];
    buf[0] = LOCATION_FAMILY;
    buf[1..].copy_from_slice(&id.0.to_be_bytes());
    buf
}

/// Decode an entry key back into its leaf cell and timestamp.
///
/// The caller only feeds keys obtained from its own iterator; a key of the
/// wrong length or family is a programmer error and panics.
pub fn decode_entry(key: &[u8]) -> (CellID, SystemTime) {
    assert_eq!(key.len(), ENTRY_LEN, "index key must be {ENTRY_LEN} bytes");
    assert_eq!(key[0], LOCATION_FAMILY, "unexpected key family {:#04x}", key[0]);

    let id = u64::from_be_bytes(key[1..PREFIX_LEN].try_into().unwrap());
    let secs = u64::from_be_bytes(key[PREFIX_LEN..].try_into().unwrap());
    (CellID(id), UNIX_EPOCH + Duration::from_secs(secs))
}

fn unix_seconds(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
