//! Tiled partition of the world ground plane.
//!
//! The world is cut into square tiles of [`TILE_SIZE`] units. Tile `(0, 0)` is
//! centred on the world origin, so each tile covers roughly
//! `[t * 2048 - 1024, t * 2048 + 1024]` on each axis. Positions are stored as a
//! tile address plus a small local offset (see [`crate::location`]), which keeps
//! `f32` offsets precise no matter how far from the origin a train runs.
//!
//! # Example
//!
//! ```
//! use track_core::tile::{tile_from_abs, Tile, Zoom};
//!
//! assert_eq!(tile_from_abs(1023.99).unwrap(), 0);
//! assert_eq!(tile_from_abs(1024.0).unwrap(), 1);
//! assert_eq!(tile_from_abs(-1024.0).unwrap(), -1);
//! assert!(tile_from_abs(f64::MAX).is_err());
//!
//! let bucket = Tile::new(-3, 9).snap(Zoom::Large);
//! assert_eq!(bucket, Tile::new(-8, 8));
//! ```

use std::cmp::Ordering;
use std::fmt;

use enum_map::Enum;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};

/// Edge length of a tile in world units.
pub const TILE_SIZE: f64 = 2048.0;

/// Half of [`TILE_SIZE`]; local offsets stay within +/- this value.
pub const HALF_TILE: f64 = TILE_SIZE / 2.0;

/// Converts an absolute coordinate to its tile index.
///
/// The coordinate is truncated to whole half-tiles, then halved with
/// midpoint rounding away from zero. Boundary values therefore belong to the
/// tile further from the origin: `1024 -> 1` and `-1024 -> -1`.
///
/// # Errors
///
/// Returns [`TrackError::Overflow`] for non-finite input or when the number
/// of half-tiles does not fit in an `i32`.
pub fn tile_from_abs(value: f64) -> Result<i32> {
    let half_tiles = (value / HALF_TILE).trunc();
    if !half_tiles.is_finite()
        || half_tiles > f64::from(i32::MAX)
        || half_tiles < f64::from(i32::MIN)
    {
        return Err(TrackError::Overflow { value });
    }

    let n = half_tiles as i64;
    let tile = (n + n.signum()) / 2;
    i32::try_from(tile).map_err(|_| TrackError::Overflow { value })
}

/// Absolute coordinate of the centre of tile index `tile`.
#[must_use]
pub fn tile_to_abs(tile: i32) -> f64 {
    f64::from(tile) * TILE_SIZE
}

/// Level-of-detail buckets used for coarse spatial paging.
///
/// Each level groups a square of `2^shift` tiles per edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Enum)]
pub enum Zoom {
    /// One tile per bucket (2 km terrain tiles).
    Small,
    /// 8x8 tiles per bucket (16 km terrain tiles).
    Large,
    /// 8x8 tiles per bucket, distant mountain small pages.
    DistantMountainSmall,
    /// 64x64 tiles per bucket, distant mountain large pages.
    DistantMountainLarge,
}

impl Zoom {
    /// Log2 of the bucket edge in tiles.
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Small => 0,
            Self::Large | Self::DistantMountainSmall => 3,
            Self::DistantMountainLarge => 6,
        }
    }

    /// Bucket edge in tiles.
    #[must_use]
    pub const fn bucket_edge(self) -> i32 {
        1 << self.shift()
    }
}

/// Integer address of a tile on the ground plane.
///
/// Ordering is `z` major, `x` minor, which is the row order used when tiles
/// are paged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Tile {
    /// East-west tile index.
    pub x: i32,
    /// North-south tile index.
    pub z: i32,
}

impl Tile {
    /// The tile containing the world origin.
    pub const ORIGIN: Self = Self { x: 0, z: 0 };

    /// Create a tile address.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Tile containing the absolute ground position `(x, z)`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::Overflow`] if either coordinate is out of range.
    pub fn from_abs(x: f64, z: f64) -> Result<Self> {
        Ok(Self::new(tile_from_abs(x)?, tile_from_abs(z)?))
    }

    /// Absolute `(x, z)` of the tile centre.
    #[must_use]
    pub fn centre_abs(self) -> (f64, f64) {
        (tile_to_abs(self.x), tile_to_abs(self.z))
    }

    /// Tile displaced by `(dx, dz)` tiles, saturating at the index range.
    #[must_use]
    pub const fn offset(self, dx: i32, dz: i32) -> Self {
        Self::new(self.x.saturating_add(dx), self.z.saturating_add(dz))
    }

    /// Representative tile of the bucket containing `self` at `zoom`.
    ///
    /// Both components are floored to a multiple of the bucket edge, so
    /// negative tiles round toward negative infinity. Snapping an already
    /// snapped tile returns it unchanged.
    #[must_use]
    pub const fn snap(self, zoom: Zoom) -> Self {
        let shift = zoom.shift();
        Self::new((self.x >> shift) << shift, (self.z >> shift) << shift)
    }

    /// Combined ordering key, `z` major and `x` minor.
    #[must_use]
    pub const fn rank(self) -> i64 {
        ((self.z as i64) << 32) + (self.x as i64 - i32::MIN as i64)
    }
}

impl Ord for Tile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.z.cmp(&other.z).then_with(|| self.x.cmp(&other.x))
    }
}

impl PartialOrd for Tile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tile_from_abs_boundaries() {
        assert_eq!(tile_from_abs(0.0).unwrap(), 0);
        assert_eq!(tile_from_abs(1023.99).unwrap(), 0);
        assert_eq!(tile_from_abs(1024.0).unwrap(), 1);
        assert_eq!(tile_from_abs(-1023.99).unwrap(), 0);
        assert_eq!(tile_from_abs(-1024.0).unwrap(), -1);
        assert_eq!(tile_from_abs(3071.0).unwrap(), 1);
        assert_eq!(tile_from_abs(3072.0).unwrap(), 2);
        assert_eq!(tile_from_abs(-3072.0).unwrap(), -2);
    }

    #[test]
    fn test_tile_from_abs_overflow() {
        assert_eq!(
            tile_from_abs(f64::MAX),
            Err(TrackError::Overflow { value: f64::MAX })
        );
        assert!(tile_from_abs(f64::MIN).is_err());
        assert!(tile_from_abs(f64::INFINITY).is_err());
        assert!(tile_from_abs(f64::NAN).is_err());
    }

    #[test]
    fn test_snap_negative_tiles_floor() {
        assert_eq!(Tile::new(-1, -1).snap(Zoom::Large), Tile::new(-8, -8));
        assert_eq!(Tile::new(7, 8).snap(Zoom::Large), Tile::new(0, 8));
        assert_eq!(Tile::new(7, 8).snap(Zoom::Small), Tile::new(7, 8));
        assert_eq!(
            Tile::new(100, -65).snap(Zoom::DistantMountainLarge),
            Tile::new(64, -128)
        );
    }

    #[test]
    fn test_ordering_is_z_major() {
        let mut tiles = vec![Tile::new(5, 0), Tile::new(-5, 1), Tile::new(0, 0)];
        tiles.sort();
        assert_eq!(tiles, vec![Tile::new(0, 0), Tile::new(5, 0), Tile::new(-5, 1)]);
    }

    #[test]
    fn test_zoom_bucket_edges() {
        assert_eq!(Zoom::Small.bucket_edge(), 1);
        assert_eq!(Zoom::Large.bucket_edge(), 8);
        assert_eq!(Zoom::DistantMountainLarge.bucket_edge(), 64);
    }

    fn arb_tile() -> impl Strategy<Value = Tile> {
        (-1_000_000i32..1_000_000, -1_000_000i32..1_000_000).prop_map(|(x, z)| Tile::new(x, z))
    }

    fn arb_zoom() -> impl Strategy<Value = Zoom> {
        prop_oneof![
            Just(Zoom::Small),
            Just(Zoom::Large),
            Just(Zoom::DistantMountainSmall),
            Just(Zoom::DistantMountainLarge),
        ]
    }

    proptest! {
        #[test]
        fn prop_tile_round_trips_through_abs(t in -1_000_000i32..1_000_000) {
            prop_assert_eq!(tile_from_abs(tile_to_abs(t)).unwrap(), t);
        }

        #[test]
        fn prop_tile_contains_its_offset(v in -1.0e9f64..1.0e9) {
            let t = tile_from_abs(v).unwrap();
            let local = v - tile_to_abs(t);
            prop_assert!(local > -HALF_TILE - 1.0 && local < HALF_TILE + 1.0);
        }

        #[test]
        fn prop_order_consistent_with_eq(a in arb_tile(), b in arb_tile()) {
            prop_assert_eq!(a.cmp(&b) == Ordering::Equal, a == b);
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
            prop_assert_eq!(a.cmp(&b), a.rank().cmp(&b.rank()));
        }

        #[test]
        fn prop_order_transitive(a in arb_tile(), b in arb_tile(), c in arb_tile()) {
            if a <= b && b <= c {
                prop_assert!(a <= c);
            }
        }

        #[test]
        fn prop_snap_idempotent(t in arb_tile(), zoom in arb_zoom()) {
            let once = t.snap(zoom);
            prop_assert_eq!(once.snap(zoom), once);
            prop_assert!(once.x <= t.x && t.x - once.x < zoom.bucket_edge());
            prop_assert!(once.z <= t.z && t.z - once.z < zoom.bucket_edge());
        }
    }
}
