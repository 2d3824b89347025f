//! Absolute world positions expressed as a tile plus a local offset.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::tile::{Tile, HALF_TILE, TILE_SIZE};

/// An absolute position: tile address plus offset from the tile centre.
///
/// Equality is exact: the same ground point written against two different
/// tiles compares unequal. Use [`WorldLocation::same_ground_position`] or
/// [`WorldLocation::nearly_equal`] when that matters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldLocation {
    /// Tile the offset is relative to.
    pub tile: Tile,
    /// East-west offset from the tile centre.
    pub x: f32,
    /// Height.
    pub y: f32,
    /// North-south offset from the tile centre.
    pub z: f32,
}

impl WorldLocation {
    /// Create a location from a tile and local offset.
    #[must_use]
    pub const fn new(tile: Tile, x: f32, y: f32, z: f32) -> Self {
        Self { tile, x, y, z }
    }

    /// Location for an absolute world position.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::TrackError::Overflow`] if `x` or `z` is outside
    /// the tile range.
    pub fn from_absolute(x: f64, y: f64, z: f64) -> Result<Self> {
        let tile = Tile::from_abs(x, z)?;
        let (cx, cz) = tile.centre_abs();
        Ok(Self::new(tile, (x - cx) as f32, y as f32, (z - cz) as f32))
    }

    /// Absolute `(x, y, z)` of this location.
    #[must_use]
    pub fn to_absolute(&self) -> (f64, f64, f64) {
        let (cx, cz) = self.tile.centre_abs();
        (
            cx + f64::from(self.x),
            f64::from(self.y),
            cz + f64::from(self.z),
        )
    }

    /// Whether all offset components are finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Canonical form of the same ground point: offsets folded into the
    /// half-open range `[-1024, 1024)` around the tile centre.
    ///
    /// Every spelling of a ground point normalizes to the same value, and
    /// normalizing twice changes nothing. The height is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::TrackError::Overflow`] for non-finite offsets
    /// or if the resulting tile index does not fit.
    pub fn normalized(&self) -> Result<Self> {
        if !self.is_finite() {
            return Err(TrackError::Overflow {
                value: f64::from(self.x) + f64::from(self.z),
            });
        }
        let (dx, x) = fold_offset(self.x);
        let (dz, z) = fold_offset(self.z);
        let tile_x = i64::from(self.tile.x).saturating_add(dx);
        let tile_z = i64::from(self.tile.z).saturating_add(dz);
        let tile = Tile::new(
            i32::try_from(tile_x).map_err(|_| overflow(tile_x))?,
            i32::try_from(tile_z).map_err(|_| overflow(tile_z))?,
        );
        Ok(Self::new(tile, x, self.y, z))
    }

    /// Same ground point expressed relative to `tile`.
    ///
    /// The offsets may end up far outside the usual tile bounds; this is
    /// meant for local computations near `tile`.
    #[must_use]
    pub fn normalized_to(&self, tile: Tile) -> Self {
        let (dx, dz) = self.tile_delta(tile);
        Self::new(
            tile,
            (dx + f64::from(self.x)) as f32,
            self.y,
            (dz + f64::from(self.z)) as f32,
        )
    }

    /// Whether both locations describe the same ground point after
    /// normalisation. Falls back to exact comparison if either cannot be
    /// normalised.
    #[must_use]
    pub fn same_ground_position(&self, other: &Self) -> bool {
        match (self.normalized(), other.normalized()) {
            (Ok(a), Ok(b)) => a == b,
            _ => self == other,
        }
    }

    /// Whether the two locations are within `tolerance` units of each other.
    #[must_use]
    pub fn nearly_equal(&self, other: &Self, tolerance: f64) -> bool {
        self.distance_squared(other) <= tolerance * tolerance
    }

    /// Squared straight-line distance.
    #[must_use]
    pub fn distance_squared(&self, other: &Self) -> f64 {
        let (dx, dy, dz) = self.delta(other);
        dx * dx + dy * dy + dz * dz
    }

    /// Straight-line distance, exact across any number of tiles.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Distance over the ground plane, ignoring height.
    #[must_use]
    pub fn horizontal_distance(&self, other: &Self) -> f64 {
        let (dx, _, dz) = self.delta(other);
        dx.hypot(dz)
    }

    /// Whether `other` lies within `radius` units.
    #[must_use]
    pub fn within(&self, other: &Self, radius: f64) -> bool {
        self.nearly_equal(other, radius)
    }

    /// Vector from `other` to `self` in `f64` world units.
    fn delta(&self, other: &Self) -> (f64, f64, f64) {
        let (tx, tz) = self.tile_delta(other.tile);
        (
            tx + f64::from(self.x) - f64::from(other.x),
            f64::from(self.y) - f64::from(other.y),
            tz + f64::from(self.z) - f64::from(other.z),
        )
    }

    /// Offset of this location's tile centre from `origin`'s tile centre.
    fn tile_delta(&self, origin: Tile) -> (f64, f64) {
        let dx = i64::from(self.tile.x) - i64::from(origin.x);
        let dz = i64::from(self.tile.z) - i64::from(origin.z);
        (dx as f64 * TILE_SIZE, dz as f64 * TILE_SIZE)
    }
}

/// Split an offset into whole tiles and a remainder in `[-HALF_TILE, HALF_TILE)`.
fn fold_offset(offset: f32) -> (i64, f32) {
    let offset = f64::from(offset);
    let tiles = ((offset + HALF_TILE) / TILE_SIZE).floor();
    let mut rest = (offset - tiles * TILE_SIZE) as f32;
    let mut tiles = tiles as i64;
    // Rounding to f32 can land exactly on the upper edge.
    if f64::from(rest) >= HALF_TILE {
        rest -= TILE_SIZE as f32;
        tiles = tiles.saturating_add(1);
    }
    (tiles, rest)
}

fn overflow(tile: i64) -> TrackError {
    TrackError::Overflow {
        value: tile as f64 * TILE_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_distance_across_tiles() {
        let a = WorldLocation::new(Tile::new(0, 0), 1000.0, 0.0, 0.0);
        let b = WorldLocation::new(Tile::new(1, 0), -1000.0, 0.0, 0.0);
        assert!((a.distance(&b) - 48.0).abs() < 1e-9);
    }

    #[test]
    fn test_distance_far_apart_keeps_precision() {
        // ~2000 km apart; offsets must still contribute exactly
        let a = WorldLocation::new(Tile::new(-500, 0), 0.25, 0.0, 0.0);
        let b = WorldLocation::new(Tile::new(500, 0), 0.5, 0.0, 0.0);
        let expected = 1000.0 * TILE_SIZE + 0.25;
        assert_eq!(a.distance(&b), expected);
    }

    #[test]
    fn test_from_absolute_and_back() {
        let loc = WorldLocation::from_absolute(5000.0, 12.0, -3000.0).unwrap();
        assert_eq!(loc.tile, Tile::new(2, -1));
        assert_eq!(loc.x, 904.0);
        assert_eq!(loc.z, -952.0);
        assert_eq!(loc.to_absolute(), (5000.0, 12.0, -3000.0));
    }

    #[test]
    fn test_from_absolute_overflow() {
        assert!(WorldLocation::from_absolute(f64::MAX, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_exact_equality_differs_from_ground_position() {
        let a = WorldLocation::new(Tile::new(0, 0), 1500.0, 3.0, 0.0);
        let b = WorldLocation::new(Tile::new(1, 0), -548.0, 3.0, 0.0);
        assert_ne!(a, b);
        assert!(a.same_ground_position(&b));
        assert!(a.nearly_equal(&b, 0.001));
    }

    #[test]
    fn test_normalized_folds_multiple_tiles() {
        let loc = WorldLocation::new(Tile::new(3, 3), -5000.0, 0.0, 2048.0);
        let n = loc.normalized().unwrap();
        assert_eq!(n.tile, Tile::new(1, 4));
        assert_eq!(n.x, -904.0);
        assert_eq!(n.z, 0.0);
    }

    #[test]
    fn test_normalized_to_other_tile() {
        let loc = WorldLocation::new(Tile::new(2, 0), 10.0, 0.0, 0.0);
        let rebased = loc.normalized_to(Tile::new(0, 0));
        assert_eq!(rebased.x, 4106.0);
        assert!(rebased.same_ground_position(&loc));
    }

    #[test]
    fn test_horizontal_distance_ignores_height() {
        let a = WorldLocation::new(Tile::new(0, 0), 0.0, 0.0, 0.0);
        let b = WorldLocation::new(Tile::new(0, 0), 3.0, 100.0, 4.0);
        assert!((a.horizontal_distance(&b) - 5.0).abs() < 1e-9);
        assert!(a.within(&b, 200.0));
        assert!(!a.within(&b, 50.0));
    }

    #[test]
    fn test_normalized_tile_edge_is_half_open() {
        let upper = WorldLocation::new(Tile::new(0, 0), 1024.0, 0.0, -1024.0);
        let n = upper.normalized().unwrap();
        assert_eq!(n.tile, Tile::new(1, 0));
        assert_eq!(n.x, -1024.0);
        assert_eq!(n.z, -1024.0);

        let lower = WorldLocation::new(Tile::new(1, 0), -1024.0, 0.0, -1024.0);
        assert_eq!(lower.normalized().unwrap(), n);
        assert_eq!(n.normalized().unwrap(), n);
    }

    #[test]
    fn test_same_ground_position_on_tile_edge() {
        let a = WorldLocation::new(Tile::new(0, 0), 1024.0, 0.0, 0.0);
        let b = WorldLocation::new(Tile::new(1, 0), -1024.0, 0.0, 0.0);
        assert_eq!(a.distance(&b), 0.0);
        assert!(a.same_ground_position(&b));
        assert!(b.same_ground_position(&a));
    }

    #[test]
    fn test_normalized_rejects_non_finite() {
        let loc = WorldLocation::new(Tile::ORIGIN, f32::NAN, 0.0, 0.0);
        assert!(!loc.is_finite());
        assert!(matches!(loc.normalized(), Err(TrackError::Overflow { .. })));

        let far = WorldLocation::new(Tile::ORIGIN, f32::MAX, 0.0, 0.0);
        assert!(matches!(far.normalized(), Err(TrackError::Overflow { .. })));
    }

    proptest! {
        #[test]
        fn prop_normalized_is_canonical(
            tx in -10_000i32..10_000, tz in -10_000i32..10_000,
            ox in -50_000.0f32..50_000.0, oz in -50_000.0f32..50_000.0,
        ) {
            let loc = WorldLocation::new(Tile::new(tx, tz), ox, 2.0, oz);
            let n = loc.normalized().unwrap();
            prop_assert!((-1024.0..1024.0).contains(&n.x));
            prop_assert!((-1024.0..1024.0).contains(&n.z));
            prop_assert_eq!(n.normalized().unwrap(), n);
            prop_assert_eq!(loc.distance(&n), 0.0);
        }

        #[test]
        fn prop_distance_symmetric_and_non_negative(
            ax in -10_000i32..10_000, az in -10_000i32..10_000,
            bx in -10_000i32..10_000, bz in -10_000i32..10_000,
            ox in -1024.0f32..1024.0, oz in -1024.0f32..1024.0,
        ) {
            let a = WorldLocation::new(Tile::new(ax, az), ox, 0.0, oz);
            let b = WorldLocation::new(Tile::new(bx, bz), oz, 1.0, ox);
            prop_assert!(a.distance(&b) >= 0.0);
            prop_assert_eq!(a.distance(&b), b.distance(&a));
        }
    }
}
