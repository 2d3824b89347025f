//! Dense arrays keyed by closed enumerations.
//!
//! [`EnumArray`] gives array-speed lookup for a small fixed key space, e.g.
//! the two ends of a track section. [`EnumArray2D`] does the same for a pair
//! of keys. Keys are any type deriving [`enum_map::Enum`], which guarantees a
//! contiguous, zero-based, declaration-ordered index.
//!
//! Every slot exists from construction and starts absent (`None`). Absent and
//! default-valued slots stay distinct, including across serialization.
//!
//! # Serialized layout
//!
//! - `EnumArray`: `{ cardinality, slots }`, slots in enum declaration order.
//! - `EnumArray2D`: `{ rows, columns, slots }`, slots in **row-major** order:
//!   slot `(r, c)` is at `r * columns + c`. This layout is fixed.
//!
//! # Example
//!
//! ```
//! use enum_map::Enum;
//! use track_core::enum_array::EnumArray;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Enum)]
//! enum Aspect { Stop, Caution, Clear }
//!
//! let mut speeds: EnumArray<u32, Aspect> = EnumArray::new();
//! speeds.set(Aspect::Clear, 160);
//! assert_eq!(speeds.get(Aspect::Clear), Some(&160));
//! assert_eq!(speeds.get(Aspect::Stop), None);
//! ```

use std::fmt;
use std::marker::PhantomData;

use enum_map::Enum;
use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, TrackError};

/// Fixed-size mapping from every value of `K` to an optional `V`.
pub struct EnumArray<V, K: Enum> {
    slots: Vec<Option<V>>,
    _key: PhantomData<fn() -> K>,
}

impl<V, K: Enum> EnumArray<V, K> {
    /// Create an array with every slot absent.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(K::LENGTH).collect(),
            _key: PhantomData,
        }
    }

    /// Build from values in key declaration order.
    ///
    /// The first value goes to the first key, and so on. Fewer values than
    /// keys leaves the remaining slots absent.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::Cardinality`] if there are more values than keys.
    pub fn from_values(values: impl IntoIterator<Item = V>) -> Result<Self> {
        let mut array = Self::new();
        for (index, value) in values.into_iter().enumerate() {
            if index >= K::LENGTH {
                return Err(TrackError::Cardinality {
                    expected: K::LENGTH,
                    found: index + 1,
                });
            }
            array.slots[index] = Some(value);
        }
        Ok(array)
    }

    /// Number of slots, i.e. the cardinality of `K`.
    #[must_use]
    pub const fn len(&self) -> usize {
        K::LENGTH
    }

    /// Whether `K` has no values at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        K::LENGTH == 0
    }

    /// Value at `key`, if set.
    #[must_use]
    pub fn get(&self, key: K) -> Option<&V> {
        self.slots[key.into_usize()].as_ref()
    }

    /// Mutable value at `key`, if set.
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.slots[key.into_usize()].as_mut()
    }

    /// Store `value` at `key`, returning the previous value.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        self.slots[key.into_usize()].replace(value)
    }

    /// Clear `key`, returning the previous value.
    pub fn remove(&mut self, key: K) -> Option<V> {
        self.slots[key.into_usize()].take()
    }

    /// Whether `key` holds a value.
    #[must_use]
    pub fn is_set(&self, key: K) -> bool {
        self.slots[key.into_usize()].is_some()
    }

    /// Number of populated slots.
    #[must_use]
    pub fn count_set(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Every slot in key order.
    pub fn iter(&self) -> impl Iterator<Item = (K, Option<&V>)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| (K::from_usize(index), slot.as_ref()))
    }

    /// Populated slots in key order.
    pub fn present(&self) -> impl Iterator<Item = (K, &V)> + '_ {
        self.iter().filter_map(|(key, value)| value.map(|v| (key, v)))
    }
}

impl<V: Clone + Default, K: Enum> EnumArray<V, K> {
    /// Value at `key`, or `V::default()` when absent.
    #[must_use]
    pub fn get_or_default(&self, key: K) -> V {
        self.get(key).cloned().unwrap_or_default()
    }
}

impl<V, K: Enum> Default for EnumArray<V, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone, K: Enum> Clone for EnumArray<V, K> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            _key: PhantomData,
        }
    }
}

impl<V: PartialEq, K: Enum> PartialEq for EnumArray<V, K> {
    fn eq(&self, other: &Self) -> bool {
        self.slots == other.slots
    }
}

impl<V: Eq, K: Enum> Eq for EnumArray<V, K> {}

impl<V: fmt::Debug, K: Enum + fmt::Debug> fmt::Debug for EnumArray<V, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<V: Serialize, K: Enum> Serialize for EnumArray<V, K> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("EnumArray", 2)?;
        state.serialize_field("cardinality", &K::LENGTH)?;
        state.serialize_field("slots", &self.slots)?;
        state.end()
    }
}

#[derive(Deserialize)]
#[serde(rename = "EnumArray")]
struct RawEnumArray<V> {
    cardinality: usize,
    slots: Vec<Option<V>>,
}

impl<'de, V: Deserialize<'de>, K: Enum> Deserialize<'de> for EnumArray<V, K> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawEnumArray::<V>::deserialize(deserializer)?;
        if raw.cardinality != K::LENGTH || raw.slots.len() != K::LENGTH {
            return Err(D::Error::custom(format!(
                "enum array cardinality mismatch: expected {}, found {} ({} slots)",
                K::LENGTH,
                raw.cardinality,
                raw.slots.len()
            )));
        }
        Ok(Self {
            slots: raw.slots,
            _key: PhantomData,
        })
    }
}

/// Fixed-size mapping from every `(R, C)` pair to an optional `V`.
///
/// Storage is row-major: `(r, c)` lives at `r * C::LENGTH + c`.
pub struct EnumArray2D<V, R: Enum, C: Enum> {
    slots: Vec<Option<V>>,
    _keys: PhantomData<fn() -> (R, C)>,
}

impl<V, R: Enum, C: Enum> EnumArray2D<V, R, C> {
    /// Create an array with every slot absent.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: std::iter::repeat_with(|| None)
                .take(R::LENGTH * C::LENGTH)
                .collect(),
            _keys: PhantomData,
        }
    }

    #[inline]
    fn index(row: R, column: C) -> usize {
        row.into_usize() * C::LENGTH + column.into_usize()
    }

    /// Value at `(row, column)`, if set.
    #[must_use]
    pub fn get(&self, row: R, column: C) -> Option<&V> {
        self.slots[Self::index(row, column)].as_ref()
    }

    /// Mutable value at `(row, column)`, if set.
    pub fn get_mut(&mut self, row: R, column: C) -> Option<&mut V> {
        self.slots[Self::index(row, column)].as_mut()
    }

    /// Store `value` at `(row, column)`, returning the previous value.
    pub fn set(&mut self, row: R, column: C, value: V) -> Option<V> {
        self.slots[Self::index(row, column)].replace(value)
    }

    /// Clear `(row, column)`, returning the previous value.
    pub fn remove(&mut self, row: R, column: C) -> Option<V> {
        self.slots[Self::index(row, column)].take()
    }

    /// Slots of one row, in column order.
    pub fn row(&self, row: R) -> impl Iterator<Item = (C, Option<&V>)> + '_ {
        let start = row.into_usize() * C::LENGTH;
        self.slots[start..start + C::LENGTH]
            .iter()
            .enumerate()
            .map(|(index, slot)| (C::from_usize(index), slot.as_ref()))
    }

    /// Every slot in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (R, C, Option<&V>)> + '_ {
        self.slots.iter().enumerate().map(|(index, slot)| {
            (
                R::from_usize(index / C::LENGTH),
                C::from_usize(index % C::LENGTH),
                slot.as_ref(),
            )
        })
    }
}

impl<V: Clone + Default, R: Enum, C: Enum> EnumArray2D<V, R, C> {
    /// Value at `(row, column)`, or `V::default()` when absent.
    #[must_use]
    pub fn get_or_default(&self, row: R, column: C) -> V {
        self.get(row, column).cloned().unwrap_or_default()
    }
}

impl<V, R: Enum, C: Enum> Default for EnumArray2D<V, R, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone, R: Enum, C: Enum> Clone for EnumArray2D<V, R, C> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            _keys: PhantomData,
        }
    }
}

impl<V: PartialEq, R: Enum, C: Enum> PartialEq for EnumArray2D<V, R, C> {
    fn eq(&self, other: &Self) -> bool {
        self.slots == other.slots
    }
}

impl<V: Eq, R: Enum, C: Enum> Eq for EnumArray2D<V, R, C> {}

impl<V: fmt::Debug, R: Enum + fmt::Debug, C: Enum + fmt::Debug> fmt::Debug
    for EnumArray2D<V, R, C>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(r, c, v)| ((r, c), v)))
            .finish()
    }
}

impl<V: Serialize, R: Enum, C: Enum> Serialize for EnumArray2D<V, R, C> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("EnumArray2D", 3)?;
        state.serialize_field("rows", &R::LENGTH)?;
        state.serialize_field("columns", &C::LENGTH)?;
        state.serialize_field("slots", &self.slots)?;
        state.end()
    }
}

#[derive(Deserialize)]
#[serde(rename = "EnumArray2D")]
struct RawEnumArray2D<V> {
    rows: usize,
    columns: usize,
    slots: Vec<Option<V>>,
}

impl<'de, V: Deserialize<'de>, R: Enum, C: Enum> Deserialize<'de> for EnumArray2D<V, R, C> {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawEnumArray2D::<V>::deserialize(deserializer)?;
        if raw.rows != R::LENGTH
            || raw.columns != C::LENGTH
            || raw.slots.len() != R::LENGTH * C::LENGTH
        {
            return Err(D::Error::custom(format!(
                "enum array shape mismatch: expected {}x{}, found {}x{} ({} slots)",
                R::LENGTH,
                C::LENGTH,
                raw.rows,
                raw.columns,
                raw.slots.len()
            )));
        }
        Ok(Self {
            slots: raw.slots,
            _keys: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
    enum Aspect {
        Stop,
        Caution,
        Clear,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
    enum Line {
        Main,
        Branch,
    }

    #[test]
    fn test_new_has_every_slot_absent() {
        let array: EnumArray<u32, Aspect> = EnumArray::new();
        assert_eq!(array.len(), 3);
        assert_eq!(array.count_set(), 0);
        assert!(array.iter().all(|(_, v)| v.is_none()));
    }

    #[test]
    fn test_from_values_uses_declaration_order() {
        let array: EnumArray<&str, Aspect> = EnumArray::from_values(["red", "yellow"]).unwrap();
        assert_eq!(array.get(Aspect::Stop), Some(&"red"));
        assert_eq!(array.get(Aspect::Caution), Some(&"yellow"));
        assert_eq!(array.get(Aspect::Clear), None);
    }

    #[test]
    fn test_from_values_rejects_extra_values() {
        let result: Result<EnumArray<u8, Line>> = EnumArray::from_values([1, 2, 3]);
        assert_eq!(
            result.unwrap_err(),
            TrackError::Cardinality {
                expected: 2,
                found: 3
            }
        );
    }

    #[test]
    fn test_set_remove_and_default() {
        let mut array: EnumArray<u32, Aspect> = EnumArray::new();
        assert_eq!(array.set(Aspect::Caution, 40), None);
        assert_eq!(array.set(Aspect::Caution, 60), Some(40));
        assert_eq!(array.get_or_default(Aspect::Stop), 0);
        assert_eq!(array.remove(Aspect::Caution), Some(60));
        assert!(!array.is_set(Aspect::Caution));
    }

    #[test]
    fn test_absent_and_default_stay_distinct_after_round_trip() {
        let mut array: EnumArray<u32, Aspect> = EnumArray::new();
        array.set(Aspect::Stop, 0);

        let bytes = bincode::serialize(&array).unwrap();
        let decoded: EnumArray<u32, Aspect> = bincode::deserialize(&bytes).unwrap();

        assert_eq!(decoded.get(Aspect::Stop), Some(&0));
        assert_eq!(decoded.get(Aspect::Caution), None);
        assert_eq!(decoded, array);
    }

    #[test]
    fn test_wrong_cardinality_is_rejected() {
        let mut three: EnumArray<u32, Aspect> = EnumArray::new();
        three.set(Aspect::Clear, 5);
        let text = ron::to_string(&three).unwrap();
        let decoded: std::result::Result<EnumArray<u32, Line>, _> = ron::from_str(&text);
        assert!(decoded.is_err());
    }

    #[test]
    fn test_2d_is_row_major() {
        let mut grid: EnumArray2D<u32, Line, Aspect> = EnumArray2D::new();
        grid.set(Line::Branch, Aspect::Stop, 7);
        grid.set(Line::Main, Aspect::Clear, 3);

        let order: Vec<_> = grid.iter().filter_map(|(r, c, v)| v.map(|v| (r, c, *v))).collect();
        assert_eq!(
            order,
            vec![(Line::Main, Aspect::Clear, 3), (Line::Branch, Aspect::Stop, 7)]
        );

        let row: Vec<_> = grid.row(Line::Branch).map(|(c, v)| (c, v.copied())).collect();
        assert_eq!(
            row,
            vec![
                (Aspect::Stop, Some(7)),
                (Aspect::Caution, None),
                (Aspect::Clear, None)
            ]
        );
    }

    #[test]
    fn test_2d_round_trip() {
        let mut grid: EnumArray2D<i64, Aspect, Line> = EnumArray2D::new();
        grid.set(Aspect::Caution, Line::Branch, -1);
        grid.set(Aspect::Clear, Line::Main, 0);

        let text = ron::to_string(&grid).unwrap();
        let decoded: EnumArray2D<i64, Aspect, Line> = ron::from_str(&text).unwrap();
        assert_eq!(decoded, grid);
        assert_eq!(decoded.get(Aspect::Stop, Line::Main), None);
        assert_eq!(decoded.get_or_default(Aspect::Stop, Line::Main), 0);
    }

    proptest! {
        #[test]
        fn prop_subset_round_trips(
            values in proptest::collection::vec(proptest::option::of(0u32..4), 3),
        ) {
            let mut array: EnumArray<u32, Aspect> = EnumArray::new();
            for (index, value) in values.iter().enumerate() {
                if let Some(v) = value {
                    array.set(Aspect::from_usize(index), *v);
                }
            }

            let bytes = bincode::serialize(&array).unwrap();
            let decoded: EnumArray<u32, Aspect> = bincode::deserialize(&bytes).unwrap();
            for index in 0..3 {
                let key = Aspect::from_usize(index);
                prop_assert_eq!(decoded.get(key), array.get(key));
            }
        }
    }
}
