//! Track circuit sections and their reservation state.
//!
//! A section is the unit of track over which occupancy is detected. Each
//! section has two ends, [`Alignment::Zero`] and [`Alignment::One`], and every
//! notion of direction is relative to those ends rather than to a compass.

use std::fmt;

use enum_map::Enum;
use serde::{Deserialize, Serialize};

use crate::enum_array::EnumArray;
use crate::location::WorldLocation;
use crate::math::{fixed_serde, Fixed};

/// Stable identifier of a track circuit section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectionId(pub u32);

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TC{}", self.0)
    }
}

/// Identifier of whoever holds a reservation: a train or a signal route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub u32);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// One of the two ends of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Enum)]
pub enum Alignment {
    /// End at which forward traversal begins.
    Zero,
    /// End at which forward traversal finishes.
    One,
}

impl Alignment {
    /// The other end of the same section.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }
}

/// Traversal direction through a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Enum)]
pub enum Direction {
    /// From [`Alignment::Zero`] to [`Alignment::One`].
    Forward,
    /// From [`Alignment::One`] to [`Alignment::Zero`].
    Reverse,
}

impl Direction {
    /// The opposite traversal direction.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }

    /// End a train enters the section through.
    #[must_use]
    pub const fn entry(self) -> Alignment {
        match self {
            Self::Forward => Alignment::Zero,
            Self::Reverse => Alignment::One,
        }
    }

    /// End a train leaves the section through.
    #[must_use]
    pub const fn exit(self) -> Alignment {
        self.entry().opposite()
    }

    /// Direction of travel when entering a section through `alignment`.
    #[must_use]
    pub const fn entering_at(alignment: Alignment) -> Self {
        match alignment {
            Alignment::Zero => Self::Forward,
            Alignment::One => Self::Reverse,
        }
    }
}

/// The neighbouring section end an alignment is linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// Neighbouring section.
    pub section: SectionId,
    /// End of the neighbour that touches this section.
    pub alignment: Alignment,
}

impl Connection {
    /// Create a connection.
    #[must_use]
    pub const fn new(section: SectionId, alignment: Alignment) -> Self {
        Self { section, alignment }
    }
}

/// Reservation state of a single section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReservationState {
    /// Nobody holds the section.
    #[default]
    Free,
    /// Claimed ahead of a train.
    Reserved {
        /// Holder of the claim.
        owner: OwnerId,
        /// Direction the holder will traverse.
        direction: Direction,
    },
    /// A train is physically in the section.
    Occupied {
        /// Train in the section.
        owner: OwnerId,
        /// Direction of travel.
        direction: Direction,
    },
    /// Two head-on claims wait on each other. Needs signalling intervention.
    Deadlocked {
        /// Current holder of the section.
        holder: OwnerId,
        /// Direction the holder reserved.
        direction: Direction,
        /// Owner whose opposing request could not be granted.
        contender: OwnerId,
    },
}

/// Discriminant of [`ReservationState`], used as an array key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Enum)]
pub enum StateKind {
    /// See [`ReservationState::Free`].
    Free,
    /// See [`ReservationState::Reserved`].
    Reserved,
    /// See [`ReservationState::Occupied`].
    Occupied,
    /// See [`ReservationState::Deadlocked`].
    Deadlocked,
}

impl ReservationState {
    /// Owner currently holding the section, if any.
    #[must_use]
    pub const fn holder(&self) -> Option<OwnerId> {
        match *self {
            Self::Free => None,
            Self::Reserved { owner, .. } | Self::Occupied { owner, .. } => Some(owner),
            Self::Deadlocked { holder, .. } => Some(holder),
        }
    }

    /// Direction of the current holder, if any.
    #[must_use]
    pub const fn direction(&self) -> Option<Direction> {
        match *self {
            Self::Free => None,
            Self::Reserved { direction, .. }
            | Self::Occupied { direction, .. }
            | Self::Deadlocked { direction, .. } => Some(direction),
        }
    }

    /// State discriminant.
    #[must_use]
    pub const fn kind(&self) -> StateKind {
        match self {
            Self::Free => StateKind::Free,
            Self::Reserved { .. } => StateKind::Reserved,
            Self::Occupied { .. } => StateKind::Occupied,
            Self::Deadlocked { .. } => StateKind::Deadlocked,
        }
    }

    /// Whether nobody holds the section.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        matches!(self, Self::Free)
    }
}

/// A track circuit section.
///
/// Created once from layout data and never destroyed during a session. Only
/// [`TrackCircuitSection::state`] changes while the simulation runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackCircuitSection {
    /// Stable identifier.
    pub id: SectionId,
    /// Physical length in metres.
    #[serde(with = "fixed_serde")]
    pub length: Fixed,
    /// Position of the [`Alignment::Zero`] end, when geometry supplies one.
    pub origin: Option<WorldLocation>,
    /// Neighbours, indexed by the end they attach to.
    pub connections: EnumArray<Connection, Alignment>,
    /// Current reservation state.
    pub state: ReservationState,
}

impl TrackCircuitSection {
    /// Create an unconnected, free section.
    #[must_use]
    pub fn new(id: SectionId, length: Fixed) -> Self {
        Self {
            id,
            length,
            origin: None,
            connections: EnumArray::new(),
            state: ReservationState::Free,
        }
    }

    /// Attach a world position to the section's zero end.
    #[must_use]
    pub fn with_origin(mut self, origin: WorldLocation) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Neighbour at `alignment`, if connected.
    #[must_use]
    pub fn connection(&self, alignment: Alignment) -> Option<Connection> {
        self.connections.get(alignment).copied()
    }

    /// Neighbour reached when leaving in `direction`.
    #[must_use]
    pub fn next(&self, direction: Direction) -> Option<Connection> {
        self.connection(direction.exit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_ends() {
        assert_eq!(Direction::Forward.entry(), Alignment::Zero);
        assert_eq!(Direction::Forward.exit(), Alignment::One);
        assert_eq!(Direction::Reverse.entry(), Alignment::One);
        assert_eq!(Direction::Reverse.exit(), Alignment::Zero);
        assert_eq!(Direction::entering_at(Alignment::One), Direction::Reverse);
        assert_eq!(Direction::Forward.opposite(), Direction::Reverse);
    }

    #[test]
    fn test_state_holder_and_kind() {
        let owner = OwnerId(4);
        assert_eq!(ReservationState::Free.holder(), None);
        let reserved = ReservationState::Reserved {
            owner,
            direction: Direction::Reverse,
        };
        assert_eq!(reserved.holder(), Some(owner));
        assert_eq!(reserved.direction(), Some(Direction::Reverse));
        assert_eq!(reserved.kind(), StateKind::Reserved);

        let deadlocked = ReservationState::Deadlocked {
            holder: owner,
            direction: Direction::Forward,
            contender: OwnerId(9),
        };
        assert_eq!(deadlocked.holder(), Some(owner));
        assert!(!deadlocked.is_free());
    }

    #[test]
    fn test_next_follows_exit_end() {
        let mut section = TrackCircuitSection::new(SectionId(1), Fixed::from_num(300));
        section
            .connections
            .set(Alignment::One, Connection::new(SectionId(2), Alignment::Zero));

        assert_eq!(
            section.next(Direction::Forward),
            Some(Connection::new(SectionId(2), Alignment::Zero))
        );
        assert_eq!(section.next(Direction::Reverse), None);
    }
}
