//! The track circuit section graph and its reservation state machine.
//!
//! Sections live in an arena keyed by [`SectionId`]; adjacency is stored as id
//! pairs, never as references. Every reservation change goes through
//! [`TrackNetwork::try_reserve`], [`TrackNetwork::occupy`] or
//! [`TrackNetwork::release`], which take `&mut self`, so a single writer
//! mutates the graph at any time. [`SharedNetwork`] extends that discipline to
//! callers on several threads.
//!
//! # State machine
//!
//! ```text
//! Free --try_reserve--> Reserved --occupy--> Occupied --release--> Free
//!                          |   \------------release-----------------^
//!                          | head-on wait cycle detected
//!                          v
//!                      Deadlocked --clear_deadlock--> Reserved
//!                          \--------release (holder)--> Free
//! ```
//!
//! Deadlocks are only detected and reported. Deciding which side gives way is
//! the signalling layer's job.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::data::NetworkLayout;
use crate::enum_array::EnumArray2D;
use crate::error::{ownership_violation, Result, TrackError};
use crate::location::WorldLocation;
use crate::section::{
    Alignment, Connection, Direction, OwnerId, ReservationState, SectionId, StateKind,
    TrackCircuitSection,
};
use crate::tile::{Tile, Zoom};

/// Result of a successful reservation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReserveOutcome {
    /// The section was free and is now reserved.
    Acquired,
    /// The requester already held the section in the same direction.
    AlreadyHeld,
}

/// Reservation changes, collected for the signalling layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkEvent {
    /// A free section was reserved.
    Reserved {
        /// Section reserved.
        section: SectionId,
        /// New holder.
        owner: OwnerId,
        /// Reserved direction.
        direction: Direction,
    },
    /// A train entered a section.
    Occupied {
        /// Section entered.
        section: SectionId,
        /// Train.
        owner: OwnerId,
    },
    /// A section returned to free.
    Released {
        /// Section released.
        section: SectionId,
        /// Former holder.
        owner: OwnerId,
    },
    /// Two head-on claims wait on each other.
    DeadlockDetected {
        /// Section marked deadlocked.
        section: SectionId,
        /// Holder of that section.
        holder: OwnerId,
        /// Owner refused on it.
        contender: OwnerId,
    },
    /// External intervention returned a deadlocked section to its holder.
    DeadlockCleared {
        /// Section cleared.
        section: SectionId,
        /// Holder that keeps the reservation.
        holder: OwnerId,
    },
}

/// A refused head-on request that may become half of a deadlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct HeadOnWait {
    pub(crate) section: SectionId,
    pub(crate) holder: OwnerId,
}

/// Counts of sections by state, for display and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReservationSummary {
    /// Sections nobody holds.
    pub free: usize,
    /// Held sections keyed by state and direction.
    pub held: EnumArray2D<usize, StateKind, Direction>,
}

impl ReservationSummary {
    /// Number of held sections in `kind`, summed over both directions.
    #[must_use]
    pub fn held_in(&self, kind: StateKind) -> usize {
        self.held.row(kind).filter_map(|(_, count)| count).sum()
    }
}

/// Arena of track circuit sections plus reservation bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct TrackNetwork {
    pub(crate) sections: BTreeMap<SectionId, TrackCircuitSection>,
    /// Refused head-on requests by requester.
    pub(crate) waits: BTreeMap<OwnerId, HeadOnWait>,
    pub(crate) generation: u64,
    events: Vec<NetworkEvent>,
}

impl TrackNetwork {
    /// Create an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a network from layout data.
    ///
    /// # Errors
    ///
    /// Fails on duplicate section ids, unknown ids in connections or ends
    /// connected twice.
    pub fn from_layout(layout: &NetworkLayout) -> Result<Self> {
        let mut network = Self::new();
        for data in &layout.sections {
            let mut section = TrackCircuitSection::new(SectionId(data.id), data.length.0);
            section.origin = data.origin;
            network.add_section(section)?;
        }
        for link in &layout.connections {
            network.connect(
                SectionId(link.from.0),
                link.from.1,
                SectionId(link.to.0),
                link.to.1,
            )?;
        }
        tracing::info!(
            sections = network.len(),
            connections = layout.connections.len(),
            "Track network loaded"
        );
        Ok(network)
    }

    /// Add a section.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::DuplicateSection`] if the id is taken.
    pub fn add_section(&mut self, section: TrackCircuitSection) -> Result<()> {
        if self.sections.contains_key(&section.id) {
            return Err(TrackError::DuplicateSection(section.id));
        }
        self.sections.insert(section.id, section);
        self.generation += 1;
        Ok(())
    }

    /// Link `a` at `align_a` with `b` at `align_b`, in both directions.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::AlreadyConnected`] if either end is taken, and
    /// [`TrackError::SectionNotFound`] for unknown ids. Nothing is linked on
    /// failure.
    pub fn connect(
        &mut self,
        a: SectionId,
        align_a: Alignment,
        b: SectionId,
        align_b: Alignment,
    ) -> Result<()> {
        if a == b && align_a == align_b {
            return Err(TrackError::InvalidState(format!(
                "cannot connect {a} {align_a:?} to itself"
            )));
        }
        for (id, alignment) in [(a, align_a), (b, align_b)] {
            if self.section_ref(id)?.connections.is_set(alignment) {
                return Err(TrackError::AlreadyConnected {
                    section: id,
                    alignment,
                });
            }
        }

        self.section_mut(a)?
            .connections
            .set(align_a, Connection::new(b, align_b));
        self.section_mut(b)?
            .connections
            .set(align_b, Connection::new(a, align_a));
        self.generation += 1;
        Ok(())
    }

    /// Reserve `id` for `owner` travelling in `direction`.
    ///
    /// Succeeds when the section is free, or already held by `owner` in the
    /// same direction. Any other state is a conflict and the section is left
    /// as it was, except that a head-on wait cycle between two owners marks
    /// the contended section [`ReservationState::Deadlocked`].
    ///
    /// # Errors
    ///
    /// [`TrackError::Conflict`] when someone else holds the section,
    /// [`TrackError::SectionNotFound`] for unknown ids.
    pub fn try_reserve(
        &mut self,
        id: SectionId,
        owner: OwnerId,
        direction: Direction,
    ) -> Result<ReserveOutcome> {
        let state = self.section_ref(id)?.state;
        match state {
            ReservationState::Free => {
                self.section_mut(id)?.state = ReservationState::Reserved { owner, direction };
                self.waits.remove(&owner);
                self.record(NetworkEvent::Reserved {
                    section: id,
                    owner,
                    direction,
                });
                tracing::debug!(section = %id, %owner, ?direction, "Section reserved");
                Ok(ReserveOutcome::Acquired)
            }
            ReservationState::Reserved {
                owner: holder,
                direction: held,
            }
            | ReservationState::Occupied {
                owner: holder,
                direction: held,
            }
            | ReservationState::Deadlocked {
                holder,
                direction: held,
                ..
            } if holder == owner && held == direction => Ok(ReserveOutcome::AlreadyHeld),
            ReservationState::Reserved {
                owner: holder,
                direction: held,
            } if holder != owner && held == direction.opposite() => {
                self.note_head_on(id, owner, holder, held)?;
                Err(self.conflict(id, owner, holder))
            }
            other => {
                let holder = other.holder().unwrap_or(owner);
                Err(self.conflict(id, owner, holder))
            }
        }
    }

    /// Record a train entering `id`.
    ///
    /// Allowed on a free section or one held by `owner`.
    ///
    /// # Errors
    ///
    /// [`TrackError::Conflict`] when another owner holds the section or it is
    /// deadlocked.
    pub fn occupy(&mut self, id: SectionId, owner: OwnerId, direction: Direction) -> Result<()> {
        let state = self.section_ref(id)?.state;
        match state {
            ReservationState::Free | ReservationState::Reserved { .. }
                if state.holder().map_or(true, |h| h == owner) =>
            {
                self.section_mut(id)?.state = ReservationState::Occupied { owner, direction };
                self.record(NetworkEvent::Occupied { section: id, owner });
                tracing::debug!(section = %id, %owner, ?direction, "Section occupied");
                Ok(())
            }
            ReservationState::Occupied { owner: holder, .. } if holder == owner => Ok(()),
            other => {
                let holder = other.holder().unwrap_or(owner);
                Err(self.conflict(id, owner, holder))
            }
        }
    }

    /// Return `id` to free. Only the current holder may release.
    ///
    /// # Errors
    ///
    /// [`TrackError::OwnershipViolation`] when `owner` does not hold the
    /// section (including when it is already free).
    pub fn release(&mut self, id: SectionId, owner: OwnerId) -> Result<()> {
        let holder = self.section_ref(id)?.state.holder();
        if holder != Some(owner) {
            return Err(ownership_violation(Some(id), holder, owner));
        }

        self.section_mut(id)?.state = ReservationState::Free;
        self.waits.retain(|_, wait| wait.section != id);
        self.record(NetworkEvent::Released { section: id, owner });
        tracing::debug!(section = %id, %owner, "Section released");
        Ok(())
    }

    /// Release every section held by `owner`, returning how many were freed.
    pub fn release_all(&mut self, owner: OwnerId) -> usize {
        let held = self.held_by(owner);
        for id in &held {
            if let Some(section) = self.sections.get_mut(id) {
                section.state = ReservationState::Free;
            }
            self.waits.retain(|_, wait| wait.section != *id);
            self.record(NetworkEvent::Released { section: *id, owner });
        }
        self.waits.remove(&owner);
        if !held.is_empty() {
            tracing::debug!(%owner, count = held.len(), "Released all sections");
        }
        held.len()
    }

    /// Hand a deadlocked section back to its holder as a plain reservation.
    ///
    /// Intended for the signalling layer once it has resolved the deadlock.
    ///
    /// # Errors
    ///
    /// [`TrackError::InvalidState`] if the section is not deadlocked.
    pub fn clear_deadlock(&mut self, id: SectionId) -> Result<ReservationState> {
        let ReservationState::Deadlocked {
            holder, direction, ..
        } = self.section_ref(id)?.state
        else {
            return Err(TrackError::InvalidState(format!(
                "section {id} is not deadlocked"
            )));
        };

        let state = ReservationState::Reserved {
            owner: holder,
            direction,
        };
        self.section_mut(id)?.state = state;
        self.record(NetworkEvent::DeadlockCleared {
            section: id,
            holder,
        });
        tracing::info!(section = %id, %holder, "Deadlock cleared");
        Ok(state)
    }

    /// Section by id.
    #[must_use]
    pub fn section(&self, id: SectionId) -> Option<&TrackCircuitSection> {
        self.sections.get(&id)
    }

    /// Whether `id` is part of the network.
    #[must_use]
    pub fn contains(&self, id: SectionId) -> bool {
        self.sections.contains_key(&id)
    }

    /// Reservation state of `id`.
    ///
    /// # Errors
    ///
    /// [`TrackError::SectionNotFound`] for unknown ids.
    pub fn state(&self, id: SectionId) -> Result<ReservationState> {
        Ok(self.section_ref(id)?.state)
    }

    /// Current holder of `id`.
    ///
    /// # Errors
    ///
    /// [`TrackError::SectionNotFound`] for unknown ids.
    pub fn holder(&self, id: SectionId) -> Result<Option<OwnerId>> {
        Ok(self.section_ref(id)?.state.holder())
    }

    /// Whether `id` is free.
    ///
    /// # Errors
    ///
    /// [`TrackError::SectionNotFound`] for unknown ids.
    pub fn is_free(&self, id: SectionId) -> Result<bool> {
        Ok(self.section_ref(id)?.state.is_free())
    }

    /// The section and direction reached when leaving `id` in `direction`.
    ///
    /// # Errors
    ///
    /// [`TrackError::SectionNotFound`] for unknown ids.
    pub fn next_section(
        &self,
        id: SectionId,
        direction: Direction,
    ) -> Result<Option<(SectionId, Direction)>> {
        Ok(self
            .section_ref(id)?
            .next(direction)
            .map(|link| (link.section, Direction::entering_at(link.alignment))))
    }

    /// Sections currently deadlocked, in id order.
    #[must_use]
    pub fn deadlocked_sections(&self) -> Vec<SectionId> {
        self.sections
            .values()
            .filter(|s| s.state.kind() == StateKind::Deadlocked)
            .map(|s| s.id)
            .collect()
    }

    /// Sections held by `owner`, in id order.
    #[must_use]
    pub fn held_by(&self, owner: OwnerId) -> Vec<SectionId> {
        self.sections
            .values()
            .filter(|s| s.state.holder() == Some(owner))
            .map(|s| s.id)
            .collect()
    }

    /// Count sections by reservation state.
    #[must_use]
    pub fn summary(&self) -> ReservationSummary {
        let mut summary = ReservationSummary::default();
        for section in self.sections.values() {
            match section.state.direction() {
                None => summary.free += 1,
                Some(direction) => {
                    let kind = section.state.kind();
                    let count = summary.held.get_or_default(kind, direction);
                    summary.held.set(kind, direction, count + 1);
                }
            }
        }
        summary
    }

    /// Sections whose origin lies within `radius` of `location`.
    #[must_use]
    pub fn sections_near(&self, location: &WorldLocation, radius: f64) -> Vec<SectionId> {
        self.sections
            .values()
            .filter(|s| s.origin.is_some_and(|o| o.within(location, radius)))
            .map(|s| s.id)
            .collect()
    }

    /// Sections whose origin falls in the same `zoom` bucket as `tile`.
    #[must_use]
    pub fn sections_in_bucket(&self, tile: Tile, zoom: Zoom) -> Vec<SectionId> {
        let bucket = tile.snap(zoom);
        self.sections
            .values()
            .filter(|s| {
                s.origin.is_some_and(|o| {
                    let home = o.normalized().map_or(o.tile, |n| n.tile);
                    home.snap(zoom) == bucket
                })
            })
            .map(|s| s.id)
            .collect()
    }

    /// All sections in id order.
    pub fn sections(&self) -> impl Iterator<Item = &TrackCircuitSection> {
        self.sections.values()
    }

    /// Number of sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Whether the network has no sections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Mutation counter; changes whenever topology or reservations change.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Take the events recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<NetworkEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn section_ref(&self, id: SectionId) -> Result<&TrackCircuitSection> {
        self.sections.get(&id).ok_or(TrackError::SectionNotFound(id))
    }

    pub(crate) fn section_mut(&mut self, id: SectionId) -> Result<&mut TrackCircuitSection> {
        self.sections
            .get_mut(&id)
            .ok_or(TrackError::SectionNotFound(id))
    }

    fn record(&mut self, event: NetworkEvent) {
        self.generation += 1;
        self.events.push(event);
    }

    fn conflict(&self, section: SectionId, requester: OwnerId, holder: OwnerId) -> TrackError {
        tracing::warn!(%section, %requester, %holder, "Reservation conflict");
        TrackError::Conflict {
            section,
            requester,
            holder,
        }
    }

    /// Track a refused head-on request and detect a two-owner wait cycle.
    fn note_head_on(
        &mut self,
        id: SectionId,
        requester: OwnerId,
        holder: OwnerId,
        held: Direction,
    ) -> Result<()> {
        let Some(wait) = self
            .waits
            .get(&holder)
            .copied()
            .filter(|wait| wait.holder == requester)
        else {
            self.waits.insert(
                requester,
                HeadOnWait {
                    section: id,
                    holder,
                },
            );
            return Ok(());
        };

        self.section_mut(id)?.state = ReservationState::Deadlocked {
            holder,
            direction: held,
            contender: requester,
        };
        self.record(NetworkEvent::DeadlockDetected {
            section: id,
            holder,
            contender: requester,
        });
        tracing::warn!(section = %id, %holder, contender = %requester, "Deadlock detected");

        // The section the holder was refused on is the other half of the cycle.
        if let ReservationState::Reserved {
            owner,
            direction,
        } = self.section_ref(wait.section)?.state
        {
            if owner == requester {
                self.section_mut(wait.section)?.state = ReservationState::Deadlocked {
                    holder: requester,
                    direction,
                    contender: holder,
                };
                self.record(NetworkEvent::DeadlockDetected {
                    section: wait.section,
                    holder: requester,
                    contender: holder,
                });
                tracing::warn!(
                    section = %wait.section,
                    holder = %requester,
                    contender = %holder,
                    "Deadlock detected"
                );
            }
        }

        self.waits.remove(&holder);
        self.waits.remove(&requester);
        Ok(())
    }
}

/// A [`TrackNetwork`] shared between threads.
///
/// Every mutation takes the write lock, so reservation changes on a section
/// are never interleaved. Queries take the read lock and may run together.
#[derive(Debug, Clone, Default)]
pub struct SharedNetwork {
    inner: Arc<RwLock<TrackNetwork>>,
}

impl SharedNetwork {
    /// Wrap a network for shared use.
    #[must_use]
    pub fn new(network: TrackNetwork) -> Self {
        Self {
            inner: Arc::new(RwLock::new(network)),
        }
    }

    /// Run `f` with shared read access.
    ///
    /// # Errors
    ///
    /// [`TrackError::InvalidState`] if the lock is poisoned.
    pub fn read<R>(&self, f: impl FnOnce(&TrackNetwork) -> R) -> Result<R> {
        Ok(f(&*self.read_guard()?))
    }

    /// Run `f` with exclusive access.
    ///
    /// # Errors
    ///
    /// [`TrackError::InvalidState`] if the lock is poisoned.
    pub fn write<R>(&self, f: impl FnOnce(&mut TrackNetwork) -> R) -> Result<R> {
        Ok(f(&mut *self.write_guard()?))
    }

    /// See [`TrackNetwork::try_reserve`].
    pub fn try_reserve(
        &self,
        id: SectionId,
        owner: OwnerId,
        direction: Direction,
    ) -> Result<ReserveOutcome> {
        self.write_guard()?.try_reserve(id, owner, direction)
    }

    /// See [`TrackNetwork::release`].
    pub fn release(&self, id: SectionId, owner: OwnerId) -> Result<()> {
        self.write_guard()?.release(id, owner)
    }

    /// See [`TrackNetwork::state`].
    pub fn state(&self, id: SectionId) -> Result<ReservationState> {
        self.read_guard()?.state(id)
    }

    fn read_guard(&self) -> Result<RwLockReadGuard<'_, TrackNetwork>> {
        self.inner
            .read()
            .map_err(|_| TrackError::InvalidState("track network lock poisoned".to_string()))
    }

    fn write_guard(&self) -> Result<RwLockWriteGuard<'_, TrackNetwork>> {
        self.inner
            .write()
            .map_err(|_| TrackError::InvalidState("track network lock poisoned".to_string()))
    }
}
