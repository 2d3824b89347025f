//! Snapshot and restore of live track state.
//!
//! Every stateful entity implements [`SaveState`]: it can produce an immutable,
//! serializable snapshot of itself, be rebuilt from one, or have one reapplied
//! onto an existing instance. Snapshots only ever contain ids, never
//! references into the live network, so they can be stored and outlive the
//! session that produced them.
//!
//! The set of restorable entity kinds is closed: [`StateValue`] carries one
//! variant per kind and restoring is an exhaustive match.
//!
//! # Example
//!
//! ```
//! use track_core::math::Fixed;
//! use track_core::network::TrackNetwork;
//! use track_core::route::PartialPathRoute;
//! use track_core::save_state::SaveGame;
//! use track_core::section::{Direction, OwnerId, SectionId, TrackCircuitSection};
//!
//! let mut network = TrackNetwork::new();
//! network.add_section(TrackCircuitSection::new(SectionId(1), Fixed::from_num(800)))?;
//! let mut route = PartialPathRoute::new(OwnerId(3));
//! route.extend(&network, SectionId(1), Direction::Forward)?;
//! route.reserve_path(&mut network, OwnerId(3))?;
//!
//! let bytes = SaveGame::capture(&network, &[route]).encode()?;
//! let (restored, routes) = SaveGame::decode(&bytes)?.restore()?;
//! assert_eq!(restored.holder(SectionId(1))?, Some(OwnerId(3)));
//! assert_eq!(routes.len(), 1);
//! # Ok::<(), track_core::error::TrackError>(())
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::enum_array::EnumArray;
use crate::error::{mismatched_restore, ownership_violation, Result, TrackError};
use crate::location::WorldLocation;
use crate::math::{fixed_serde, Fixed};
use crate::network::{HeadOnWait, SharedNetwork, TrackNetwork};
use crate::route::{PartialPathRoute, RouteElement};
use crate::section::{
    Alignment, Connection, OwnerId, ReservationState, SectionId, TrackCircuitSection,
};

/// Save format version for compatibility.
pub const SAVE_VERSION: u32 = 1;

/// Snapshot and restore contract for live entities.
pub trait SaveState: Sized {
    /// Immutable snapshot type.
    type State: Clone + Serialize + DeserializeOwned;

    /// Capture the current state. Does not modify `self`.
    fn snapshot(&self) -> Self::State;

    /// Build a new live entity from a snapshot.
    fn restore_new(state: &Self::State) -> Result<Self>;

    /// Check that `state` can be reapplied onto `self` without changing
    /// anything. [`SaveState::restore_onto`] succeeds whenever this does.
    fn check_restore(&self, state: &Self::State) -> Result<()>;

    /// Make an existing entity match a snapshot taken from it.
    ///
    /// Identity (route owner, section id) must match; a mismatch is an
    /// ownership violation and leaves `self` untouched.
    fn restore_onto(&mut self, state: &Self::State) -> Result<()>;
}

/// Snapshot of a [`PartialPathRoute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteState {
    /// Route owner.
    pub owner: OwnerId,
    /// Elements from rear to forward end.
    pub elements: Vec<RouteElement>,
}

impl SaveState for PartialPathRoute {
    type State = RouteState;

    fn snapshot(&self) -> RouteState {
        RouteState {
            owner: self.owner(),
            elements: self.iter().copied().collect(),
        }
    }

    fn restore_new(state: &RouteState) -> Result<Self> {
        Ok(Self::from_parts(state.owner, state.elements.clone()))
    }

    fn check_restore(&self, state: &RouteState) -> Result<()> {
        if state.owner != self.owner() {
            return Err(ownership_violation(None, Some(self.owner()), state.owner));
        }
        Ok(())
    }

    fn restore_onto(&mut self, state: &RouteState) -> Result<()> {
        self.check_restore(state)?;
        self.replace_elements(state.elements.clone());
        Ok(())
    }
}

/// Snapshot of a [`TrackCircuitSection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionState {
    /// Section id.
    pub id: SectionId,
    /// Length in metres.
    #[serde(with = "fixed_serde")]
    pub length: Fixed,
    /// Position of the zero end.
    pub origin: Option<WorldLocation>,
    /// Neighbours by end.
    pub connections: EnumArray<Connection, Alignment>,
    /// Reservation state.
    pub state: ReservationState,
}

impl SaveState for TrackCircuitSection {
    type State = SectionState;

    fn snapshot(&self) -> SectionState {
        SectionState {
            id: self.id,
            length: self.length,
            origin: self.origin,
            connections: self.connections.clone(),
            state: self.state,
        }
    }

    fn restore_new(state: &SectionState) -> Result<Self> {
        Ok(Self {
            id: state.id,
            length: state.length,
            origin: state.origin,
            connections: state.connections.clone(),
            state: state.state,
        })
    }

    fn check_restore(&self, state: &SectionState) -> Result<()> {
        if state.id != self.id {
            return Err(mismatched_restore(
                format!("section {}", self.id),
                format!("section {}", state.id),
            ));
        }
        Ok(())
    }

    /// Reapplies the reservation state only; topology comes from layout data.
    fn restore_onto(&mut self, state: &SectionState) -> Result<()> {
        self.check_restore(state)?;
        self.state = state.state;
        Ok(())
    }
}

/// A refused head-on request still waiting, as stored in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingHeadOn {
    /// Owner that was refused.
    pub requester: OwnerId,
    /// Section it was refused on.
    pub section: SectionId,
    /// Owner holding that section.
    pub holder: OwnerId,
}

/// Snapshot of a whole [`TrackNetwork`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    /// Network generation when the snapshot was taken.
    pub generation: u64,
    /// Every section, in id order.
    pub sections: Vec<SectionState>,
    /// Refused head-on requests, in requester order.
    pub pending_head_on: Vec<PendingHeadOn>,
}

impl SaveState for TrackNetwork {
    type State = NetworkState;

    fn snapshot(&self) -> NetworkState {
        NetworkState {
            generation: self.generation,
            sections: self.sections.values().map(|s| s.snapshot()).collect(),
            pending_head_on: self
                .waits
                .iter()
                .map(|(requester, wait)| PendingHeadOn {
                    requester: *requester,
                    section: wait.section,
                    holder: wait.holder,
                })
                .collect(),
        }
    }

    fn restore_new(state: &NetworkState) -> Result<Self> {
        let mut network = Self::new();
        for section in &state.sections {
            if network
                .sections
                .insert(section.id, TrackCircuitSection::restore_new(section)?)
                .is_some()
            {
                return Err(TrackError::DuplicateSection(section.id));
            }
        }
        check_links(&network)?;
        network.waits = restore_waits(state);
        network.generation = state.generation;
        tracing::info!(
            sections = network.len(),
            generation = network.generation,
            "Track network restored"
        );
        Ok(network)
    }

    fn check_restore(&self, state: &NetworkState) -> Result<()> {
        for section in &state.sections {
            self.section_ref(section.id)?.check_restore(section)?;
        }
        Ok(())
    }

    /// Reapplies reservation states by section id. Sections absent from the
    /// snapshot are returned to free.
    fn restore_onto(&mut self, state: &NetworkState) -> Result<()> {
        self.check_restore(state)?;
        let seen: BTreeSet<SectionId> = state.sections.iter().map(|s| s.id).collect();

        for section in &state.sections {
            self.section_mut(section.id)?.restore_onto(section)?;
        }
        for (id, section) in &mut self.sections {
            if !seen.contains(id) && !section.state.is_free() {
                tracing::warn!(section = %id, "Section missing from snapshot, freeing");
                section.state = ReservationState::Free;
            }
        }
        self.waits = restore_waits(state);
        self.generation += 1;
        tracing::info!(
            sections = state.sections.len(),
            generation = self.generation,
            "Reservation state reapplied"
        );
        Ok(())
    }
}

fn restore_waits(state: &NetworkState) -> BTreeMap<OwnerId, HeadOnWait> {
    state
        .pending_head_on
        .iter()
        .map(|p| {
            (
                p.requester,
                HeadOnWait {
                    section: p.section,
                    holder: p.holder,
                },
            )
        })
        .collect()
}

/// Every connection must point at an existing section that links back.
fn check_links(network: &TrackNetwork) -> Result<()> {
    for section in network.sections() {
        for (alignment, link) in section.connections.present() {
            let back = network
                .section(link.section)
                .ok_or(TrackError::SectionNotFound(link.section))?
                .connection(link.alignment);
            if back != Some(Connection::new(section.id, alignment)) {
                return Err(TrackError::InvalidState(format!(
                    "{} {alignment:?} links to {} which does not link back",
                    section.id, link.section
                )));
            }
        }
    }
    Ok(())
}

impl SharedNetwork {
    /// Point-in-time snapshot taken under a single read lock.
    ///
    /// # Errors
    ///
    /// [`TrackError::InvalidState`] if the lock is poisoned.
    pub fn snapshot(&self) -> Result<NetworkState> {
        self.read(|network| network.snapshot())
    }
}

/// Kind tag of a [`StateValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// [`PartialPathRoute`].
    Route,
    /// [`TrackCircuitSection`].
    Section,
    /// [`TrackNetwork`].
    Network,
}

/// A snapshot of any restorable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateValue {
    /// Route snapshot.
    Route(RouteState),
    /// Section snapshot.
    Section(SectionState),
    /// Network snapshot.
    Network(NetworkState),
}

impl StateValue {
    /// Kind of entity this snapshot restores.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Route(_) => EntityKind::Route,
            Self::Section(_) => EntityKind::Section,
            Self::Network(_) => EntityKind::Network,
        }
    }

    /// Build a new live entity from this snapshot.
    pub fn restore_new(&self) -> Result<LiveEntity> {
        Ok(match self {
            Self::Route(state) => LiveEntity::Route(PartialPathRoute::restore_new(state)?),
            Self::Section(state) => LiveEntity::Section(TrackCircuitSection::restore_new(state)?),
            Self::Network(state) => LiveEntity::Network(TrackNetwork::restore_new(state)?),
        })
    }
}

/// A live entity of any restorable kind.
#[derive(Debug, Clone)]
pub enum LiveEntity {
    /// Live route.
    Route(PartialPathRoute),
    /// Live section.
    Section(TrackCircuitSection),
    /// Live network.
    Network(TrackNetwork),
}

impl LiveEntity {
    /// Kind of this entity.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Route(_) => EntityKind::Route,
            Self::Section(_) => EntityKind::Section,
            Self::Network(_) => EntityKind::Network,
        }
    }

    /// Snapshot this entity.
    #[must_use]
    pub fn snapshot(&self) -> StateValue {
        match self {
            Self::Route(route) => StateValue::Route(route.snapshot()),
            Self::Section(section) => StateValue::Section(section.snapshot()),
            Self::Network(network) => StateValue::Network(network.snapshot()),
        }
    }

    /// Reapply `value` onto this entity.
    ///
    /// # Errors
    ///
    /// [`TrackError::MismatchedRestore`] if the snapshot is of another kind,
    /// otherwise whatever the entity's own restore returns.
    pub fn restore_onto(&mut self, value: &StateValue) -> Result<()> {
        match (self, value) {
            (Self::Route(route), StateValue::Route(state)) => route.restore_onto(state),
            (Self::Section(section), StateValue::Section(state)) => section.restore_onto(state),
            (Self::Network(network), StateValue::Network(state)) => network.restore_onto(state),
            (live, value) => Err(mismatched_restore(
                format!("{:?}", live.kind()),
                format!("{:?}", value.kind()),
            )),
        }
    }
}

/// Snapshot a sequence of entities, preserving order.
pub fn snapshot_all<T: SaveState>(entities: &[T]) -> Vec<T::State> {
    entities.iter().map(T::snapshot).collect()
}

/// Rebuild a sequence of entities, preserving order.
///
/// # Errors
///
/// The first restore error encountered.
pub fn restore_all<T: SaveState>(states: &[T::State]) -> Result<Vec<T>> {
    states.iter().map(T::restore_new).collect()
}

/// Check that [`restore_all_onto`] would succeed, without changing anything.
///
/// # Errors
///
/// The first identity mismatch between `live` and `states`.
pub fn check_restore_all<T: SaveState>(live: &[T], states: &[T::State]) -> Result<()> {
    live.iter()
        .zip(states)
        .try_for_each(|(entity, state)| entity.check_restore(state))
}

/// Reapply `states` onto `live` position by position.
///
/// Existing entities are restored in place, missing ones are created and
/// surplus ones dropped, so afterwards `live` has one entity per state in the
/// same order. Every position is checked first; on error `live` is unchanged.
///
/// # Errors
///
/// The first identity mismatch, or the first error rebuilding a new entity.
pub fn restore_all_onto<T: SaveState>(live: &mut Vec<T>, states: &[T::State]) -> Result<()> {
    check_restore_all(live, states)?;
    let created = states
        .get(live.len()..)
        .unwrap_or_default()
        .iter()
        .map(T::restore_new)
        .collect::<Result<Vec<T>>>()?;

    live.truncate(states.len());
    for (entity, state) in live.iter_mut().zip(states) {
        entity.restore_onto(state)?;
    }
    live.extend(created);
    Ok(())
}

/// Everything the core needs to resume a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveGame {
    /// Save format version.
    pub version: u32,
    /// Section graph and reservations.
    pub network: NetworkState,
    /// Live routes in priority order.
    pub routes: Vec<RouteState>,
}

impl SaveGame {
    /// Capture the network and routes.
    #[must_use]
    pub fn capture(network: &TrackNetwork, routes: &[PartialPathRoute]) -> Self {
        Self {
            version: SAVE_VERSION,
            network: network.snapshot(),
            routes: snapshot_all(routes),
        }
    }

    /// Capture a shared network and routes from one consistent read.
    ///
    /// # Errors
    ///
    /// [`TrackError::InvalidState`] if the lock is poisoned.
    pub fn capture_shared(network: &SharedNetwork, routes: &[PartialPathRoute]) -> Result<Self> {
        network.read(|n| Self::capture(n, routes))
    }

    /// Serialize to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| TrackError::InvalidState(format!("Failed to serialize save: {}", e)))
    }

    /// Deserialize from bytes, checking the format version.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails or the version differs.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let save: Self = bincode::deserialize(bytes)
            .map_err(|e| TrackError::InvalidState(format!("Failed to deserialize save: {}", e)))?;

        if save.version != SAVE_VERSION {
            return Err(TrackError::InvalidState(format!(
                "Save version mismatch: expected {}, got {}",
                SAVE_VERSION, save.version
            )));
        }
        Ok(save)
    }

    /// Rebuild the network and routes from scratch. Routes are revalidated
    /// against the rebuilt network.
    ///
    /// # Errors
    ///
    /// Any restore error, or [`TrackError::InvalidRoute`] for a route that no
    /// longer fits the network.
    pub fn restore(&self) -> Result<(TrackNetwork, Vec<PartialPathRoute>)> {
        let network = TrackNetwork::restore_new(&self.network)?;
        let routes: Vec<PartialPathRoute> = restore_all(&self.routes)?;
        for route in &routes {
            route.validate(&network)?;
        }
        Ok((network, routes))
    }

    /// Reapply onto a network already built from layout data, and onto the
    /// routes held by the caller.
    ///
    /// Everything is checked before anything changes: on error neither
    /// `network` nor `routes` is modified.
    ///
    /// # Errors
    ///
    /// Any restore error, or [`TrackError::InvalidRoute`] for a route that
    /// does not fit `network`.
    pub fn restore_onto(
        &self,
        network: &mut TrackNetwork,
        routes: &mut Vec<PartialPathRoute>,
    ) -> Result<()> {
        for state in &self.routes {
            PartialPathRoute::from_parts(state.owner, state.elements.clone()).validate(network)?;
        }
        network.check_restore(&self.network)?;
        check_restore_all(routes, &self.routes)?;

        network.restore_onto(&self.network)?;
        restore_all_onto(routes, &self.routes)
    }
}
