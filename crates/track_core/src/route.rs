//! Direction-aware partial path routes through the section graph.
//!
//! A [`PartialPathRoute`] is the ordered list of sections a train occupies or
//! intends to occupy. It grows at the forward end as the train is given
//! authority to move, and shrinks at the rear as the train clears sections.
//! Sections are referenced by id and looked up in a [`TrackNetwork`] when
//! needed, so a route never keeps a section alive or borrows it.
//!
//! # Example
//!
//! ```
//! use track_core::math::Fixed;
//! use track_core::network::TrackNetwork;
//! use track_core::route::PartialPathRoute;
//! use track_core::section::{Alignment, Direction, OwnerId, SectionId, TrackCircuitSection};
//!
//! let mut network = TrackNetwork::new();
//! for id in [1, 2] {
//!     network.add_section(TrackCircuitSection::new(SectionId(id), Fixed::from_num(400)))?;
//! }
//! network.connect(SectionId(1), Alignment::One, SectionId(2), Alignment::Zero)?;
//!
//! let mut route = PartialPathRoute::new(OwnerId(7));
//! route.extend(&network, SectionId(1), Direction::Forward)?;
//! route.extend(&network, SectionId(2), Direction::Forward)?;
//! route.reserve_path(&mut network, OwnerId(7))?;
//! assert_eq!(network.holder(SectionId(2))?, Some(OwnerId(7)));
//! # Ok::<(), track_core::error::TrackError>(())
//! ```

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{ownership_violation, Result, TrackError};
use crate::math::{option_fixed_serde, sum_lengths, Fixed};
use crate::network::{ReserveOutcome, TrackNetwork};
use crate::section::{Direction, OwnerId, SectionId};

/// Outcome of [`PartialPathRoute::release_path`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathRelease {
    /// Sections returned to free.
    pub released: usize,
    /// Route sections held by someone else, with their holder.
    pub held_by_others: Vec<(SectionId, OwnerId)>,
}

/// One step of a route: a section and the direction it is traversed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteElement {
    /// Section traversed.
    pub section: SectionId,
    /// Traversal direction relative to the section's alignments.
    pub direction: Direction,
    /// Portion of the section claimed, measured from the entry end.
    /// `None` means the whole section.
    #[serde(with = "option_fixed_serde", default)]
    pub reserved_length: Option<Fixed>,
}

impl RouteElement {
    /// Element covering the whole section.
    #[must_use]
    pub const fn new(section: SectionId, direction: Direction) -> Self {
        Self {
            section,
            direction,
            reserved_length: None,
        }
    }

    /// Element covering the first `length` metres from the entry end.
    #[must_use]
    pub const fn partial(section: SectionId, direction: Direction, length: Fixed) -> Self {
        Self {
            section,
            direction,
            reserved_length: Some(length),
        }
    }
}

/// Ordered, direction-aware sequence of sections owned by one train.
///
/// The rear (index 0) is the end the train has already passed; the forward
/// end is where new sections are appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialPathRoute {
    owner: OwnerId,
    elements: VecDeque<RouteElement>,
}

impl PartialPathRoute {
    /// Create an empty route.
    #[must_use]
    pub fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            elements: VecDeque::new(),
        }
    }

    /// Build a route, validating every link against `network`.
    ///
    /// # Errors
    ///
    /// [`TrackError::InvalidRoute`] at the first element that does not follow
    /// from its predecessor.
    pub fn from_elements(
        network: &TrackNetwork,
        owner: OwnerId,
        elements: impl IntoIterator<Item = RouteElement>,
    ) -> Result<Self> {
        let mut route = Self::new(owner);
        for element in elements {
            route.push(network, element)?;
        }
        Ok(route)
    }

    /// Build a route without checking adjacency. Used when restoring state;
    /// call [`PartialPathRoute::validate`] once the network is available.
    pub(crate) fn from_parts(owner: OwnerId, elements: Vec<RouteElement>) -> Self {
        Self {
            owner,
            elements: elements.into(),
        }
    }

    pub(crate) fn replace_elements(&mut self, elements: Vec<RouteElement>) {
        self.elements = elements.into();
    }

    /// Owner of the route.
    #[must_use]
    pub const fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Append `section` at the forward end.
    ///
    /// # Errors
    ///
    /// [`TrackError::InvalidRoute`] if the section is unknown or not joined to
    /// the current forward end through the alignment `direction` enters by.
    /// The route is unchanged on error.
    pub fn extend(
        &mut self,
        network: &TrackNetwork,
        section: SectionId,
        direction: Direction,
    ) -> Result<()> {
        self.push(network, RouteElement::new(section, direction))
    }

    /// Append a partially claimed section at the forward end.
    ///
    /// # Errors
    ///
    /// As [`PartialPathRoute::extend`], and also when `length` is negative or
    /// longer than the section.
    pub fn extend_partial(
        &mut self,
        network: &TrackNetwork,
        section: SectionId,
        direction: Direction,
        length: Fixed,
    ) -> Result<()> {
        self.push(network, RouteElement::partial(section, direction, length))
    }

    /// Append `element` at the forward end after validating it.
    ///
    /// # Errors
    ///
    /// See [`PartialPathRoute::extend`].
    pub fn push(&mut self, network: &TrackNetwork, element: RouteElement) -> Result<()> {
        check_link(network, self.elements.back(), &element)?;
        self.elements.push_back(element);
        Ok(())
    }

    /// Remove `count` elements from the rear and return them in route order.
    ///
    /// # Errors
    ///
    /// [`TrackError::Truncate`] if `count` exceeds the route length.
    pub fn truncate(&mut self, count: usize) -> Result<Vec<RouteElement>> {
        self.check_count(count)?;
        Ok(self.elements.drain(..count).collect())
    }

    /// Remove `count` elements from the forward end, undoing
    /// [`PartialPathRoute::extend`]. Returns them in route order.
    ///
    /// # Errors
    ///
    /// [`TrackError::Truncate`] if `count` exceeds the route length.
    pub fn retract(&mut self, count: usize) -> Result<Vec<RouteElement>> {
        self.check_count(count)?;
        let start = self.elements.len() - count;
        Ok(self.elements.drain(start..).collect())
    }

    /// Whether the route passes through `section`.
    #[must_use]
    pub fn contains(&self, section: SectionId) -> bool {
        self.position(section).is_some()
    }

    /// Index of the first element on `section`.
    #[must_use]
    pub fn position(&self, section: SectionId) -> Option<usize> {
        self.elements.iter().position(|e| e.section == section)
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the route is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Rear element.
    #[must_use]
    pub fn first(&self) -> Option<&RouteElement> {
        self.elements.front()
    }

    /// Forward element.
    #[must_use]
    pub fn last(&self) -> Option<&RouteElement> {
        self.elements.back()
    }

    /// Element at `index`, counted from the rear.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&RouteElement> {
        self.elements.get(index)
    }

    /// Elements from rear to forward end.
    pub fn iter(&self) -> impl Iterator<Item = &RouteElement> {
        self.elements.iter()
    }

    /// Whether both routes visit the same sections in the same directions.
    ///
    /// Owner and reserved lengths are ignored.
    #[must_use]
    pub fn same_path(&self, other: &Self) -> bool {
        self.elements.len() == other.elements.len()
            && self
                .elements
                .iter()
                .zip(&other.elements)
                .all(|(a, b)| a.section == b.section && a.direction == b.direction)
    }

    /// Section and direction directly beyond the forward end, if connected.
    ///
    /// # Errors
    ///
    /// [`TrackError::SectionNotFound`] if the forward section is unknown.
    pub fn next_ahead(&self, network: &TrackNetwork) -> Result<Option<(SectionId, Direction)>> {
        match self.elements.back() {
            Some(last) => network.next_section(last.section, last.direction),
            None => Ok(None),
        }
    }

    /// Total claimed length in metres.
    ///
    /// # Errors
    ///
    /// [`TrackError::SectionNotFound`] if an element's section is unknown.
    pub fn total_length(&self, network: &TrackNetwork) -> Result<Fixed> {
        let lengths = self
            .elements
            .iter()
            .map(|e| {
                network
                    .section_ref(e.section)
                    .map(|s| e.reserved_length.unwrap_or(s.length))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(sum_lengths(lengths))
    }

    /// Check every link of the route against `network`.
    ///
    /// # Errors
    ///
    /// [`TrackError::InvalidRoute`] at the first broken link.
    pub fn validate(&self, network: &TrackNetwork) -> Result<()> {
        let mut previous = None;
        for element in &self.elements {
            check_link(network, previous, element)?;
            previous = Some(element);
        }
        Ok(())
    }

    /// Reserve every section of the route for `owner`, all or nothing.
    ///
    /// Sections already held by `owner` in the route's direction count as
    /// reserved. If any section is refused, every section acquired by this
    /// call is released again, in reverse order, and the refusal is returned.
    /// Returns the number of sections newly acquired.
    ///
    /// # Errors
    ///
    /// [`TrackError::Conflict`] on the first refused section,
    /// [`TrackError::OwnershipViolation`] if `owner` is not the route owner.
    pub fn reserve_path(&self, network: &mut TrackNetwork, owner: OwnerId) -> Result<usize> {
        if owner != self.owner {
            return Err(ownership_violation(None, Some(self.owner), owner));
        }

        let mut acquired: Vec<SectionId> = Vec::with_capacity(self.elements.len());
        for element in &self.elements {
            match network.try_reserve(element.section, owner, element.direction) {
                Ok(ReserveOutcome::Acquired) => acquired.push(element.section),
                Ok(ReserveOutcome::AlreadyHeld) => {}
                Err(err) => {
                    for section in acquired.iter().rev() {
                        if let Err(rollback) = network.release(*section, owner) {
                            tracing::error!(%section, %owner, %rollback, "Rollback release failed");
                        }
                    }
                    tracing::debug!(
                        %owner,
                        rolled_back = acquired.len(),
                        "Path reservation refused"
                    );
                    return Err(err);
                }
            }
        }

        tracing::debug!(%owner, acquired = acquired.len(), "Path reserved");
        Ok(acquired.len())
    }

    /// Release every section of the route that `owner` still holds.
    ///
    /// Free sections are skipped. Sections now held by another owner are left
    /// alone, logged, and listed in [`PathRelease::held_by_others`] so the
    /// signalling layer can act on them.
    ///
    /// # Errors
    ///
    /// [`TrackError::OwnershipViolation`] if `owner` is not the route owner,
    /// [`TrackError::SectionNotFound`] for unknown sections.
    pub fn release_path(&self, network: &mut TrackNetwork, owner: OwnerId) -> Result<PathRelease> {
        if owner != self.owner {
            return Err(ownership_violation(None, Some(self.owner), owner));
        }

        let mut report = PathRelease::default();
        for element in &self.elements {
            match network.holder(element.section)? {
                Some(holder) if holder == owner => {
                    network.release(element.section, owner)?;
                    report.released += 1;
                }
                Some(holder) => {
                    tracing::warn!(
                        section = %element.section,
                        %owner,
                        %holder,
                        "Route section held by another owner, not released"
                    );
                    report.held_by_others.push((element.section, holder));
                }
                None => {}
            }
        }
        Ok(report)
    }

    fn check_count(&self, count: usize) -> Result<()> {
        if count > self.elements.len() {
            return Err(TrackError::Truncate {
                count,
                len: self.elements.len(),
            });
        }
        Ok(())
    }
}

/// Verify that `next` may follow `previous` on `network`.
fn check_link(
    network: &TrackNetwork,
    previous: Option<&RouteElement>,
    next: &RouteElement,
) -> Result<()> {
    let invalid = |reason: String| TrackError::InvalidRoute {
        section: next.section,
        reason,
    };

    let section = network
        .section(next.section)
        .ok_or_else(|| invalid("section is not part of the network".to_string()))?;

    if let Some(length) = next.reserved_length {
        if length < Fixed::ZERO || length > section.length {
            return Err(invalid(format!(
                "reserved length {length} outside section length {}",
                section.length
            )));
        }
    }

    let Some(previous) = previous else {
        return Ok(());
    };
    let exit = previous.direction.exit();
    let link = network
        .section(previous.section)
        .and_then(|s| s.connection(exit))
        .ok_or_else(|| invalid(format!("{} has no neighbour at {exit:?}", previous.section)))?;

    if link.section != next.section {
        return Err(invalid(format!(
            "{} {exit:?} leads to {}",
            previous.section, link.section
        )));
    }
    if link.alignment != next.direction.entry() {
        return Err(invalid(format!(
            "entered at {:?} but travelling {:?}",
            link.alignment, next.direction
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::{Alignment, ReservationState, TrackCircuitSection};
    use proptest::prelude::*;

    const A: SectionId = SectionId(1);
    const B: SectionId = SectionId(2);
    const C: SectionId = SectionId(3);
    const D: SectionId = SectionId(4);
    const TRAIN: OwnerId = OwnerId(1);
    const OTHER: OwnerId = OwnerId(2);

    /// A -> B -> C -> D, each linked One to Zero.
    fn line() -> TrackNetwork {
        let mut network = TrackNetwork::new();
        for id in [A, B, C, D] {
            network
                .add_section(TrackCircuitSection::new(id, Fixed::from_num(250)))
                .unwrap();
        }
        for pair in [A, B, C, D].windows(2) {
            network
                .connect(pair[0], Alignment::One, pair[1], Alignment::Zero)
                .unwrap();
        }
        network
    }

    fn forward(network: &TrackNetwork, sections: &[SectionId]) -> PartialPathRoute {
        PartialPathRoute::from_elements(
            network,
            TRAIN,
            sections.iter().map(|s| RouteElement::new(*s, Direction::Forward)),
        )
        .unwrap()
    }

    #[test]
    fn test_connected_forward_route_is_valid() {
        let network = line();
        let route = forward(&network, &[A, B]);
        assert_eq!(route.len(), 2);
        assert!(route.contains(B));
        assert!(!route.contains(C));
        assert_eq!(route.next_ahead(&network).unwrap(), Some((C, Direction::Forward)));
    }

    #[test]
    fn test_extend_with_unconnected_section_is_rejected() {
        let network = line();
        let mut route = forward(&network, &[A, B]);

        let err = route.extend(&network, D, Direction::Forward).unwrap_err();
        assert!(matches!(err, TrackError::InvalidRoute { section: D, .. }));
        assert_eq!(route.len(), 2);

        // Right neighbour, wrong direction
        let err = route.extend(&network, C, Direction::Reverse).unwrap_err();
        assert!(matches!(err, TrackError::InvalidRoute { section: C, .. }));
        assert_eq!(route.len(), 2);

        let err = route
            .extend(&network, SectionId(42), Direction::Forward)
            .unwrap_err();
        assert!(matches!(err, TrackError::InvalidRoute { .. }));
    }

    #[test]
    fn test_reverse_route_follows_zero_ends() {
        let network = line();
        let route = PartialPathRoute::from_elements(
            &network,
            TRAIN,
            [D, C, B].map(|s| RouteElement::new(s, Direction::Reverse)),
        )
        .unwrap();
        assert_eq!(route.last().map(|e| e.section), Some(B));
        assert_eq!(route.next_ahead(&network).unwrap(), Some((A, Direction::Reverse)));
    }

    #[test]
    fn test_truncate_removes_rear() {
        let network = line();
        let mut route = forward(&network, &[A, B, C]);
        let removed = route.truncate(2).unwrap();
        assert_eq!(removed.iter().map(|e| e.section).collect::<Vec<_>>(), vec![A, B]);
        assert_eq!(route.first().map(|e| e.section), Some(C));
        assert_eq!(
            route.truncate(2),
            Err(TrackError::Truncate { count: 2, len: 1 })
        );
        assert_eq!(route.len(), 1);
    }

    #[test]
    fn test_partial_length_is_checked() {
        let network = line();
        let mut route = forward(&network, &[A]);
        assert!(route
            .extend_partial(&network, B, Direction::Forward, Fixed::from_num(300))
            .is_err());
        route
            .extend_partial(&network, B, Direction::Forward, Fixed::from_num(100))
            .unwrap();
        assert_eq!(route.total_length(&network).unwrap(), Fixed::from_num(350));
    }

    #[test]
    fn test_reserve_path_marks_every_section() {
        let mut network = line();
        let route = forward(&network, &[A, B, C]);
        assert_eq!(route.reserve_path(&mut network, TRAIN), Ok(3));
        for section in [A, B, C] {
            assert_eq!(
                network.state(section).unwrap(),
                ReservationState::Reserved {
                    owner: TRAIN,
                    direction: Direction::Forward
                }
            );
        }
        // Re-reserving what is already held acquires nothing new
        assert_eq!(route.reserve_path(&mut network, TRAIN), Ok(0));
        let report = route.release_path(&mut network, TRAIN).unwrap();
        assert_eq!(report.released, 3);
        assert!(report.held_by_others.is_empty());
        assert_eq!(network.summary().free, 4);
    }

    #[test]
    fn test_release_path_reports_sections_held_by_others() {
        let mut network = line();
        let route = forward(&network, &[A, B, C]);
        route.reserve_path(&mut network, TRAIN).unwrap();

        // The train has cleared B, and another route has since claimed it.
        network.release(B, TRAIN).unwrap();
        network.try_reserve(B, OTHER, Direction::Reverse).unwrap();

        let report = route.release_path(&mut network, TRAIN).unwrap();
        assert_eq!(report.released, 2);
        assert_eq!(report.held_by_others, vec![(B, OTHER)]);
        assert_eq!(network.holder(B).unwrap(), Some(OTHER));
    }

    #[test]
    fn test_reserve_path_rolls_back_on_conflict() {
        let mut network = line();
        network.try_reserve(C, OTHER, Direction::Forward).unwrap();
        let before: Vec<_> = network.sections().map(|s| s.state).collect();

        let route = forward(&network, &[A, B, C, D]);
        let err = route.reserve_path(&mut network, TRAIN).unwrap_err();
        assert_eq!(
            err,
            TrackError::Conflict {
                section: C,
                requester: TRAIN,
                holder: OTHER
            }
        );

        let after: Vec<_> = network.sections().map(|s| s.state).collect();
        assert_eq!(before, after);
    }

    #[cfg(not(feature = "debug-validation"))]
    #[test]
    fn test_reserve_path_requires_route_owner() {
        let mut network = line();
        let route = forward(&network, &[A]);
        assert!(matches!(
            route.reserve_path(&mut network, OTHER),
            Err(TrackError::OwnershipViolation { .. })
        ));
        assert!(network.is_free(A).unwrap());
    }

    #[test]
    fn test_same_path_ignores_lengths() {
        let network = line();
        let full = forward(&network, &[A, B]);
        let mut partial = forward(&network, &[A]);
        partial
            .extend_partial(&network, B, Direction::Forward, Fixed::from_num(10))
            .unwrap();
        assert!(full.same_path(&partial));
        assert_ne!(full, partial);
    }

    proptest! {
        #[test]
        fn prop_extend_then_retract_restores_route(start in 0usize..4, extra in 0usize..4) {
            let network = line();
            let sections = [A, B, C, D];
            let mut route = forward(&network, &sections[..start]);
            let before = route.clone();

            let mut added = 0;
            for section in sections.iter().skip(start).take(extra) {
                route.extend(&network, *section, Direction::Forward).unwrap();
                added += 1;
            }
            route.retract(added).unwrap();
            prop_assert_eq!(route, before);
        }

        #[test]
        fn prop_reserve_path_is_all_or_nothing(
            blocked in 0usize..4,
            blocked_dir in prop_oneof![Just(Direction::Forward), Just(Direction::Reverse)],
        ) {
            let mut network = line();
            let sections = [A, B, C, D];
            network.try_reserve(sections[blocked], OTHER, blocked_dir).unwrap();
            let before: Vec<_> = network.sections().map(|s| s.state).collect();

            let route = forward(&network, &sections);
            prop_assert!(route.reserve_path(&mut network, TRAIN).is_err());
            let after: Vec<_> = network.sections().map(|s| s.state).collect();
            prop_assert_eq!(before, after);
        }
    }
}
