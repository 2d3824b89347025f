//! Test fixtures and helpers.
//!
//! Pre-built layouts, networks and routes for consistent testing.

use fixed::types::I32F32;
use track_core::data::{ConnectionData, NetworkLayout, SectionData};
use track_core::math::Metres;
use track_core::network::TrackNetwork;
use track_core::route::PartialPathRoute;
use track_core::section::{Alignment, Direction, OwnerId, SectionId};

/// Length of every section built by [`line_layout`], in metres.
pub const LINE_SECTION_LENGTH: i32 = 250;

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// Layout of `count` sections numbered `1..=count`, each joined end `One`
/// to the next section's end `Zero`.
#[must_use]
pub fn line_layout(count: u32) -> NetworkLayout {
    NetworkLayout {
        sections: (1..=count)
            .map(|id| SectionData {
                id,
                length: Metres(fixed(LINE_SECTION_LENGTH)),
                origin: None,
            })
            .collect(),
        connections: (1..count)
            .map(|id| ConnectionData {
                from: (id, Alignment::One),
                to: (id + 1, Alignment::Zero),
            })
            .collect(),
    }
}

/// Render a layout as RON text, the way layout files are written.
///
/// # Panics
///
/// Panics if the layout cannot be serialized.
#[must_use]
pub fn layout_to_ron(layout: &NetworkLayout) -> String {
    ron::ser::to_string_pretty(layout, ron::ser::PrettyConfig::default())
        .expect("layout serializes")
}

/// Network built from [`line_layout`].
///
/// # Panics
///
/// Panics if the layout is rejected, which would be a fixture bug.
#[must_use]
pub fn line_network(count: u32) -> TrackNetwork {
    TrackNetwork::from_layout(&line_layout(count)).expect("line layout is valid")
}

/// Route for `owner` over consecutive sections of a line network.
///
/// `Forward` runs `from..=to` upwards, `Reverse` runs it downwards from `to`.
///
/// # Panics
///
/// Panics if the sections are not part of `network`.
#[must_use]
pub fn line_route(
    network: &TrackNetwork,
    owner: OwnerId,
    from: u32,
    to: u32,
    direction: Direction,
) -> PartialPathRoute {
    let ids: Vec<u32> = match direction {
        Direction::Forward => (from..=to).collect(),
        Direction::Reverse => (from..=to).rev().collect(),
    };
    let mut route = PartialPathRoute::new(owner);
    for id in ids {
        route
            .extend(network, SectionId(id), direction)
            .expect("line route follows the line");
    }
    route
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_network_shape() {
        let network = line_network(4);
        assert_eq!(network.len(), 4);
        assert_eq!(
            network
                .next_section(SectionId(2), Direction::Forward)
                .unwrap(),
            Some((SectionId(3), Direction::Forward))
        );
    }

    #[test]
    fn test_line_layout_survives_ron() {
        let layout = line_layout(3);
        let parsed = NetworkLayout::from_ron_str(&layout_to_ron(&layout)).unwrap();
        assert_eq!(parsed, layout);
    }

    #[test]
    fn test_line_route_reverse() {
        let network = line_network(5);
        let route = line_route(&network, OwnerId(1), 2, 4, Direction::Reverse);
        let ids: Vec<_> = route.iter().map(|e| e.section.0).collect();
        assert_eq!(ids, vec![4, 3, 2]);
    }
}
