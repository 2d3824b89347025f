//! Save a running session and resume it elsewhere.

use track_core::prelude::*;
use track_core::save_state::{restore_all_onto, snapshot_all, LiveEntity};
use track_test_utils::fixtures::{line_network, line_route};

const FREIGHT: OwnerId = OwnerId(10);
const LOCAL: OwnerId = OwnerId(11);

fn running_session() -> (TrackNetwork, Vec<PartialPathRoute>) {
    let mut network = line_network(6);
    let freight = line_route(&network, FREIGHT, 1, 3, Direction::Forward);
    let local = line_route(&network, LOCAL, 5, 6, Direction::Reverse);
    freight.reserve_path(&mut network, FREIGHT).unwrap();
    local.reserve_path(&mut network, LOCAL).unwrap();
    network.occupy(SectionId(1), FREIGHT, Direction::Forward).unwrap();
    (network, vec![freight, local])
}

#[test]
fn test_resume_from_bytes() {
    let (network, routes) = running_session();
    let bytes = SaveGame::capture(&network, &routes).encode().unwrap();

    let (mut resumed, resumed_routes) = SaveGame::decode(&bytes).unwrap().restore().unwrap();
    assert_eq!(resumed_routes, routes);
    assert_eq!(resumed.snapshot(), network.snapshot());

    // The resumed session keeps enforcing the same reservations.
    assert!(resumed.try_reserve(SectionId(3), LOCAL, Direction::Reverse).is_err());
    assert_eq!(
        resumed.state(SectionId(1)).unwrap(),
        ReservationState::Occupied {
            owner: FREIGHT,
            direction: Direction::Forward
        }
    );
}

#[test]
fn test_resume_onto_layout_network() {
    let (network, routes) = running_session();
    let save = SaveGame::capture(&network, &routes);

    let mut fresh = line_network(6);
    let mut live = Vec::new();
    save.restore_onto(&mut fresh, &mut live).unwrap();

    assert_eq!(fresh.held_by(FREIGHT), network.held_by(FREIGHT));
    assert_eq!(fresh.held_by(LOCAL), network.held_by(LOCAL));
    assert_eq!(live, routes);
}

#[test]
fn test_resume_onto_shorter_layout_fails_cleanly() {
    let (network, routes) = running_session();
    let save = SaveGame::capture(&network, &routes);

    let mut short = line_network(4);
    let mut live = Vec::new();
    assert!(save.restore_onto(&mut short, &mut live).is_err());
    assert_eq!(short.summary().free, 4);
    assert!(live.is_empty());
}

#[test]
fn test_shared_capture() {
    let (network, routes) = running_session();
    let expected = SaveGame::capture(&network, &routes);
    let shared = SharedNetwork::new(network);
    assert_eq!(SaveGame::capture_shared(&shared, &routes).unwrap(), expected);
}

#[test]
fn test_heterogeneous_entities() {
    let (network, routes) = running_session();
    let mut values: Vec<StateValue> = snapshot_all(&routes)
        .into_iter()
        .map(StateValue::Route)
        .collect();
    values.push(StateValue::Network(network.snapshot()));

    let live: Vec<LiveEntity> = values.iter().map(|v| v.restore_new().unwrap()).collect();
    let again: Vec<StateValue> = live.iter().map(LiveEntity::snapshot).collect();
    assert_eq!(again, values);

    let mut routes_back = vec![PartialPathRoute::new(FREIGHT)];
    restore_all_onto(&mut routes_back, &snapshot_all(&routes)).unwrap();
    assert_eq!(routes_back, routes);
}
