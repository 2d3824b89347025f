//! Determinism and contention testing utilities.
//!
//! Reservation state must not depend on anything but the order of requests:
//! the same sequence applied to the same layout has to leave identical
//! sections, and a saved session must resume exactly where it stopped.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: Individual transitions (reserve, occupy, release)
//! 2. **Property tests**: Random request sequences stay consistent
//! 3. **Integration tests**: Full scenarios survive save and resume
//! 4. **Parallel tests**: Threads contending for one shared network

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use track_core::error::TrackError;
use track_core::network::{SharedNetwork, TrackNetwork};
use track_core::save_state::SaveGame;
use track_core::section::{Direction, OwnerId, SectionId};

/// One reservation request in a scripted sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Request {
    /// [`TrackNetwork::try_reserve`].
    Reserve(SectionId, OwnerId, Direction),
    /// [`TrackNetwork::occupy`].
    Occupy(SectionId, OwnerId, Direction),
    /// [`TrackNetwork::release`].
    Release(SectionId, OwnerId),
    /// [`TrackNetwork::release_all`].
    ReleaseAll(OwnerId),
}

impl Request {
    /// Apply to `network`, discarding the outcome. Refusals are part of
    /// the scripted behaviour and are not failures.
    pub fn apply(self, network: &mut TrackNetwork) {
        let result = match self {
            Self::Reserve(id, owner, direction) => {
                network.try_reserve(id, owner, direction).map(|_| ())
            }
            Self::Occupy(id, owner, direction) => network.occupy(id, owner, direction),
            Self::Release(id, owner) => network.release(id, owner),
            Self::ReleaseAll(owner) => {
                network.release_all(owner);
                Ok(())
            }
        };
        if let Err(err) = result {
            tracing::trace!(?self, %err, "Scripted request refused");
        }
    }
}

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
}

impl DeterminismResult {
    /// Assert that every run matched, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        assert!(
            self.is_deterministic,
            "Reservation state diverged across runs: {:?}",
            self.hashes
        );
    }
}

/// Apply `requests` to `runs` freshly built networks and compare the
/// resulting save bytes.
///
/// # Panics
///
/// Panics if a network cannot be encoded.
pub fn verify_determinism<Setup>(
    runs: usize,
    setup: Setup,
    requests: &[Request],
) -> DeterminismResult
where
    Setup: Fn() -> TrackNetwork,
{
    let hashes: Vec<u64> = (0..runs)
        .map(|_| {
            let mut network = setup();
            for request in requests {
                request.apply(&mut network);
            }
            state_hash(&network)
        })
        .collect();

    DeterminismResult {
        is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
        hashes,
    }
}

/// Hash of a network's encoded save bytes.
///
/// # Panics
///
/// Panics if the network cannot be encoded.
#[must_use]
pub fn state_hash(network: &TrackNetwork) -> u64 {
    let bytes = SaveGame::capture(network, &[])
        .encode()
        .expect("network state encodes");
    compute_hash(&bytes)
}

/// Check that saving after `prefix` and resuming with `suffix` ends in the
/// same state as applying both without interruption.
///
/// # Panics
///
/// Panics if the save cannot be encoded or restored.
pub fn verify_resume_determinism<Setup>(
    setup: Setup,
    prefix: &[Request],
    suffix: &[Request],
) -> bool
where
    Setup: Fn() -> TrackNetwork,
{
    let mut straight = setup();
    for request in prefix.iter().chain(suffix) {
        request.apply(&mut straight);
    }

    let mut interrupted = setup();
    for request in prefix {
        request.apply(&mut interrupted);
    }
    let bytes = SaveGame::capture(&interrupted, &[])
        .encode()
        .expect("network state encodes");
    let (mut resumed, _) = SaveGame::decode(&bytes)
        .and_then(|save| save.restore())
        .expect("save restores");
    for request in suffix {
        request.apply(&mut resumed);
    }

    let matches = state_hash(&straight) == state_hash(&resumed);
    if !matches {
        tracing::warn!(
            prefix = prefix.len(),
            suffix = suffix.len(),
            "Resumed network diverged"
        );
    }
    matches
}

/// Outcome of one contender in [`contend_for_section`].
#[derive(Debug, Clone, PartialEq)]
pub struct ContentionResult {
    /// Owners whose request was granted.
    pub winners: Vec<OwnerId>,
    /// Refusals returned to the other owners.
    pub refusals: Vec<TrackError>,
}

/// Have every owner in `owners` request `section` at once from its own thread.
///
/// # Panics
///
/// Panics if a contender thread panics.
#[must_use]
pub fn contend_for_section(
    network: &SharedNetwork,
    section: SectionId,
    owners: &[OwnerId],
    direction: Direction,
) -> ContentionResult {
    let outcomes = thread::scope(|s| {
        let handles: Vec<_> = owners
            .iter()
            .map(|&owner| {
                s.spawn(move || (owner, network.try_reserve(section, owner, direction)))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("contender thread panicked"))
            .collect::<Vec<_>>()
    });

    let mut result = ContentionResult {
        winners: Vec::new(),
        refusals: Vec::new(),
    };
    for (owner, outcome) in outcomes {
        match outcome {
            Ok(_) => result.winners.push(owner),
            Err(err) => result.refusals.push(err),
        }
    }
    result
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for track state.
pub mod strategies {
    use proptest::prelude::*;
    use track_core::location::WorldLocation;
    use track_core::section::{Direction, OwnerId, SectionId};
    use track_core::tile::{Tile, TILE_SIZE};

    use super::Request;

    /// Generate a direction.
    pub fn arb_direction() -> impl Strategy<Value = Direction> {
        prop_oneof![Just(Direction::Forward), Just(Direction::Reverse)]
    }

    /// Generate a tile index pair well inside the representable range.
    pub fn arb_tile() -> impl Strategy<Value = Tile> {
        (-1_000_000i32..1_000_000, -1_000_000i32..1_000_000).prop_map(|(x, z)| Tile::new(x, z))
    }

    /// Generate an absolute coordinate within a few hundred tiles of the origin.
    pub fn arb_absolute() -> impl Strategy<Value = f64> {
        -(TILE_SIZE * 400.0)..(TILE_SIZE * 400.0)
    }

    /// Generate a normalized location.
    pub fn arb_location() -> impl Strategy<Value = WorldLocation> {
        let half = (TILE_SIZE / 2.0) as f32;
        (arb_tile(), -half..half, -100.0f32..100.0, -half..half)
            .prop_map(|(tile, x, y, z)| WorldLocation::new(tile, x, y, z))
    }

    /// Generate a request against a line of `sections` sections and `owners`
    /// owners.
    pub fn arb_request(sections: u32, owners: u32) -> impl Strategy<Value = Request> {
        let section = (1..=sections).prop_map(SectionId);
        let owner = (1..=owners).prop_map(OwnerId);
        prop_oneof![
            4 => (section.clone(), owner.clone(), arb_direction())
                .prop_map(|(s, o, d)| Request::Reserve(s, o, d)),
            2 => (section.clone(), owner.clone(), arb_direction())
                .prop_map(|(s, o, d)| Request::Occupy(s, o, d)),
            3 => (section, owner.clone()).prop_map(|(s, o)| Request::Release(s, o)),
            1 => owner.prop_map(Request::ReleaseAll),
        ]
    }

    /// Generate a request sequence.
    pub fn arb_requests(
        sections: u32,
        owners: u32,
        max_len: usize,
    ) -> impl Strategy<Value = Vec<Request>> {
        proptest::collection::vec(arb_request(sections, owners), 0..max_len)
    }
}
