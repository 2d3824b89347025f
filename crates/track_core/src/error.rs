//! Error types for the track circuit core.

use thiserror::Error;

use crate::section::{Alignment, OwnerId, SectionId};

/// Result type alias using [`TrackError`].
pub type Result<T> = std::result::Result<T, TrackError>;

/// Top-level error type for all track circuit core errors.
///
/// A detected deadlock is not an error: it is a reservation state reported
/// through [`crate::network::NetworkEvent::DeadlockDetected`]. The request that
/// triggered detection fails with [`TrackError::Conflict`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    /// Absolute coordinate cannot be expressed as a tile index.
    #[error("Coordinate {value} is outside the representable tile range")]
    Overflow {
        /// The rejected absolute coordinate.
        value: f64,
    },

    /// Route construction or extension violates adjacency or direction rules.
    #[error("Invalid route at section {section}: {reason}")]
    InvalidRoute {
        /// Section that could not be appended.
        section: SectionId,
        /// Human readable reason.
        reason: String,
    },

    /// Reservation request conflicts with the current holder.
    #[error("Section {section} requested by {requester} is held by {holder}")]
    Conflict {
        /// Contended section.
        section: SectionId,
        /// Owner whose request was refused.
        requester: OwnerId,
        /// Owner currently holding the section.
        holder: OwnerId,
    },

    /// Release or restore attempted by someone who does not own the target.
    #[error("Ownership violation on section {section:?}: expected {expected:?}, got {actual}")]
    OwnershipViolation {
        /// Section involved, if the violation concerns a section.
        section: Option<SectionId>,
        /// Current owner, or `None` if nothing holds the target.
        expected: Option<OwnerId>,
        /// Caller that attempted the operation.
        actual: OwnerId,
    },

    /// Snapshot applied onto an entity it was not taken from.
    #[error("Cannot restore {found} onto {expected}")]
    MismatchedRestore {
        /// Identity of the live entity.
        expected: String,
        /// Identity recorded in the snapshot.
        found: String,
    },

    /// Section id is not part of the network.
    #[error("Section not found: {0}")]
    SectionNotFound(SectionId),

    /// Section id was added twice.
    #[error("Duplicate section: {0}")]
    DuplicateSection(SectionId),

    /// Alignment already has a connection (geometry error).
    #[error("Section {section} alignment {alignment:?} is already connected")]
    AlreadyConnected {
        /// Section whose end is taken.
        section: SectionId,
        /// The taken end.
        alignment: Alignment,
    },

    /// Tried to remove more elements than a route holds.
    #[error("Cannot remove {count} elements from a route of length {len}")]
    Truncate {
        /// Requested count.
        count: usize,
        /// Route length.
        len: usize,
    },

    /// Slot count does not match the key enumeration.
    #[error("Expected at most {expected} slots, found {found}")]
    Cardinality {
        /// Number of keys in the enumeration.
        expected: usize,
        /// Number of values supplied.
        found: usize,
    },

    /// Layout data could not be parsed.
    #[error("Failed to parse network layout: {0}")]
    LayoutParse(String),

    /// Invalid core state (serialization, poisoned locks, version mismatch).
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Build (or, with `debug-validation`, panic on) an ownership violation.
///
/// Ownership violations are programming errors in the caller. They are always
/// logged and never silently repaired.
pub(crate) fn ownership_violation(
    section: Option<SectionId>,
    expected: Option<OwnerId>,
    actual: OwnerId,
) -> TrackError {
    tracing::error!(?section, ?expected, %actual, "Ownership violation");

    #[cfg(feature = "debug-validation")]
    panic!("ownership violation on {section:?}: expected {expected:?}, got {actual}");

    #[cfg(not(feature = "debug-validation"))]
    TrackError::OwnershipViolation {
        section,
        expected,
        actual,
    }
}

/// Build (or, with `debug-validation`, panic on) a restore onto the wrong
/// entity. Treated like an ownership violation.
pub(crate) fn mismatched_restore(expected: String, found: String) -> TrackError {
    tracing::error!(%expected, %found, "Snapshot restored onto mismatched entity");

    #[cfg(feature = "debug-validation")]
    panic!("cannot restore {found} onto {expected}");

    #[cfg(not(feature = "debug-validation"))]
    TrackError::MismatchedRestore { expected, found }
}
