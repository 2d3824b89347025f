//! # Track Core
//!
//! Track circuit core for a train simulator.
//!
//! This crate contains the state that must stay consistent while trains move:
//! - Tiled world coordinates that stay precise far from the origin
//! - The track circuit section graph and its reservation state machine
//! - Partial path routes claimed section by section
//! - Snapshot and restore of all of the above
//!
//! It does no rendering, no file IO and no physics. Layout data and save
//! bytes are passed in and out by the caller.
//!
//! ## Crate Structure
//!
//! - [`tile`] - Tile grid and zoom buckets
//! - [`location`] - Positions as tile plus local offset
//! - [`enum_array`] - Fixed-size arrays keyed by enumerations
//! - [`section`] - Track circuit sections and reservation states
//! - [`network`] - Section graph and reservation rules
//! - [`route`] - Partial path routes
//! - [`save_state`] - Snapshot and restore
//! - [`data`] - RON layout definitions
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod data;
pub mod enum_array;
pub mod error;
pub mod location;
pub mod math;
pub mod network;
pub mod route;
pub mod save_state;
pub mod section;
pub mod tile;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::data::NetworkLayout;
    pub use crate::enum_array::{EnumArray, EnumArray2D};
    pub use crate::error::{Result, TrackError};
    pub use crate::location::WorldLocation;
    pub use crate::math::{Fixed, Metres};
    pub use crate::network::{NetworkEvent, ReserveOutcome, SharedNetwork, TrackNetwork};
    pub use crate::route::{PartialPathRoute, PathRelease, RouteElement};
    pub use crate::save_state::{SaveGame, SaveState, StateValue};
    pub use crate::section::{
        Alignment, Connection, Direction, OwnerId, ReservationState, SectionId,
        TrackCircuitSection,
    };
    pub use crate::tile::{Tile, Zoom, TILE_SIZE};
}
