//! Data structures for track layout configuration.
//!
//! This module contains pure data structures that describe section topology.
//! All structs are designed to be deserialized from RON files.
//!
//! **Note:** This module contains no IO - it only defines data types and
//! parses strings the caller has already loaded.

mod layout;

pub use layout::{ConnectionData, NetworkLayout, SectionData};
