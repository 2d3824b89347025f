//! Network layout: the sections and links a [`crate::network::TrackNetwork`]
//! is built from.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::location::WorldLocation;
use crate::math::Metres;
use crate::section::Alignment;

/// Complete section topology for one route network.
///
/// # Example RON
///
/// ```ron
/// NetworkLayout(
///     sections: [
///         (id: 1, length: 420.0),
///         (id: 2, length: 180.5, origin: Some((tile: (x: 0, z: 1), x: 12.0, y: 3.5, z: -800.0))),
///     ],
///     connections: [
///         (from: (1, One), to: (2, Zero)),
///     ],
/// )
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkLayout {
    /// Sections in any order.
    #[serde(default)]
    pub sections: Vec<SectionData>,
    /// Links between section ends. Each link is symmetric.
    #[serde(default)]
    pub connections: Vec<ConnectionData>,
}

/// One section of a layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionData {
    /// Section id.
    pub id: u32,
    /// Length in metres.
    pub length: Metres,
    /// Position of the zero end.
    #[serde(default)]
    pub origin: Option<WorldLocation>,
}

/// A link between two section ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionData {
    /// First end as `(section id, alignment)`.
    pub from: (u32, Alignment),
    /// Second end as `(section id, alignment)`.
    pub to: (u32, Alignment),
}

impl NetworkLayout {
    /// Parse a layout from RON text.
    ///
    /// # Errors
    ///
    /// [`TrackError::LayoutParse`] if the text is not a valid layout.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| TrackError::LayoutParse(e.to_string()))
    }

    /// Check that the layout is self-consistent.
    ///
    /// - Section ids are unique
    /// - Lengths are positive
    /// - Connections reference known sections
    /// - No section end is linked twice
    ///
    /// Returns a list of validation errors.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut ids = std::collections::BTreeSet::new();
        for section in &self.sections {
            if !ids.insert(section.id) {
                errors.push(format!("Section {} is defined twice", section.id));
            }
            if section.length.0 <= crate::math::Fixed::ZERO {
                errors.push(format!("Section {} has non-positive length", section.id));
            }
        }

        let mut ends = std::collections::BTreeSet::new();
        for link in &self.connections {
            for (id, alignment) in [link.from, link.to] {
                if !ids.contains(&id) {
                    errors.push(format!("Connection references unknown section {id}"));
                }
                if !ends.insert((id, alignment as u8)) {
                    errors.push(format!("Section {id} end {alignment:?} is linked twice"));
                }
            }
        }

        errors
    }
}
