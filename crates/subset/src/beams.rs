//! Beam selection
//!
//! A granule has eight beam groups. The four coverage beams come from the
//! split laser, the four power beams from the two full-power lasers.

use crate::error::{Result, SubsetError};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Group name prefix of every beam
pub const BEAM_PREFIX: &str = "BEAM";

pub const COVERAGE_BEAMS: [&str; 4] = ["BEAM0000", "BEAM0001", "BEAM0010", "BEAM0011"];
pub const POWER_BEAMS: [&str; 4] = ["BEAM0101", "BEAM0110", "BEAM1000", "BEAM1011"];

/// Every beam, coverage first
pub const ALL_BEAMS: [&str; 8] = [
    "BEAM0000", "BEAM0001", "BEAM0010", "BEAM0011", "BEAM0101", "BEAM0110", "BEAM1000", "BEAM1011",
];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BeamSelection {
    #[default]
    All,
    Coverage,
    Power,
    /// Explicit beams in canonical `BEAMxxxx` form, in the order given
    Beams(Vec<String>),
}

impl BeamSelection {
    /// Concrete beam names, in selection order
    pub fn resolve(&self) -> Vec<String> {
        let names: &[&str] = match self {
            BeamSelection::All => &ALL_BEAMS,
            BeamSelection::Coverage => &COVERAGE_BEAMS,
            BeamSelection::Power => &POWER_BEAMS,
            BeamSelection::Beams(beams) => return beams.clone(),
        };
        names.iter().map(|s| s.to_string()).collect()
    }
}

impl FromStr for BeamSelection {
    type Err = SubsetError;

    /// `all`, `coverage`, `power` (any case), or a comma-separated list of
    /// beams with or without the `BEAM` prefix
    fn from_str(s: &str) -> Result<Self> {
        let items: Vec<&str> = s.split(',').map(str::trim).collect();
        if items.iter().any(|item| item.is_empty()) {
            return Err(SubsetError::InvalidBeams(format!("empty beam name in {:?}", s)));
        }

        let logical = |item: &str| match item.to_ascii_lowercase().as_str() {
            "all" => Some(BeamSelection::All),
            "coverage" => Some(BeamSelection::Coverage),
            "power" => Some(BeamSelection::Power),
            _ => None,
        };

        if let [single] = items.as_slice() {
            if let Some(selection) = logical(single) {
                return Ok(selection);
            }
        }

        let mut beams: Vec<String> = Vec::with_capacity(items.len());
        for item in &items {
            if logical(item).is_some() {
                return Err(SubsetError::InvalidBeams(format!(
                    "{:?} cannot be combined with other beams",
                    item
                )));
            }
            let beam = canonical_beam(item).ok_or_else(|| {
                SubsetError::InvalidBeams(format!(
                    "{:?} is not one of {}",
                    item,
                    ALL_BEAMS.join(", ")
                ))
            })?;
            if !beams.contains(&beam) {
                beams.push(beam);
            }
        }

        Ok(BeamSelection::Beams(beams))
    }
}

impl fmt::Display for BeamSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeamSelection::All => f.write_str("all"),
            BeamSelection::Coverage => f.write_str("coverage"),
            BeamSelection::Power => f.write_str("power"),
            BeamSelection::Beams(beams) => f.write_str(&beams.join(",")),
        }
    }
}

impl Serialize for BeamSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// `0000`, `beam0000` and `BEAM0000` all name `BEAM0000`
fn canonical_beam(item: &str) -> Option<String> {
    let upper = item.to_ascii_uppercase();
    let digits = upper.strip_prefix(BEAM_PREFIX).unwrap_or(&upper);
    let beam = format!("{}{}", BEAM_PREFIX, digits);
    ALL_BEAMS.contains(&beam.as_str()).then_some(beam)
}

/// Provenance form of a beam name: the four digit suffix
pub fn beam_suffix(beam: &str) -> &str {
    beam.strip_prefix(BEAM_PREFIX).unwrap_or(beam)
}
