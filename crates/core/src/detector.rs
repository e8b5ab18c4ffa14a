// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! The three detectors the brain controls.

use crate::simple_display;

/// One of the fleet's three detectors. TPC is the only one that can link others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Detector {
    Tpc,
    Mv,
    Nv,
}

simple_display!(Detector {
    Tpc => "tpc",
    Mv => "mv",
    Nv => "nv",
});

impl Detector {
    pub const ALL: [Detector; 3] = [Detector::Tpc, Detector::Mv, Detector::Nv];

    /// Vetoes only, in a fixed order.
    pub const VETOES: [Detector; 2] = [Detector::Mv, Detector::Nv];

    pub fn is_veto(self) -> bool {
        matches!(self, Detector::Mv | Detector::Nv)
    }
}

impl std::str::FromStr for Detector {
    type Err = DetectorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tpc" => Ok(Detector::Tpc),
            "mv" => Ok(Detector::Mv),
            "nv" => Ok(Detector::Nv),
            other => Err(DetectorParseError(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognised detector name: {0:?}")]
pub struct DetectorParseError(pub String);

#[cfg(test)]
#[path = "detector_tests.rs"]
mod tests;
