// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! Computes which detectors are independent and which are folded under TPC
//!.

use crate::detector::Detector;

/// A set of detectors driven as one unit. `leader` is the detector that
/// receives commands; `members` includes the leader and any folded vetoes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkGroup {
    pub leader: Detector,
    pub members: Vec<Detector>,
}

impl LinkGroup {
    fn solo(detector: Detector) -> Self {
        LinkGroup {
            leader: detector,
            members: vec![detector],
        }
    }

    /// Members other than the leader — the linked peers the leader's ladder
    /// must also be compliant with before issuing a command.
    pub fn peers(&self) -> impl Iterator<Item = Detector> + '_ {
        self.members.iter().copied().filter(move |d| *d != self.leader)
    }
}

/// Resolve TPC's `link_mv`/`link_nv` into the fleet's effective command
/// groups. Every detector appears in exactly one group.
pub fn resolve_linkage(link_mv: bool, link_nv: bool) -> Vec<LinkGroup> {
    match (link_mv, link_nv) {
        (true, true) => vec![LinkGroup {
            leader: Detector::Tpc,
            members: vec![Detector::Tpc, Detector::Mv, Detector::Nv],
        }],
        (false, false) => vec![
            LinkGroup::solo(Detector::Tpc),
            LinkGroup::solo(Detector::Mv),
            LinkGroup::solo(Detector::Nv),
        ],
        (true, false) => vec![
            LinkGroup {
                leader: Detector::Tpc,
                members: vec![Detector::Tpc, Detector::Mv],
            },
            LinkGroup::solo(Detector::Nv),
        ],
        (false, true) => vec![
            LinkGroup {
                leader: Detector::Tpc,
                members: vec![Detector::Tpc, Detector::Nv],
            },
            LinkGroup::solo(Detector::Mv),
        ],
    }
}

/// The group that owns `detector` under this linkage.
pub fn group_of(groups: &[LinkGroup], detector: Detector) -> &LinkGroup {
    groups
        .iter()
        .find(|g| g.members.contains(&detector))
        .expect("every detector belongs to exactly one group")
}

/// Whether `detector` is evaluated independently by the reconciliation
/// engine, i.e. is the leader of its own group. A veto folded into TPC
/// never receives commands on its own.
pub fn is_leader(groups: &[LinkGroup], detector: Detector) -> bool {
    group_of(groups, detector).leader == detector
}

#[cfg(test)]
#[path = "linkage_tests.rs"]
mod tests;
