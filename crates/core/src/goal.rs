// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! Operator-supplied target state per detector.

use std::collections::HashMap;

use crate::detector::Detector;

/// One raw control-key write, as read from the incoming-commands collection.
#[derive(Debug, Clone)]
pub struct RawControlValue {
    pub value: String,
    pub user: String,
}

/// The operator's target state for one detector.
///
/// Every field is read-only from the engine's perspective; it is materialised
/// once per tick by [`parse_goals`] and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Goal {
    pub active: bool,
    pub mode: String,
    pub user: String,
    /// Run duration in minutes; absent means no auto-rotation.
    pub stop_after: Option<u32>,
    pub comment: Option<String>,
    pub finish_run_on_stop: bool,
    /// Meaningful only for [`Detector::Tpc`].
    pub link_mv: bool,
    /// Meaningful only for [`Detector::Tpc`].
    pub link_nv: bool,
}

impl Goal {
    pub fn links(&self, detector: Detector) -> bool {
        debug_assert_eq!(detector, Detector::Tpc, "only TPC goals carry link flags");
        self.link_mv || self.link_nv
    }
}

/// Assemble each detector's [`Goal`] from the raw control-key snapshot.
///
/// `control_keys` names every key the Goal Reader has been configured to
/// materialise. Every entry of `control_keys` must be present for every
/// detector — there is no optional subset — or this returns `None` and the
/// reconciliation engine skips the tick entirely.
pub fn parse_goals(
    raw: &HashMap<Detector, HashMap<String, RawControlValue>>,
    control_keys: &[String],
) -> Option<HashMap<Detector, Goal>> {
    let mut goals = HashMap::new();

    for detector in Detector::ALL {
        let by_key = raw.get(&detector)?;

        for key in control_keys {
            if !by_key.contains_key(key.as_str()) {
                return None;
            }
        }

        let active = parse_bool(by_key.get("active").map(|v| v.value.as_str()).unwrap_or("false"));
        let mode = by_key
            .get("mode")
            .map(|v| v.value.clone())
            .unwrap_or_default();
        let user = by_key
            .get("user")
            .map(|v| v.value.clone())
            .unwrap_or_default();
        let finish_run_on_stop = parse_bool(
            by_key
                .get("finish_run_on_stop")
                .map(|v| v.value.as_str())
                .unwrap_or("false"),
        );
        let stop_after = by_key
            .get("stop_after")
            .and_then(|v| v.value.parse::<u32>().ok());
        let comment = by_key
            .get("comment")
            .map(|v| v.value.clone())
            .filter(|s| !s.is_empty());
        let link_mv = detector == Detector::Tpc
            && parse_bool(by_key.get("link_mv").map(|v| v.value.as_str()).unwrap_or("false"));
        let link_nv = detector == Detector::Tpc
            && parse_bool(by_key.get("link_nv").map(|v| v.value.as_str()).unwrap_or("false"));

        goals.insert(
            detector,
            Goal {
                active,
                mode,
                user,
                stop_after,
                comment,
                finish_run_on_stop,
                link_mv,
                link_nv,
            },
        );
    }

    Some(goals)
}

/// Convert the goal's string-typed booleans (`"true"`/`"false"`) at the
/// Goal Reader boundary; the engine never sees a stringly-typed flag.
fn parse_bool(raw: &str) -> bool {
    raw.eq_ignore_ascii_case("true")
}

#[cfg(test)]
#[path = "goal_tests.rs"]
mod tests;
