// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! Per-node status reports and the aggregate-status roll-up.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::simple_display;

/// Aggregate or per-node detector status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Status {
    Idle,
    Arming,
    Armed,
    Running,
    Error,
    Timeout,
    Unknown,
}

simple_display!(Status {
    Idle => "idle",
    Arming => "arming",
    Armed => "armed",
    Running => "running",
    Error => "error",
    Timeout => "timeout",
    Unknown => "unknown",
});

impl Status {
    /// Map the fleet's raw numeric status code onto a [`Status`].
    ///
    /// Matches the source's `STATUS` enumeration: 0=Idle .. 6=Unknown; any
    /// other code is treated as Unknown rather than rejected outright.
    pub fn from_code(code: i64) -> Status {
        match code {
            0 => Status::Idle,
            1 => Status::Arming,
            2 => Status::Armed,
            3 => Status::Running,
            4 => Status::Error,
            5 => Status::Timeout,
            _ => Status::Unknown,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            Status::Arming | Status::Armed | Status::Running | Status::Error | Status::Unknown
        )
    }
}

/// Which role a node plays within its detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Reader,
    Controller,
}

/// One node's latest reported status, as read from the status source.
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub host: String,
    pub kind: NodeKind,
    /// `None` if the status field was missing or unparseable.
    pub status_code: Option<i64>,
    pub rate: f64,
    pub buffer: f64,
    pub timestamp_ms: u64,
    /// Controller-only: the run mode it currently reports.
    pub mode: Option<String>,
    /// Controller-only: the current run number.
    pub number: Option<i64>,
}

impl NodeReport {
    /// This node's effective status: TIMEOUT if stale, UNKNOWN if unparseable,
    /// otherwise the decoded reported status.
    pub fn effective_status(&self, now_ms: u64, client_timeout_ms: u64) -> Status {
        if now_ms.saturating_sub(self.timestamp_ms) > client_timeout_ms {
            return Status::Timeout;
        }
        match self.status_code {
            Some(code) => Status::from_code(code),
            None => Status::Unknown,
        }
    }
}

/// One detector's rolled-up status plus derived fields.
#[derive(Debug, Clone)]
pub struct AggregateStatus {
    pub status: Status,
    pub rate: f64,
    pub buffer: f64,
    pub mode: String,
    pub number: i64,
    pub per_node: IndexMap<String, Status>,
}

impl AggregateStatus {
    pub fn unknown() -> Self {
        AggregateStatus {
            status: Status::Unknown,
            rate: 0.0,
            buffer: 0.0,
            mode: "none".to_string(),
            number: -1,
            per_node: IndexMap::new(),
        }
    }
}

/// Fold a detector's per-node reports into one [`AggregateStatus`].
///
/// `relevant_hosts`, when present, restricts the status roll-up to the named
/// hosts (the mode-scoped restriction); rate/buffer are always summed across
/// every reader report regardless of mode scoping, matching the source.
pub fn aggregate_status(
    reports: &[NodeReport],
    now_ms: u64,
    client_timeout_ms: u64,
    relevant_hosts: Option<&HashSet<String>>,
) -> AggregateStatus {
    let mut rate = 0.0;
    let mut buffer = 0.0;
    let mut mode: Option<String> = None;
    let mut number: Option<i64> = None;
    let mut per_node = IndexMap::new();

    for report in reports {
        let effective = report.effective_status(now_ms, client_timeout_ms);
        per_node.insert(report.host.clone(), effective);

        if report.kind == NodeKind::Reader {
            rate += report.rate;
            buffer += report.buffer;
        }
        if report.kind == NodeKind::Controller {
            if let Some(m) = &report.mode {
                mode = Some(m.clone());
            }
            if let Some(n) = report.number {
                number = Some(n);
            }
        }
    }

    let relevant: Vec<Status> = match relevant_hosts {
        Some(hosts) => per_node
            .iter()
            .filter(|(host, _)| hosts.contains(host.as_str()))
            .map(|(_, s)| *s)
            .collect(),
        None => per_node.values().copied().collect(),
    };

    let status = roll_up(&relevant);

    AggregateStatus {
        status,
        rate,
        buffer,
        mode: mode.unwrap_or_else(|| "none".to_string()),
        number: number.unwrap_or(-1),
        per_node,
    }
}

/// First-match-wins roll-up over a detector's relevant per-node statuses
///. An empty set rolls up to [`Status::Unknown`].
fn roll_up(statuses: &[Status]) -> Status {
    if statuses.is_empty() {
        return Status::Unknown;
    }
    if statuses.iter().any(|s| *s == Status::Arming) {
        return Status::Arming;
    }
    if statuses.iter().any(|s| *s == Status::Error) {
        return Status::Error;
    }
    if statuses.iter().any(|s| *s == Status::Timeout) {
        return Status::Timeout;
    }
    if statuses.iter().any(|s| *s == Status::Unknown) {
        return Status::Unknown;
    }
    if statuses.iter().all(|s| *s == Status::Idle) {
        return Status::Idle;
    }
    if statuses.iter().all(|s| *s == Status::Armed) {
        return Status::Armed;
    }
    if statuses.iter().all(|s| *s == Status::Running) {
        return Status::Running;
    }
    Status::Unknown
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
