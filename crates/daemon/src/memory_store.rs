// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! In-process implementation of every `daq_core::ports` trait.
//!
//! The original system backs these ports with MongoDB collections reached
//! over the network; this adapter keeps the same shapes (a goal/control-key
//! map, a run-mode "options" table with `includes` chains, an outgoing
//! command queue with delayed visibility) entirely in memory, behind
//! `parking_lot::Mutex`, so the daemon binary runs standalone for demos and
//! integration tests don't need a database.
//!
//! Nodes aren't real here (dynamic node discovery is a declared non-goal):
//! the command dispatcher (`crate::dispatcher`) acknowledges an outgoing
//! command for every targeted host the instant it promotes it, simulating a
//! fully responsive fleet.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use daq_core::{
    AggregateSink, AggregateStatus, CommandId, CommandRecord, CommandSink, Detector, ErrorKind,
    ErrorSink, GoalSource, ModeSource, NodeReport, PortError, Priority, RawControlValue, RunDocument,
    RunRecorder, Sleeper, StatusSource,
};
use tracing::{debug, info, warn};

use crate::dispatcher::DispatchSignal;
use crate::env::DetectorHosts;

/// A command sitting in the durable queue, waiting for its delay to elapse.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub record: CommandRecord,
    pub visible_at_ms: u64,
}

/// Samples accumulated while a run is open, used to finalize its rate stats.
#[derive(Debug, Default, Clone)]
struct RateSamples {
    rates: Vec<f64>,
}

/// The single adapter struct backing all of `daq_core::ports` for the
/// standalone daemon binary.
pub struct MemoryStore {
    reports: Mutex<HashMap<Detector, Vec<NodeReport>>>,
    goals: Mutex<HashMap<Detector, HashMap<String, RawControlValue>>>,
    run_modes: HashMap<String, serde_json::Value>,
    master_daq_config: HashMap<Detector, DetectorHosts>,
    pending: Mutex<Vec<QueuedCommand>>,
    acks: Mutex<HashMap<CommandId, u64>>,
    next_run_number: AtomicI64,
    runs: Mutex<Vec<RunDocument>>,
    rate_samples: Mutex<HashMap<i64, RateSamples>>,
    aggregates: Mutex<HashMap<Detector, AggregateStatus>>,
    signal: Arc<DispatchSignal>,
}

impl MemoryStore {
    pub fn new(
        run_modes: HashMap<String, serde_json::Value>,
        master_daq_config: HashMap<Detector, DetectorHosts>,
        signal: Arc<DispatchSignal>,
    ) -> Self {
        MemoryStore {
            reports: Mutex::new(HashMap::new()),
            goals: Mutex::new(HashMap::new()),
            run_modes,
            master_daq_config,
            pending: Mutex::new(Vec::new()),
            acks: Mutex::new(HashMap::new()),
            next_run_number: AtomicI64::new(0),
            runs: Mutex::new(Vec::new()),
            rate_samples: Mutex::new(HashMap::new()),
            aggregates: Mutex::new(HashMap::new()),
            signal,
        }
    }

    /// Operator-facing write path: a node reports its latest status.
    pub fn submit_report(&self, detector: Detector, report: NodeReport) {
        let mut reports = self.reports.lock();
        let entry = reports.entry(detector).or_default();
        entry.retain(|r| r.host != report.host);
        entry.push(report);
    }

    /// Operator-facing write path: set a control-key value for a detector.
    pub fn set_goal_value(&self, detector: Detector, key: impl Into<String>, value: RawControlValue) {
        self.goals.lock().entry(detector).or_default().insert(key.into(), value);
    }

    /// Resolve a run-mode's `includes` chain by right-fold merge, stripping
    /// `description`/`includes`/`subconfig`.
    fn resolve_mode_doc(&self, mode: &str) -> Option<serde_json::Value> {
        let base = self.run_modes.get(mode)?;
        let includes: Vec<String> = base
            .get("includes")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let mut merged = serde_json::Map::new();
        for name in &includes {
            if let Some(doc) = self.run_modes.get(name) {
                if let serde_json::Value::Object(map) = doc {
                    merged.extend(map.clone());
                }
            } else {
                warn!(mode, subconfig = %name, "run mode includes a subconfig that doesn't exist");
            }
        }
        if let serde_json::Value::Object(map) = base {
            merged.extend(map.clone());
        }
        merged.remove("description");
        merged.remove("includes");
        merged.remove("subconfig");
        Some(serde_json::Value::Object(merged))
    }

    /// Promote queued commands whose delay has elapsed, immediately
    /// acknowledging them for every targeted host (see module docs). Called
    /// by the dispatcher worker; exposed so the worker owns the cadence.
    pub fn promote_due(&self, now_ms: u64) {
        let mut pending = self.pending.lock();
        let (due, still_pending): (Vec<_>, Vec<_>) =
            pending.drain(..).partition(|q| q.visible_at_ms <= now_ms);
        *pending = still_pending;
        drop(pending);

        for queued in due {
            self.acks.lock().insert(queued.record.id, now_ms);
            info!(
                detector = %queued.record.detector,
                command = %queued.record.command,
                hosts = queued.record.hosts.len(),
                "command promoted and acknowledged by fleet"
            );
        }
    }
}

#[async_trait]
impl StatusSource for MemoryStore {
    async fn latest_reports(&self, detector: Detector) -> Result<Vec<NodeReport>, PortError> {
        Ok(self.reports.lock().get(&detector).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl GoalSource for MemoryStore {
    async fn raw_goals(
        &self,
    ) -> Result<HashMap<Detector, HashMap<String, RawControlValue>>, PortError> {
        Ok(self.goals.lock().clone())
    }
}

#[async_trait]
impl ModeSource for MemoryStore {
    async fn resolve_mode(&self, mode: &str) -> Result<serde_json::Value, PortError> {
        Ok(self.resolve_mode_doc(mode).unwrap_or(serde_json::Value::Null))
    }

    async fn hosts_for_mode(&self, mode: &str) -> Result<(Vec<String>, Vec<String>), PortError> {
        let Some(doc) = self.resolve_mode_doc(mode) else {
            debug!(mode, "no such run mode; returning empty host set");
            return Ok((Vec::new(), Vec::new()));
        };
        let mut readers = Vec::new();
        let mut cc = Vec::new();
        if let Some(boards) = doc.get("boards").and_then(|v| v.as_array()) {
            for board in boards {
                let host = board.get("host").and_then(|v| v.as_str());
                let kind = board.get("type").and_then(|v| v.as_str());
                let (Some(host), Some(kind)) = (host, kind) else { continue };
                if kind.contains("f17") {
                    if !readers.contains(&host.to_string()) {
                        readers.push(host.to_string());
                    }
                } else if kind == "f2718" && !cc.contains(&host.to_string()) {
                    cc.push(host.to_string());
                }
            }
        }
        Ok((readers, cc))
    }

    async fn configured_nodes(
        &self,
        detector: Detector,
    ) -> Result<(Vec<String>, Vec<String>), PortError> {
        let hosts = self.master_daq_config.get(&detector).cloned().unwrap_or_default();
        Ok((hosts.readers, hosts.controller))
    }
}

#[async_trait]
impl CommandSink for MemoryStore {
    async fn enqueue(&self, record: CommandRecord, delay_ms: u64) -> Result<(), PortError> {
        let visible_at_ms = record.created_at_ms + delay_ms;
        self.pending.lock().push(QueuedCommand { record, visible_at_ms });
        self.signal.notify();
        Ok(())
    }

    async fn ack_time_ms(&self, id: CommandId) -> Result<Option<u64>, PortError> {
        Ok(self.acks.lock().get(&id).copied())
    }
}

#[async_trait]
impl RunRecorder for MemoryStore {
    async fn next_run_number(&self) -> Result<i64, PortError> {
        Ok(self.next_run_number.fetch_add(1, Ordering::SeqCst))
    }

    async fn insert_run(&self, run: RunDocument) -> Result<(), PortError> {
        self.rate_samples.lock().insert(run.number, RateSamples::default());
        self.runs.lock().push(run);
        Ok(())
    }

    async fn close_run(
        &self,
        number: i64,
        _detectors: &[Detector],
        end_ms: u64,
        push_messy: bool,
    ) -> Result<bool, PortError> {
        let mut runs = self.runs.lock();
        let Some(run) = runs.iter_mut().find(|r| r.number == number && r.is_open()) else {
            return Ok(false);
        };
        let sealed = run.close(end_ms);
        if sealed && push_messy {
            run.push_messy_tag();
        }
        Ok(sealed)
    }

    async fn run_start_ms(&self, number: i64) -> Result<Option<u64>, PortError> {
        Ok(self.runs.lock().iter().find(|r| r.number == number).map(|r| r.start_ms))
    }

    async fn finalize_rates(&self, number: i64, _detector: Detector) -> Result<(), PortError> {
        let samples = self.rate_samples.lock().remove(&number).unwrap_or_default();
        if samples.rates.is_empty() {
            return Ok(());
        }
        let avg = samples.rates.iter().sum::<f64>() / samples.rates.len() as f64;
        let max = samples.rates.iter().cloned().fold(f64::MIN, f64::max);
        let mut runs = self.runs.lock();
        if let Some(run) = runs.iter_mut().find(|r| r.number == number) {
            run.set_rates(avg, max);
        }
        Ok(())
    }
}

#[async_trait]
impl AggregateSink for MemoryStore {
    async fn publish(&self, detector: Detector, aggregate: &AggregateStatus) -> Result<(), PortError> {
        if aggregate.number >= 0 {
            if let Some(samples) = self.rate_samples.lock().get_mut(&aggregate.number) {
                samples.rates.push(aggregate.rate);
            }
        }
        self.aggregates.lock().insert(detector, aggregate.clone());
        Ok(())
    }
}

#[async_trait]
impl ErrorSink for MemoryStore {
    async fn log(
        &self,
        message: &str,
        priority: Priority,
        kind: Option<ErrorKind>,
    ) -> Result<(), PortError> {
        match priority {
            Priority::Fatal | Priority::Error => warn!(?kind, "{message}"),
            Priority::Warning => warn!(?kind, "{message}"),
            Priority::Message | Priority::Debug => debug!(?kind, "{message}"),
        }
        Ok(())
    }
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
}

#[cfg(test)]
#[path = "memory_store_tests.rs"]
mod tests;
