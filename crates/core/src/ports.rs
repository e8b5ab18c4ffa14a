// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! Narrow collaborator traits the reconciliation engine depends on.
//!
//! Each port is a seam onto an external system (the status store, the
//! command queue, the run-metadata store, ...). None hold a reference back
//! to the engine, so the engine is directly testable against in-memory fakes
//!.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::command::{CommandId, CommandRecord};
use crate::detector::Detector;
use crate::error_reporter::{ErrorKind, Priority};
use crate::goal::RawControlValue;
use crate::run::RunDocument;
use crate::status::{AggregateStatus, NodeReport};

/// A failure from any collaborator. Every port method returns this; the
/// engine logs it and treats the failing operation as a no-op for the tick
/// rather than propagating it out of `tick()`.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct PortError {
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PortError {
    pub fn new(message: impl Into<String>) -> Self {
        PortError {
            message: message.into(),
            source: None,
        }
    }

    pub fn from_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        PortError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Reads the latest per-node status reports for a detector.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn latest_reports(&self, detector: Detector) -> Result<Vec<NodeReport>, PortError>;
}

/// Reads the operator's most recently written control-key values.
#[async_trait]
pub trait GoalSource: Send + Sync {
    async fn raw_goals(
        &self,
    ) -> Result<HashMap<Detector, HashMap<String, RawControlValue>>, PortError>;
}

/// Run-mode resolution and host membership.
#[async_trait]
pub trait ModeSource: Send + Sync {
    /// Resolve a mode's `includes` chain (right-fold merge, later keys win),
    /// with `description`/`includes`/`subconfig` stripped.
    async fn resolve_mode(&self, mode: &str) -> Result<serde_json::Value, PortError>;

    /// Reader and CC hosts the named mode declares relevant.
    async fn hosts_for_mode(&self, mode: &str) -> Result<(Vec<String>, Vec<String>), PortError>;

    /// Every configured reader and CC host for a detector, independent of mode.
    async fn configured_nodes(
        &self,
        detector: Detector,
    ) -> Result<(Vec<String>, Vec<String>), PortError>;
}

/// The durable, delayed-visibility command queue.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn enqueue(&self, record: CommandRecord, delay_ms: u64) -> Result<(), PortError>;

    /// The most recent acknowledgement timestamp observed for the specific
    /// outgoing record `id`, if the background worker has promoted it and a
    /// host has acked. Scoped to one issuance, not the `(detector, command)`
    /// pair in the abstract, so a stale ack from an earlier run can never be
    /// mistaken for this one.
    async fn ack_time_ms(&self, id: CommandId) -> Result<Option<u64>, PortError>;
}

/// The run-metadata store.
#[async_trait]
pub trait RunRecorder: Send + Sync {
    async fn next_run_number(&self) -> Result<i64, PortError>;
    async fn insert_run(&self, run: RunDocument) -> Result<(), PortError>;

    /// Seal the open run document matching `number`/`detectors`; `push_messy`
    /// is true when the stop was forced or its acknowledgement was missed.
    /// Returns `false` if the run was already sealed.
    async fn close_run(
        &self,
        number: i64,
        detectors: &[Detector],
        end_ms: u64,
        push_messy: bool,
    ) -> Result<bool, PortError>;

    async fn run_start_ms(&self, number: i64) -> Result<Option<u64>, PortError>;

    /// Compute and persist this run's average/maximum rate from the
    /// aggregate-status samples recorded under `number`.
    async fn finalize_rates(&self, number: i64, detector: Detector) -> Result<(), PortError>;
}

/// A bounded, cooperative delay. Kept out of `daq-core` so the engine stays
/// executor-agnostic; production code backs this with a real timer, tests
/// back it with a no-op so bounded ACK polling stays fast.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep_ms(&self, ms: u64);
}

/// Per-tick aggregate-status publication.
#[async_trait]
pub trait AggregateSink: Send + Sync {
    async fn publish(&self, detector: Detector, aggregate: &AggregateStatus) -> Result<(), PortError>;
}

/// Structured, rate-limited error/log emission.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn log(
        &self,
        message: &str,
        priority: Priority,
        kind: Option<ErrorKind>,
    ) -> Result<(), PortError>;
}
