// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! Command records and the per-(detector, command) cooldown bookkeeping that
//! gates when the engine may issue them.

use std::collections::HashMap;

use crate::detector::Detector;
use crate::simple_display;

/// The three transitions the brain can command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Arm,
    Start,
    Stop,
}

simple_display!(Command {
    Arm => "arm",
    Start => "start",
    Stop => "stop",
});

/// Identifies one logical issuance of a command. A delayed stop splits into
/// two [`CommandRecord`]s (readers immediately, CC hosts after the stagger
/// delay) that share the same id, so an ack on either side resolves the same
/// outgoing command rather than being confused with some earlier issuance of
/// the same `(detector, command)` pair.
pub type CommandId = u64;

/// A command persisted into the durable queue.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub id: CommandId,
    pub command: Command,
    pub user: String,
    pub detector: Detector,
    pub mode: String,
    pub number_override: Option<i64>,
    pub hosts: Vec<String>,
    /// Per-host acknowledgement: `0` means pending, otherwise a timestamp.
    pub acknowledged: HashMap<String, u64>,
    pub created_at_ms: u64,
}

impl CommandRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: CommandId,
        command: Command,
        user: impl Into<String>,
        detector: Detector,
        mode: impl Into<String>,
        hosts: Vec<String>,
        created_at_ms: u64,
    ) -> Self {
        let acknowledged = hosts.iter().map(|h| (h.clone(), 0u64)).collect();
        CommandRecord {
            id,
            command,
            user: user.into(),
            detector,
            mode: mode.into(),
            number_override: None,
            hosts,
            acknowledged,
            created_at_ms,
        }
    }

    /// `true` once every host in the target list has acknowledged.
    pub fn fully_acknowledged(&self) -> bool {
        !self.acknowledged.is_empty() && self.acknowledged.values().all(|&ts| ts != 0)
    }

    /// The latest non-zero acknowledgement timestamp, if any host has acked.
    pub fn latest_ack_ms(&self) -> Option<u64> {
        self.acknowledged.values().copied().filter(|&ts| ts != 0).max()
    }
}

/// Per-(detector, command) last-issued timestamps, plus the per-detector
/// force-stop and retry-count bookkeeping that gates the stop backoff
/// ladder and caps at-most-one-start-per-tick.
#[derive(Debug, Clone)]
pub struct CooldownState {
    last_command_ms: HashMap<(Detector, Command), u64>,
    can_force_stop: HashMap<Detector, bool>,
    error_stop_count: HashMap<Detector, u32>,
}

impl Default for CooldownState {
    fn default() -> Self {
        let can_force_stop = Detector::ALL.iter().map(|d| (*d, true)).collect();
        let error_stop_count = Detector::ALL.iter().map(|d| (*d, 0)).collect();
        CooldownState {
            last_command_ms: HashMap::new(),
            can_force_stop,
            error_stop_count,
        }
    }
}

impl CooldownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` means the command has never been issued; callers treat that as
    /// "cooldown trivially satisfied" the first time, matching the source's
    /// fallback for a missing `last_command` entry.
    pub fn last_command_ms(&self, detector: Detector, command: Command) -> Option<u64> {
        self.last_command_ms.get(&(detector, command)).copied()
    }

    pub fn record_command(&mut self, detector: Detector, command: Command, now_ms: u64) {
        self.last_command_ms.insert((detector, command), now_ms);
    }

    pub fn can_force_stop(&self, detector: Detector) -> bool {
        self.can_force_stop.get(&detector).copied().unwrap_or(true)
    }

    pub fn set_can_force_stop(&mut self, detector: Detector, value: bool) {
        self.can_force_stop.insert(detector, value);
    }

    pub fn error_stop_count(&self, detector: Detector) -> u32 {
        self.error_stop_count.get(&detector).copied().unwrap_or(0)
    }

    pub fn increment_error_stop_count(&mut self, detector: Detector) {
        *self.error_stop_count.entry(detector).or_insert(0) += 1;
    }

    pub fn reset_error_stop_count(&mut self, detector: Detector) {
        self.error_stop_count.insert(detector, 0);
    }

    /// Observing `detector` IDLE resets its back-off counter and restores
    /// its force-stop privilege.
    pub fn observe_idle(&mut self, detector: Detector) {
        self.reset_error_stop_count(detector);
        self.set_can_force_stop(detector, true);
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
