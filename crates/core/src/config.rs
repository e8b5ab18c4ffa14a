// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! Reconciliation engine tuning parameters.
//!
//! Loading these from the process environment is the daemon crate's concern
//! (`daq_daemon::env`); this type is the plain data the engine consumes.

/// The subset of the fleet's configuration keys the engine itself needs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub arm_timeout_ms: u64,
    pub start_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    /// Max consecutive stop retries before escalating (`RetryReset`).
    pub retry_reset: u32,
    pub time_between_commands_ms: u64,
    /// Threshold for marking a stale node report TIMEOUT (`ClientTimeout`).
    pub client_timeout_ms: u64,
    /// Control-key names the Goal Reader must materialise (`ControlKeys`).
    pub control_keys: Vec<String>,
}

impl EngineConfig {
    pub fn timeout_for(&self, command: crate::command::Command) -> u64 {
        use crate::command::Command;
        match command {
            Command::Arm => self.arm_timeout_ms,
            Command::Start => self.start_timeout_ms,
            Command::Stop => self.stop_timeout_ms,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Default for EngineConfig {
    /// Convenience defaults for tests; production code always loads these
    /// explicitly from configuration.
    fn default() -> Self {
        EngineConfig {
            arm_timeout_ms: 30_000,
            start_timeout_ms: 30_000,
            stop_timeout_ms: 60_000,
            retry_reset: 3,
            time_between_commands_ms: 10_000,
            client_timeout_ms: 30_000,
            control_keys: vec![
                "active".into(),
                "mode".into(),
                "user".into(),
                "stop_after".into(),
                "comment".into(),
                "finish_run_on_stop".into(),
                "link_mv".into(),
                "link_nv".into(),
            ],
        }
    }
}
