// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! Centralized environment variable access for the daemon crate.
//!
//! Loads the fleet's configuration keys and turns them into the typed
//! values the engine and its in-memory adapters need. Timeouts are
//! published in seconds (matching the daemon's config file convention) and
//! converted to milliseconds here, once, at the boundary.

use std::collections::HashMap;
use std::time::Duration;

use daq_core::Detector;
use tracing::warn;

/// One detector's configured reader/controller hosts, from `MasterDAQConfig`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct DetectorHosts {
    #[serde(default)]
    pub readers: Vec<String>,
    #[serde(default)]
    pub controller: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("failed to parse {key} as {expected}: {value:?}")]
    Parse {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("failed to parse MasterDAQConfig JSON: {0}")]
    MasterDaqConfig(#[from] serde_json::Error),
}

/// The daemon's fully resolved configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub arm_timeout: Duration,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    pub retry_reset: u32,
    pub time_between_commands: Duration,
    pub client_timeout: Duration,
    pub control_keys: Vec<String>,
    pub master_daq_config: HashMap<Detector, DetectorHosts>,
    /// Run-mode documents from the "options" collection, keyed by
    /// mode name. Optional: an empty fleet simply can't resolve any mode.
    pub run_modes: HashMap<String, serde_json::Value>,
    pub tick_interval: Duration,
}

fn require_seconds(key: &'static str) -> Result<Duration, ConfigError> {
    let raw = std::env::var(key).map_err(|_| ConfigError::Missing(key))?;
    let secs: u64 = raw.parse().map_err(|_| ConfigError::Parse {
        key,
        expected: "integer seconds",
        value: raw.clone(),
    })?;
    Ok(Duration::from_secs(secs))
}

fn require_u32(key: &'static str) -> Result<u32, ConfigError> {
    let raw = std::env::var(key).map_err(|_| ConfigError::Missing(key))?;
    raw.parse().map_err(|_| ConfigError::Parse {
        key,
        expected: "integer",
        value: raw,
    })
}

/// Reconciliation tick cadence. An implementation detail of the concurrency
/// model rather than a fleet-facing control key, so this gets a sane
/// default rather than a hard failure.
pub fn tick_interval() -> Duration {
    std::env::var("DAQ_TICK_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(2))
}

impl Config {
    /// Load every key from the process environment. Hard-fails via
    /// `ConfigError` for keys the fleet never defaults on its own: the
    /// timeouts, `RetryReset`, `TimeBetweenCommands`, `ClientTimeout`,
    /// `ControlKeys`, and `MasterDAQConfig`.
    pub fn load() -> Result<Self, ConfigError> {
        let control_keys = std::env::var("DAQ_CONTROL_KEYS")
            .map_err(|_| ConfigError::Missing("DAQ_CONTROL_KEYS"))?
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let master_daq_config_raw = std::env::var("DAQ_MASTER_DAQ_CONFIG")
            .map_err(|_| ConfigError::Missing("DAQ_MASTER_DAQ_CONFIG"))?;
        let raw_by_name: HashMap<String, DetectorHosts> = serde_json::from_str(&master_daq_config_raw)?;
        warn_on_unknown_detectors(&raw_by_name);
        let master_daq_config: HashMap<Detector, DetectorHosts> = raw_by_name
            .into_iter()
            .filter_map(|(name, hosts)| name.parse::<Detector>().ok().map(|d| (d, hosts)))
            .collect();

        Ok(Config {
            arm_timeout: require_seconds("DAQ_ARM_COMMAND_TIMEOUT")?,
            start_timeout: require_seconds("DAQ_START_COMMAND_TIMEOUT")?,
            stop_timeout: require_seconds("DAQ_STOP_COMMAND_TIMEOUT")?,
            retry_reset: require_u32("DAQ_RETRY_RESET")?,
            time_between_commands: require_seconds("DAQ_TIME_BETWEEN_COMMANDS")?,
            client_timeout: require_seconds("DAQ_CLIENT_TIMEOUT")?,
            control_keys,
            master_daq_config,
            run_modes: load_run_modes()?,
            tick_interval: tick_interval(),
        })
    }

    pub fn engine_config(&self) -> daq_core::EngineConfig {
        daq_core::EngineConfig {
            arm_timeout_ms: self.arm_timeout.as_millis() as u64,
            start_timeout_ms: self.start_timeout.as_millis() as u64,
            stop_timeout_ms: self.stop_timeout.as_millis() as u64,
            retry_reset: self.retry_reset,
            time_between_commands_ms: self.time_between_commands.as_millis() as u64,
            client_timeout_ms: self.client_timeout.as_millis() as u64,
            control_keys: self.control_keys.clone(),
        }
    }
}

/// Load the run-mode ("options") documents. Unset entirely means no modes
/// are known yet; present-but-malformed is a hard failure.
fn load_run_modes() -> Result<HashMap<String, serde_json::Value>, ConfigError> {
    match std::env::var("DAQ_RUN_MODES") {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(_) => Ok(HashMap::new()),
    }
}

/// Warns once at load time if `MasterDAQConfig` names a detector the fleet
/// doesn't recognise, rather than failing the whole load over a stray key.
fn warn_on_unknown_detectors(master_daq_config: &HashMap<String, DetectorHosts>) {
    for key in master_daq_config.keys() {
        if key.parse::<Detector>().is_err() {
            warn!(detector = %key, "MasterDAQConfig names an unrecognised detector");
        }
    }
}
