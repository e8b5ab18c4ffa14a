// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! Run documents inserted on `start` and sealed on `stop`.

use crate::detector::Detector;

/// Where the run's live data ends up, when the resolved mode declares one.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OutputLocation {
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub location: String,
}

/// An operator comment attached at run start.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunComment {
    pub user: String,
    pub date_ms: u64,
    pub comment: String,
}

/// A run document: created once on `start`, sealed at most once on `stop`
///.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunDocument {
    pub number: i64,
    pub detectors: Vec<Detector>,
    pub user: String,
    pub mode: String,
    /// The fully resolved run-mode configuration snapshot.
    pub daq_config: serde_json::Value,
    pub source: Option<String>,
    pub data: Option<OutputLocation>,
    pub comments: Vec<RunComment>,
    pub start_ms: u64,
    pub end_ms: Option<u64>,
    /// Always `None` at insert time; an external post-processing system
    /// flips it later. The core never writes to it again.
    pub bootstrax_state: Option<String>,
    pub tags: Vec<String>,
    pub rate_avg: Option<f64>,
    pub rate_max: Option<f64>,
}

impl RunDocument {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        number: i64,
        detectors: Vec<Detector>,
        user: impl Into<String>,
        mode: impl Into<String>,
        daq_config: serde_json::Value,
        source: Option<String>,
        data: Option<OutputLocation>,
        comment: Option<RunComment>,
        start_ms: u64,
    ) -> Self {
        RunDocument {
            number,
            detectors,
            user: user.into(),
            mode: mode.into(),
            daq_config,
            source,
            data,
            comments: comment.into_iter().collect(),
            start_ms,
            end_ms: None,
            bootstrax_state: None,
            tags: Vec::new(),
            rate_avg: None,
            rate_max: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_ms.is_none()
    }

    pub fn push_messy_tag(&mut self) {
        self.tags.push("messy".to_string());
    }

    /// Seal the run at most once; a second call is a
    /// no-op, matching `SetStopTime`'s idempotence requirement.
    pub fn close(&mut self, end_ms: u64) -> bool {
        if self.end_ms.is_some() {
            return false;
        }
        self.end_ms = Some(end_ms);
        true
    }

    pub fn set_rates(&mut self, avg: f64, max: f64) {
        self.rate_avg = Some(avg);
        self.rate_max = Some(max);
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
