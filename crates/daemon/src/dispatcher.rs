// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! The command-dispatcher background worker.
//!
//! A single `tokio` task that wakes on a `Notify` signal (fired whenever a
//! new command is enqueued) or after a capped timed wait, and promotes any
//! queued command whose delay has elapsed. Mirrors the source's
//! `threading.Event`-based worker loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::memory_store::MemoryStore;

/// Upper bound on the worker's timed wait between promotion passes.
const MAX_WAIT: Duration = Duration::from_secs(10);

/// Wakes the dispatcher worker immediately instead of waiting out its
/// capped timer. `MemoryStore::enqueue` notifies this itself after a
/// successful enqueue so low-delay commands promote promptly.
#[derive(Default)]
pub struct DispatchSignal(Notify);

impl DispatchSignal {
    pub fn notify(&self) {
        self.0.notify_one();
    }
}

pub async fn run(
    store: Arc<MemoryStore>,
    signal: Arc<DispatchSignal>,
    clock_epoch_ms: impl Fn() -> u64 + Send + Sync + 'static,
    shutdown: CancellationToken,
) {
    info!("command dispatcher worker starting");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("command dispatcher worker shutting down");
                return;
            }
            _ = signal.0.notified() => {
                debug!("dispatcher woken by enqueue signal");
            }
            _ = tokio::time::sleep(MAX_WAIT) => {
                debug!("dispatcher woken by capped timer");
            }
        }
        store.promote_due(clock_epoch_ms());
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
