// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! Standalone DAQ fleet control-brain daemon.

use std::sync::Arc;

use daq_core::{Clock, ReconciliationEngine, SystemClock};
use daq_daemon::dispatcher::{self, DispatchSignal};
use daq_daemon::{Config, MemoryStore, TokioSleeper};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let signal = Arc::new(DispatchSignal::default());
    let store = Arc::new(MemoryStore::new(
        config.run_modes.clone(),
        config.master_daq_config.clone(),
        signal.clone(),
    ));
    let shutdown = CancellationToken::new();
    let clock = SystemClock;

    let mut engine = ReconciliationEngine::new(
        clock.clone(),
        config.engine_config(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(TokioSleeper),
    );

    let dispatcher_clock = clock.clone();
    let dispatcher_handle = tokio::spawn(dispatcher::run(
        store,
        signal,
        move || dispatcher_clock.epoch_ms(),
        shutdown.clone(),
    ));

    let mut ticker = tokio::time::interval(config.tick_interval);
    info!(interval_ms = config.tick_interval.as_millis(), "reconciliation loop starting");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                engine.tick().await;
            }
        }
    }

    shutdown.cancel();
    if let Err(e) = dispatcher_handle.await {
        error!(error = %e, "dispatcher worker task panicked");
    }
}
