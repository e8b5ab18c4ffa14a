// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! daq-daemon: the standalone process wiring a `daq_core::ReconciliationEngine`
//! to an in-memory adapter and a periodic tick driver.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod dispatcher;
pub mod env;
pub mod memory_store;

pub use dispatcher::DispatchSignal;
pub use env::{Config, ConfigError};
pub use memory_store::{MemoryStore, TokioSleeper};
