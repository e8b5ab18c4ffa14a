// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

//! Workspace-level end-to-end scenarios, driving the full
//! `daq-daemon` wiring: `ReconciliationEngine` over `MemoryStore`, plus the
//! command-dispatcher worker, against a `FakeClock`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use daq_core::{
    Clock, Command, CommandSink, Detector, EngineConfig, FakeClock, NodeKind, NodeReport,
    RawControlValue, ReconciliationEngine, RunRecorder,
};
use daq_daemon::dispatcher::{self, DispatchSignal};
use daq_daemon::MemoryStore;
use tokio_util::sync::CancellationToken;

struct NoopSleeper;

#[async_trait::async_trait]
impl daq_core::Sleeper for NoopSleeper {
    async fn sleep_ms(&self, _ms: u64) {}
}

fn reader(host: &str, code: i64, ts_ms: u64) -> NodeReport {
    NodeReport {
        host: host.to_string(),
        kind: NodeKind::Reader,
        status_code: Some(code),
        rate: 1.0,
        buffer: 0.0,
        timestamp_ms: ts_ms,
        mode: None,
        number: None,
    }
}

fn goal_value(value: &str) -> RawControlValue {
    RawControlValue {
        value: value.to_string(),
        user: "alice".to_string(),
    }
}

fn set_base_goal(store: &MemoryStore, detector: Detector, active: bool) {
    store.set_goal_value(detector, "active", goal_value(if active { "true" } else { "false" }));
    store.set_goal_value(detector, "mode", goal_value("background"));
    store.set_goal_value(detector, "user", goal_value("alice"));
    store.set_goal_value(detector, "finish_run_on_stop", goal_value("false"));
    store.set_goal_value(detector, "stop_after", goal_value(""));
    store.set_goal_value(detector, "comment", goal_value(""));
    // Every detector's snapshot carries every configured control key, even
    // link_mv/link_nv which are only meaningful for Tpc's Goal.
    store.set_goal_value(detector, "link_mv", goal_value("false"));
    store.set_goal_value(detector, "link_nv", goal_value("false"));
}

fn run_modes() -> HashMap<String, serde_json::Value> {
    let mut modes = HashMap::new();
    modes.insert(
        "background".to_string(),
        serde_json::json!({"boards": [
            {"type": "f1724", "host": "tpc-r1"},
            {"type": "f2718", "host": "tpc-cc"},
        ]}),
    );
    modes
}

fn harness() -> (ReconciliationEngine<FakeClock>, FakeClock, Arc<MemoryStore>) {
    let clock = FakeClock::new();
    let signal = Arc::new(DispatchSignal::default());
    let store = Arc::new(MemoryStore::new(run_modes(), HashMap::new(), signal));
    let engine = ReconciliationEngine::new(
        clock.clone(),
        EngineConfig::default(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(NoopSleeper),
    );
    (engine, clock, store)
}

#[tokio::test]
async fn scenario_1_cold_start_unlinked_tpc_issues_arm() {
    let (mut engine, clock, store) = harness();
    set_base_goal(&store, Detector::Tpc, true);
    set_base_goal(&store, Detector::Mv, false);
    set_base_goal(&store, Detector::Nv, false);
    let ts = clock.epoch_ms();
    store.submit_report(Detector::Tpc, reader("tpc-r1", 0, ts));
    store.submit_report(Detector::Mv, reader("mv-r1", 0, ts));
    store.submit_report(Detector::Nv, reader("nv-r1", 0, ts));

    let id = engine.next_command_id();
    engine.tick().await;

    assert_eq!(store.ack_time_ms(id).await.unwrap(), None, "nothing promotes without the dispatcher worker");
    assert!(engine.cooldown().last_command_ms(Detector::Tpc, Command::Arm).is_some());
}

#[tokio::test]
async fn scenario_2_armed_to_running_inserts_run_document() {
    let (mut engine, clock, store) = harness();
    set_base_goal(&store, Detector::Tpc, true);
    set_base_goal(&store, Detector::Mv, false);
    set_base_goal(&store, Detector::Nv, false);

    // Tick 1: IDLE -> arm issued.
    let ts = clock.epoch_ms();
    store.submit_report(Detector::Tpc, reader("tpc-r1", 0, ts));
    store.submit_report(Detector::Mv, reader("mv-r1", 0, ts));
    store.submit_report(Detector::Nv, reader("nv-r1", 0, ts));
    engine.tick().await;

    // Tick 2, 30s later: ARMED -> start issued, run document inserted.
    clock.advance(Duration::from_secs(30));
    let ts = clock.epoch_ms();
    store.submit_report(Detector::Tpc, reader("tpc-r1", 2, ts));
    store.submit_report(Detector::Mv, reader("mv-r1", 0, ts));
    store.submit_report(Detector::Nv, reader("nv-r1", 0, ts));
    engine.tick().await;

    assert_eq!(store.next_run_number().await.unwrap(), 1, "run 0 already allocated on start");
}

#[tokio::test]
async fn scenario_3_linked_run_with_lagging_veto_issues_nothing() {
    let (mut engine, clock, store) = harness();
    store.set_goal_value(Detector::Tpc, "active", goal_value("true"));
    store.set_goal_value(Detector::Tpc, "mode", goal_value("background"));
    store.set_goal_value(Detector::Tpc, "user", goal_value("alice"));
    store.set_goal_value(Detector::Tpc, "finish_run_on_stop", goal_value("false"));
    store.set_goal_value(Detector::Tpc, "stop_after", goal_value(""));
    store.set_goal_value(Detector::Tpc, "comment", goal_value(""));
    store.set_goal_value(Detector::Tpc, "link_mv", goal_value("true"));
    store.set_goal_value(Detector::Tpc, "link_nv", goal_value("true"));
    set_base_goal(&store, Detector::Mv, true);
    set_base_goal(&store, Detector::Nv, true);
    let ts = clock.epoch_ms();
    store.submit_report(Detector::Tpc, reader("tpc-r1", 2, ts));
    store.submit_report(Detector::Mv, reader("mv-r1", 2, ts));
    store.submit_report(Detector::Nv, reader("nv-r1", 1, ts)); // arming

    let id = engine.next_command_id();
    engine.tick().await;

    assert_eq!(engine.next_command_id(), id, "lagging veto means no command is issued at all");
}

#[tokio::test]
async fn scenario_5_stop_backoff_matches_linear_schedule() {
    let (mut engine, clock, store) = harness();
    set_base_goal(&store, Detector::Tpc, true);
    set_base_goal(&store, Detector::Mv, false);
    set_base_goal(&store, Detector::Nv, false);

    let ts = clock.epoch_ms();
    store.submit_report(Detector::Tpc, reader("tpc-r1", 4, ts)); // error
    store.submit_report(Detector::Mv, reader("mv-r1", 0, ts));
    store.submit_report(Detector::Nv, reader("nv-r1", 0, ts));
    engine.tick().await;
    assert!(!engine.cooldown().can_force_stop(Detector::Tpc), "t=0 forced stop flips the flag");

    clock.advance(Duration::from_secs(70));
    let ts = clock.epoch_ms();
    store.submit_report(Detector::Tpc, reader("tpc-r1", 4, ts));
    engine.tick().await;
    assert_eq!(engine.cooldown().error_stop_count(Detector::Tpc), 1, "t=70 retry, counter -> 1");

    clock.advance(Duration::from_secs(70));
    let ts = clock.epoch_ms();
    store.submit_report(Detector::Tpc, reader("tpc-r1", 4, ts));
    engine.tick().await;
    assert_eq!(engine.cooldown().error_stop_count(Detector::Tpc), 1, "t=140 within back-off window");

    clock.advance(Duration::from_secs(70));
    let ts = clock.epoch_ms();
    store.submit_report(Detector::Tpc, reader("tpc-r1", 4, ts));
    engine.tick().await;
    assert_eq!(engine.cooldown().error_stop_count(Detector::Tpc), 2, "t=210 retry, counter -> 2");
}

#[tokio::test]
async fn scenario_6_run_turnover_issues_stop_after_stop_after_elapses() {
    let (mut engine, clock, store) = harness();
    set_base_goal(&store, Detector::Tpc, true);
    set_base_goal(&store, Detector::Mv, false);
    set_base_goal(&store, Detector::Nv, false);
    store.set_goal_value(Detector::Tpc, "stop_after", goal_value("60"));

    let run = daq_core::RunDocument::open(
        0,
        vec![Detector::Tpc],
        "alice",
        "background",
        serde_json::json!({}),
        None,
        None,
        None,
        clock.epoch_ms(),
    );
    store.insert_run(run).await.unwrap();

    let mut controller = reader("tpc-cc", 3, clock.epoch_ms());
    controller.kind = NodeKind::Controller;
    controller.number = Some(0);
    controller.mode = Some("background".into());
    store.submit_report(Detector::Tpc, reader("tpc-r1", 3, clock.epoch_ms()));
    store.submit_report(Detector::Tpc, controller);
    store.submit_report(Detector::Mv, reader("mv-r1", 0, clock.epoch_ms()));
    store.submit_report(Detector::Nv, reader("nv-r1", 0, clock.epoch_ms()));

    clock.advance(Duration::from_secs(61 * 60));
    let ts = clock.epoch_ms();
    store.submit_report(Detector::Tpc, reader("tpc-r1", 3, ts));
    let mut controller = reader("tpc-cc", 3, ts);
    controller.kind = NodeKind::Controller;
    controller.number = Some(0);
    controller.mode = Some("background".into());
    store.submit_report(Detector::Tpc, controller);

    let id = engine.next_command_id();
    engine.tick().await;

    // the CC half of the stop was enqueued with a 5s delay; promote it via
    // the dispatcher path. Both the reader and CC records share `id`.
    store.promote_due(clock.epoch_ms() + 5_000);
    assert!(store.ack_time_ms(id).await.unwrap().is_some());
}

#[tokio::test]
async fn invariant_at_most_one_start_per_tick_end_to_end() {
    let (mut engine, clock, store) = harness();
    store.set_goal_value(Detector::Tpc, "active", goal_value("true"));
    store.set_goal_value(Detector::Tpc, "mode", goal_value("background"));
    store.set_goal_value(Detector::Tpc, "user", goal_value("alice"));
    store.set_goal_value(Detector::Tpc, "finish_run_on_stop", goal_value("false"));
    store.set_goal_value(Detector::Tpc, "stop_after", goal_value(""));
    store.set_goal_value(Detector::Tpc, "comment", goal_value(""));
    store.set_goal_value(Detector::Tpc, "link_mv", goal_value("false"));
    store.set_goal_value(Detector::Tpc, "link_nv", goal_value("false"));
    set_base_goal(&store, Detector::Mv, true);
    set_base_goal(&store, Detector::Nv, false);

    // Tick 1: both TPC and MV are IDLE -> both get armed.
    let ts = clock.epoch_ms();
    store.submit_report(Detector::Tpc, reader("tpc-r1", 0, ts));
    store.submit_report(Detector::Mv, reader("mv-r1", 0, ts));
    store.submit_report(Detector::Nv, reader("nv-r1", 0, ts));
    engine.tick().await;

    // Tick 2, 30s later: both report ARMED -> at most one `start` may issue.
    clock.advance(Duration::from_secs(30));
    let ts = clock.epoch_ms();
    store.submit_report(Detector::Tpc, reader("tpc-r1", 2, ts));
    store.submit_report(Detector::Mv, reader("mv-r1", 2, ts));
    store.submit_report(Detector::Nv, reader("nv-r1", 0, ts));

    let id = engine.next_command_id();
    engine.tick().await;

    assert_eq!(
        engine.next_command_id(),
        id + 1,
        "exactly one of the two eligible detectors may start per tick"
    );
    store.promote_due(ts);
    assert_eq!(store.ack_time_ms(id).await.unwrap(), Some(ts));
}

#[tokio::test]
async fn dispatcher_worker_promotes_queued_commands_end_to_end() {
    let (mut engine, clock, store) = harness();
    set_base_goal(&store, Detector::Tpc, true);
    set_base_goal(&store, Detector::Mv, false);
    set_base_goal(&store, Detector::Nv, false);
    let ts = clock.epoch_ms();
    store.submit_report(Detector::Tpc, reader("tpc-r1", 0, ts));
    store.submit_report(Detector::Mv, reader("mv-r1", 0, ts));
    store.submit_report(Detector::Nv, reader("nv-r1", 0, ts));

    let id = engine.next_command_id();
    engine.tick().await;

    let signal = Arc::new(DispatchSignal::default());
    let shutdown = CancellationToken::new();
    let worker_store = store.clone();
    let worker = tokio::spawn(dispatcher::run(worker_store, signal.clone(), move || ts, shutdown.clone()));
    signal.notify();

    tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            if store.ack_time_ms(id).await.unwrap().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("dispatcher should promote the arm command");

    shutdown.cancel();
    worker.await.unwrap();
}
