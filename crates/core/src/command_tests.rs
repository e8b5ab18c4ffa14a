// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

use super::*;

#[test]
fn fresh_state_defaults_to_force_stop_allowed() {
    let state = CooldownState::new();
    assert!(state.can_force_stop(Detector::Tpc));
    assert_eq!(state.error_stop_count(Detector::Tpc), 0);
    assert_eq!(state.last_command_ms(Detector::Tpc, Command::Arm), None);
}

#[test]
fn record_command_updates_last_issued() {
    let mut state = CooldownState::new();
    state.record_command(Detector::Tpc, Command::Arm, 1000);
    assert_eq!(state.last_command_ms(Detector::Tpc, Command::Arm), Some(1000));
    assert_eq!(state.last_command_ms(Detector::Tpc, Command::Start), None);
}

#[test]
fn error_stop_count_increments_and_resets() {
    let mut state = CooldownState::new();
    state.increment_error_stop_count(Detector::Tpc);
    state.increment_error_stop_count(Detector::Tpc);
    assert_eq!(state.error_stop_count(Detector::Tpc), 2);
    state.reset_error_stop_count(Detector::Tpc);
    assert_eq!(state.error_stop_count(Detector::Tpc), 0);
}

#[test]
fn observe_idle_resets_both_fields() {
    let mut state = CooldownState::new();
    state.increment_error_stop_count(Detector::Tpc);
    state.set_can_force_stop(Detector::Tpc, false);
    state.observe_idle(Detector::Tpc);
    assert_eq!(state.error_stop_count(Detector::Tpc), 0);
    assert!(state.can_force_stop(Detector::Tpc));
}

#[test]
fn command_record_tracks_full_acknowledgement() {
    let mut record = CommandRecord::new(
        0,
        Command::Start,
        "alice",
        Detector::Tpc,
        "background",
        vec!["reader1".into(), "reader2".into()],
        1000,
    );
    assert!(!record.fully_acknowledged());
    record.acknowledged.insert("reader1".into(), 1200);
    assert!(!record.fully_acknowledged());
    record.acknowledged.insert("reader2".into(), 1300);
    assert!(record.fully_acknowledged());
    assert_eq!(record.latest_ack_ms(), Some(1300));
}

#[test]
fn empty_host_list_is_never_fully_acknowledged() {
    let record = CommandRecord::new(0, Command::Stop, "alice", Detector::Mv, "background", vec![], 1000);
    assert!(!record.fully_acknowledged());
    assert_eq!(record.latest_ack_ms(), None);
}
