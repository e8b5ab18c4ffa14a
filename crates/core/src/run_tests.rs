// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 XENONnT Collaboration

use super::*;

fn sample() -> RunDocument {
    RunDocument::open(
        7,
        vec![Detector::Tpc],
        "alice",
        "background",
        serde_json::json!({"readers": ["r1"]}),
        None,
        None,
        None,
        1000,
    )
}

#[test]
fn opens_with_no_end_and_no_bootstrax_state() {
    let run = sample();
    assert!(run.is_open());
    assert_eq!(run.bootstrax_state, None);
    assert!(run.tags.is_empty());
}

#[test]
fn close_is_idempotent() {
    let mut run = sample();
    assert!(run.close(2000));
    assert_eq!(run.end_ms, Some(2000));
    assert!(!run.close(3000), "second close must be a no-op");
    assert_eq!(run.end_ms, Some(2000));
}

#[test]
fn messy_tag_can_be_pushed_independently_of_close() {
    let mut run = sample();
    run.push_messy_tag();
    run.close(2000);
    run.push_messy_tag();
    assert_eq!(run.tags, vec!["messy".to_string(), "messy".to_string()]);
}
