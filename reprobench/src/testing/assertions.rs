//! Test assertions for pipeline runs.

use crate::core::StageState;
use crate::pipeline::PipelineRun;

/// Asserts that exactly `expected` stages executed, in this order.
pub fn assert_executed(run: &PipelineRun, expected: &[&str]) {
    assert_eq!(
        run.executed(),
        expected,
        "Unexpected executed stages; records: {:?}",
        run.records
    );
}

/// Asserts that exactly `expected` stages were skipped, in this order.
pub fn assert_skipped(run: &PipelineRun, expected: &[&str]) {
    assert_eq!(
        run.skipped(),
        expected,
        "Unexpected skipped stages; records: {:?}",
        run.records
    );
}

/// Asserts a stage's terminal state.
pub fn assert_stage_state(run: &PipelineRun, stage: &str, expected: StageState) {
    let actual = run.record(stage).map(|r| r.state);
    assert_eq!(
        actual,
        Some(expected),
        "Expected stage '{stage}' to be {expected}, got {actual:?}"
    );
}
