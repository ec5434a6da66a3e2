//! Testing utilities for reprobench pipelines.
//!
//! This module provides:
//! - A recording process runner with failure injection
//! - A counting in-process stage task
//! - Scratch workspaces and stage fixtures
//! - Assertions over pipeline runs

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_executed, assert_skipped, assert_stage_state};
pub use fixtures::{touch_stage, TestWorkspace};
pub use mocks::{CountingTask, RecordingRunner};
