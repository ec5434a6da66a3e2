//! Pipeline definition and execution.
//!
//! This module provides:
//! - Stage specifications and in-process stage tasks
//! - The stage graph with deterministic topological ordering
//! - A validating pipeline builder
//! - The sequential, fail-stop orchestrator

mod builder;
mod context;
mod dag;
mod idempotency;
mod orchestrator;
mod spec;

pub use builder::PipelineBuilder;
pub use context::StageContext;
pub use dag::StageGraph;
pub use idempotency::generate_idempotency_key;
pub use orchestrator::{Orchestrator, PipelineRun, PlannedStage, StageRecord};
pub use spec::{StageAction, StageSpec, StageTask};
